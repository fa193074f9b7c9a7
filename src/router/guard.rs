//! Per-navigation access decision.
//!
//! Checks run in a fixed order: authentication, then admin privilege, then
//! the already-logged-in bounce away from the login page. The login bounce
//! only applies once both access checks have passed, so it can never mask a
//! required redirect.

#[cfg(test)]
#[path = "guard_test.rs"]
mod guard_test;

use super::{RouteDescriptor, RouteTable};
use crate::state::session::Session;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DenyReason {
    /// Route needs a logged-in user.
    Unauthenticated,
    /// Route needs an admin.
    Forbidden,
    /// Logged-in users have no business on the login page.
    AlreadyAuthenticated,
}

impl DenyReason {
    /// Short notice a front end can show after the redirect.
    #[must_use]
    pub fn notice(self) -> &'static str {
        match self {
            Self::Unauthenticated => "Log in to continue.",
            Self::Forbidden => "You do not have permission to view that page.",
            Self::AlreadyAuthenticated => "You are already logged in.",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    Allow,
    Redirect { to: String, reason: DenyReason },
}

/// Decide whether `session` may enter `route`.
#[must_use]
pub fn evaluate(table: &RouteTable, route: &RouteDescriptor, session: &Session) -> Decision {
    let authenticated = session.is_authenticated();

    if route.requires_auth() && !authenticated {
        return Decision::Redirect { to: table.login_path().to_owned(), reason: DenyReason::Unauthenticated };
    }
    if route.requires_admin() && !(authenticated && session.is_admin()) {
        return Decision::Redirect { to: table.default_path().to_owned(), reason: DenyReason::Forbidden };
    }
    if table.is_login(route) && authenticated {
        return Decision::Redirect { to: table.default_path().to_owned(), reason: DenyReason::AlreadyAuthenticated };
    }
    Decision::Allow
}
