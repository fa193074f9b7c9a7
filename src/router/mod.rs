//! Route table and guarded navigation.
//!
//! SYSTEM CONTEXT
//! ==============
//! Front ends describe their routes once at startup and call
//! [`RouteTable::navigate`] before every navigation. The guard in [`guard`]
//! decides; this module resolves paths, follows redirects, and stops
//! redirect cycles.


pub mod guard;

pub use guard::{Decision, DenyReason, evaluate};

use crate::state::session::Session;

pub const LOGIN_PATH: &str = "/login";
pub const DEFAULT_PATH: &str = "/trips";
pub const NOT_FOUND_NAME: &str = "NotFound";

/// Redirects followed in one navigation before giving up.
const MAX_REDIRECTS: usize = 4;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum RouteError {
    /// Guard redirects kept bouncing without reaching an allowed route.
    #[error("redirect loop while navigating to {path}")]
    RedirectLoop { path: String },
}

// =============================================================================
// ROUTE DESCRIPTOR
// =============================================================================

/// Static per-route access requirements.
///
/// Requiring admin always implies requiring authentication; constructors
/// normalize this so no descriptor can express the contrary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteDescriptor {
    name: String,
    path: String,
    requires_auth: bool,
    requires_admin: bool,
}

impl RouteDescriptor {
    #[must_use]
    pub fn new(name: impl Into<String>, path: &str, requires_auth: bool, requires_admin: bool) -> Self {
        Self {
            name: name.into(),
            path: normalize_path(path),
            requires_auth: requires_auth || requires_admin,
            requires_admin,
        }
    }

    #[must_use]
    pub fn public(name: impl Into<String>, path: &str) -> Self {
        Self::new(name, path, false, false)
    }

    #[must_use]
    pub fn authenticated(name: impl Into<String>, path: &str) -> Self {
        Self::new(name, path, true, false)
    }

    #[must_use]
    pub fn admin(name: impl Into<String>, path: &str) -> Self {
        Self::new(name, path, true, true)
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }

    #[must_use]
    pub fn requires_auth(&self) -> bool {
        self.requires_auth
    }

    #[must_use]
    pub fn requires_admin(&self) -> bool {
        self.requires_admin
    }
}

/// Drop query/fragment and trailing slashes; the root stays `/`.
fn normalize_path(raw: &str) -> String {
    let path = raw.split(['?', '#']).next().unwrap_or_default().trim();
    let trimmed = path.trim_end_matches('/');
    if trimmed.is_empty() {
        return "/".to_owned();
    }
    if trimmed.starts_with('/') { trimmed.to_owned() } else { format!("/{trimmed}") }
}

// =============================================================================
// ROUTE TABLE
// =============================================================================

/// Outcome of a guarded navigation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Navigation {
    /// Path finally navigated to, after aliases and redirects.
    pub path: String,
    pub route: RouteDescriptor,
    /// Why the first guard redirect happened, if any. Front ends use this to
    /// surface "log in first" or "permission denied".
    pub denied: Option<DenyReason>,
}

impl Navigation {
    #[must_use]
    pub fn was_redirected(&self) -> bool {
        self.denied.is_some()
    }
}

/// Immutable set of routes plus the login and default landing paths.
#[derive(Debug, Clone)]
pub struct RouteTable {
    routes: Vec<RouteDescriptor>,
    aliases: Vec<(String, String)>,
    not_found: RouteDescriptor,
    login_path: String,
    default_path: String,
}

impl RouteTable {
    #[must_use]
    pub fn new(login_path: &str, default_path: &str) -> Self {
        Self {
            routes: Vec::new(),
            aliases: Vec::new(),
            not_found: RouteDescriptor::public(NOT_FOUND_NAME, "/404"),
            login_path: normalize_path(login_path),
            default_path: normalize_path(default_path),
        }
    }

    /// Add a route. A later route with the same path replaces the earlier one.
    #[must_use]
    pub fn route(mut self, route: RouteDescriptor) -> Self {
        self.routes.retain(|r| r.path != route.path);
        self.routes.push(route);
        self
    }

    /// Redirect `from` to `to` unconditionally, before guarding.
    #[must_use]
    pub fn alias(mut self, from: &str, to: &str) -> Self {
        self.aliases.push((normalize_path(from), normalize_path(to)));
        self
    }

    /// The køerebog routes: login, trips, locations, admin users, and `/`
    /// landing on trips.
    #[must_use]
    pub fn default_table() -> Self {
        Self::new(LOGIN_PATH, DEFAULT_PATH)
            .route(RouteDescriptor::public("Login", LOGIN_PATH))
            .route(RouteDescriptor::authenticated("Trips", "/trips"))
            .route(RouteDescriptor::authenticated("Locations", "/locations"))
            .route(RouteDescriptor::admin("AdminUsers", "/admin/users"))
            .alias("/", DEFAULT_PATH)
    }

    #[must_use]
    pub fn login_path(&self) -> &str {
        &self.login_path
    }

    #[must_use]
    pub fn default_path(&self) -> &str {
        &self.default_path
    }

    #[must_use]
    pub fn routes(&self) -> &[RouteDescriptor] {
        &self.routes
    }

    #[must_use]
    pub fn is_login(&self, route: &RouteDescriptor) -> bool {
        route.path == self.login_path
    }

    fn unalias(&self, path: String) -> String {
        self.aliases
            .iter()
            .find(|(from, _)| *from == path)
            .map_or(path, |(_, to)| to.clone())
    }

    /// Descriptor for `path`; unknown paths get the public `NotFound` route.
    #[must_use]
    pub fn resolve(&self, path: &str) -> &RouteDescriptor {
        let path = self.unalias(normalize_path(path));
        self.routes.iter().find(|r| r.path == path).unwrap_or(&self.not_found)
    }

    /// Guard a navigation to `path` for `session`, following redirects.
    ///
    /// # Errors
    ///
    /// Returns [`RouteError::RedirectLoop`] if redirects do not settle, e.g.
    /// when the default route itself is denied to the session.
    pub fn navigate(&self, path: &str, session: &Session) -> Result<Navigation, RouteError> {
        let requested = normalize_path(path);
        let mut target = requested.clone();
        let mut denied = None;

        for _ in 0..=MAX_REDIRECTS {
            target = self.unalias(target);
            let route = self.resolve(&target);
            match evaluate(self, route, session) {
                Decision::Allow => {
                    return Ok(Navigation { path: target, route: route.clone(), denied });
                }
                Decision::Redirect { to, reason } => {
                    tracing::debug!(from = %target, to = %to, ?reason, "navigation redirected");
                    denied.get_or_insert(reason);
                    target = to;
                }
            }
        }

        tracing::warn!(path = %requested, "redirect loop");
        Err(RouteError::RedirectLoop { path: requested })
    }
}

impl Default for RouteTable {
    fn default() -> Self {
        Self::default_table()
    }
}
