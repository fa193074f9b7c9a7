//! Auth-session state for the current user.
//!
//! SYSTEM CONTEXT
//! ==============
//! [`SessionStore`] is the only writer of the [`Session`]. It persists every
//! change through [`PersistedSession`], rehydrates at startup, and clears
//! itself when the API client publishes [`AuthEvent::Unauthorized`].
//!
//! CONCURRENCY
//! ===========
//! The session sits behind a `std::sync::RwLock` that is held only for a
//! synchronous read or commit, never across an `.await`. Overlapping logins
//! resolve as last-started-wins: each attempt takes a sequence number and
//! only the newest may commit; older attempts return
//! [`SessionError::Superseded`] and leave state untouched.

#[cfg(test)]
#[path = "session_test.rs"]
mod session_test;

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use tokio::sync::broadcast;
use tokio::sync::broadcast::error::{RecvError, TryRecvError};
use tokio::task::JoinHandle;

use crate::net::api::{ApiError, AuthApi};
use crate::net::events::AuthEvent;
use crate::net::types::{Credentials, LoginResponse};
use crate::storage::{PersistedSession, SessionStorage, StorageError};

pub const GENERIC_LOGIN_ERROR: &str = "Login failed. Please try again.";
pub const MISSING_CREDENTIALS_ERROR: &str = "Username and password are required.";
pub const MISSING_TOKEN_ERROR: &str = "Login response did not include a token.";
pub const SAVE_FAILED_ERROR: &str = "Could not save the session.";

// =============================================================================
// SESSION
// =============================================================================

/// Authenticated identity of the current user.
///
/// Authentication is derived from the token rather than stored, so a session
/// can never claim to be authenticated without one.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Session {
    token: Option<String>,
    username: Option<String>,
    admin: bool,
    last_error: Option<String>,
}

impl Session {
    /// An unauthenticated session with no error.
    #[must_use]
    pub fn anonymous() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn authenticated(token: impl Into<String>, username: impl Into<String>, is_admin: bool) -> Self {
        Self { token: Some(token.into()), username: Some(username.into()), admin: is_admin, last_error: None }
    }

    fn failed(message: String) -> Self {
        Self { last_error: Some(message), ..Self::default() }
    }

    fn from_record(record: PersistedSession) -> Self {
        Self::authenticated(record.token, record.username, record.is_admin)
    }

    #[must_use]
    pub fn token(&self) -> Option<&str> {
        self.token.as_deref().filter(|t| !t.is_empty())
    }

    #[must_use]
    pub fn username(&self) -> Option<&str> {
        self.username.as_deref()
    }

    /// True iff a non-empty token is present.
    #[must_use]
    pub fn is_authenticated(&self) -> bool {
        self.token().is_some()
    }

    /// Admin privilege, always false while unauthenticated.
    #[must_use]
    pub fn is_admin(&self) -> bool {
        self.admin && self.is_authenticated()
    }

    /// User-facing message from the most recent failed login.
    #[must_use]
    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("token", &self.token.as_ref().map(|_| "<redacted>"))
            .field("username", &self.username)
            .field("is_authenticated", &self.is_authenticated())
            .field("is_admin", &self.is_admin())
            .field("last_error", &self.last_error)
            .finish()
    }
}

// =============================================================================
// ERRORS
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("username and password are required")]
    MissingCredentials,

    #[error("login response did not include a token")]
    MissingToken,

    #[error(transparent)]
    Api(#[from] ApiError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    /// A newer login started before this one finished.
    #[error("login superseded by a newer attempt")]
    Superseded,
}

/// Stable, user-facing text for a failed login, stored in `last_error`.
#[must_use]
pub fn login_error_message(err: &SessionError) -> String {
    match err {
        SessionError::MissingCredentials => MISSING_CREDENTIALS_ERROR.to_owned(),
        SessionError::MissingToken => MISSING_TOKEN_ERROR.to_owned(),
        SessionError::Storage(_) => SAVE_FAILED_ERROR.to_owned(),
        SessionError::Api(api) => api.server_message().map_or_else(|| GENERIC_LOGIN_ERROR.to_owned(), str::to_owned),
        SessionError::Superseded => GENERIC_LOGIN_ERROR.to_owned(),
    }
}

/// What [`SessionStore::initialize`] found in storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rehydration {
    /// A valid record was loaded; the session is authenticated.
    Restored,
    /// Nothing was stored; the session is empty.
    Empty,
    /// A malformed record was found and removed; the session is empty.
    Discarded,
}

// =============================================================================
// STORE
// =============================================================================

struct Inner {
    session: RwLock<Session>,
    storage: Arc<dyn SessionStorage>,
    api: Arc<dyn AuthApi>,
    latest_attempt: AtomicU64,
}

/// Cheaply cloneable handle to the session. Clones share state.
#[derive(Clone)]
pub struct SessionStore {
    inner: Arc<Inner>,
}

impl SessionStore {
    #[must_use]
    pub fn new(storage: Arc<dyn SessionStorage>, api: Arc<dyn AuthApi>) -> Self {
        Self {
            inner: Arc::new(Inner {
                session: RwLock::new(Session::anonymous()),
                storage,
                api,
                latest_attempt: AtomicU64::new(0),
            }),
        }
    }

    /// Copy of the current session.
    #[must_use]
    pub fn snapshot(&self) -> Session {
        self.inner.session.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    #[must_use]
    pub fn is_authenticated(&self) -> bool {
        self.snapshot().is_authenticated()
    }

    #[must_use]
    pub fn is_admin(&self) -> bool {
        self.snapshot().is_admin()
    }

    #[must_use]
    pub fn username(&self) -> Option<String> {
        self.snapshot().username().map(str::to_owned)
    }

    #[must_use]
    pub fn last_error(&self) -> Option<String> {
        self.snapshot().last_error().map(str::to_owned)
    }

    fn replace(&self, session: Session) {
        *self.inner.session.write().unwrap_or_else(PoisonError::into_inner) = session;
    }

    /// Rehydrate from persisted storage. No network calls.
    ///
    /// A malformed record is removed and the session left empty. Calling this
    /// again with unchanged storage yields the same session.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Storage`] if the backend cannot be read, or if
    /// a malformed record cannot be removed.
    pub fn initialize(&self) -> Result<Rehydration, SessionError> {
        match PersistedSession::load(self.inner.storage.as_ref()) {
            Ok(Some(record)) => {
                let restored = Session::from_record(record);
                let mut session = self.inner.session.write().unwrap_or_else(PoisonError::into_inner);
                if *session != restored {
                    tracing::info!(username = restored.username().unwrap_or_default(), "session restored");
                    *session = restored;
                }
                Ok(Rehydration::Restored)
            }
            Ok(None) => {
                tracing::debug!("no persisted session");
                Ok(Rehydration::Empty)
            }
            Err(StorageError::Malformed(reason)) => {
                tracing::warn!(%reason, "discarding malformed persisted session");
                self.replace(Session::anonymous());
                PersistedSession::clear(self.inner.storage.as_ref())?;
                Ok(Rehydration::Discarded)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Exchange credentials for a token and commit the session.
    ///
    /// On success every field is set and persisted together. On failure the
    /// session and record are cleared, `last_error` is set, and the error is
    /// returned.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::MissingCredentials`] for a blank username or
    /// password, [`SessionError::Api`] when the backend rejects the login or
    /// cannot be reached, [`SessionError::MissingToken`] for a token-less
    /// reply, [`SessionError::Storage`] if the record cannot be saved, and
    /// [`SessionError::Superseded`] if a newer login started meanwhile.
    pub async fn login(&self, credentials: Credentials) -> Result<Session, SessionError> {
        let attempt = self.inner.latest_attempt.fetch_add(1, Ordering::SeqCst) + 1;

        if credentials.username.trim().is_empty() || credentials.password.is_empty() {
            return Err(self.commit_failure(attempt, SessionError::MissingCredentials));
        }

        let result = self.inner.api.login(&credentials).await;
        match result {
            Ok(resp) if !resp.access_token.trim().is_empty() => self.commit_success(attempt, &credentials, resp),
            Ok(_) => Err(self.commit_failure(attempt, SessionError::MissingToken)),
            Err(e) => Err(self.commit_failure(attempt, SessionError::Api(e))),
        }
    }

    fn is_latest(&self, attempt: u64) -> bool {
        self.inner.latest_attempt.load(Ordering::SeqCst) == attempt
    }

    fn commit_success(
        &self,
        attempt: u64,
        credentials: &Credentials,
        resp: LoginResponse,
    ) -> Result<Session, SessionError> {
        let mut session = self.inner.session.write().unwrap_or_else(PoisonError::into_inner);
        if !self.is_latest(attempt) {
            tracing::debug!(attempt, "discarding superseded login result");
            return Err(SessionError::Superseded);
        }

        let username = if resp.username.trim().is_empty() { credentials.username.clone() } else { resp.username };
        let record = PersistedSession { token: resp.access_token, username, is_admin: resp.is_admin };

        if let Err(e) = record.save(self.inner.storage.as_ref()) {
            let err = SessionError::Storage(e);
            tracing::error!(error = %err, "failed to persist session");
            if let Err(clear) = PersistedSession::clear(self.inner.storage.as_ref()) {
                tracing::warn!(error = %clear, "failed to clear partial session record");
            }
            *session = Session::failed(login_error_message(&err));
            return Err(err);
        }

        *session = Session::from_record(record);
        tracing::info!(username = session.username().unwrap_or_default(), is_admin = session.is_admin(), "login succeeded");
        Ok(session.clone())
    }

    fn commit_failure(&self, attempt: u64, err: SessionError) -> SessionError {
        let mut session = self.inner.session.write().unwrap_or_else(PoisonError::into_inner);
        if !self.is_latest(attempt) {
            tracing::debug!(attempt, error = %err, "discarding superseded login failure");
            return SessionError::Superseded;
        }

        let message = login_error_message(&err);
        tracing::warn!(error = %err, "login failed");
        if let Err(clear) = PersistedSession::clear(self.inner.storage.as_ref()) {
            tracing::warn!(error = %clear, "failed to clear session record after login failure");
        }
        *session = Session::failed(message);
        err
    }

    /// Reset the session and remove the persisted record. Safe to call when
    /// already logged out.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Storage`] if the record cannot be removed; the
    /// in-memory session is cleared regardless.
    pub fn clear_auth(&self) -> Result<(), SessionError> {
        let mut session = self.inner.session.write().unwrap_or_else(PoisonError::into_inner);
        *session = Session::anonymous();
        PersistedSession::clear(self.inner.storage.as_ref())?;
        Ok(())
    }

    /// Log out explicitly. Any login still in flight is discarded when it
    /// completes.
    ///
    /// # Errors
    ///
    /// See [`SessionStore::clear_auth`].
    pub fn logout(&self) -> Result<(), SessionError> {
        self.inner.latest_attempt.fetch_add(1, Ordering::SeqCst);
        let was_authenticated = self.is_authenticated();
        self.clear_auth()?;
        if was_authenticated {
            tracing::info!("logged out");
        }
        Ok(())
    }

    /// Apply an event from the API client. Receiving the same event twice is
    /// harmless.
    pub fn handle_event(&self, event: AuthEvent) {
        match event {
            AuthEvent::Unauthorized => {
                if self.is_authenticated() {
                    tracing::warn!("unauthorized access detected; clearing session");
                }
                if let Err(e) = self.clear_auth() {
                    tracing::error!(error = %e, "failed to clear session record");
                }
            }
        }
    }

    /// Apply events already queued on `rx` without waiting, returning how
    /// many were applied. Suits one-shot front ends that check for
    /// invalidation after each command instead of running [`Self::listen`].
    pub fn apply_pending(&self, rx: &mut broadcast::Receiver<AuthEvent>) -> usize {
        let mut applied = 0;
        loop {
            match rx.try_recv() {
                Ok(event) => self.handle_event(event),
                Err(TryRecvError::Lagged(missed)) => {
                    tracing::warn!(missed, "auth event receiver lagged");
                    self.handle_event(AuthEvent::Unauthorized);
                }
                Err(TryRecvError::Empty | TryRecvError::Closed) => return applied,
            }
            applied += 1;
        }
    }

    /// Apply every event from `rx` until all publishers are dropped.
    pub fn listen(&self, mut rx: broadcast::Receiver<AuthEvent>) -> JoinHandle<()> {
        let store = self.clone();
        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(event) => store.handle_event(event),
                    // Every event clears the session, so a missed one still means clear.
                    Err(RecvError::Lagged(missed)) => {
                        tracing::warn!(missed, "auth event listener lagged");
                        store.handle_event(AuthEvent::Unauthorized);
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        })
    }
}
