//! REST client for the køerebog backend.
//!
//! SYSTEM CONTEXT
//! ==============
//! Every backend call goes through [`ApiClient::call`]. Authenticated calls
//! read the bearer token from persisted storage at send time, never from the
//! session store. A 401 on such a call publishes [`AuthEvent::Unauthorized`]
//! and is returned to the caller; clearing the session is the subscriber's
//! job, not this module's.
//!
//! ERROR HANDLING
//! ==============
//! Non-2xx responses carry `{"message": ...}`. That message is surfaced
//! verbatim in [`ApiError`]; bodies without one get `API error: <status>`.

#[cfg(test)]
#[path = "api_test.rs"]
mod api_test;

use std::sync::Arc;

use reqwest::Method;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

use super::events::{AuthEvent, AuthEvents};
use super::types::{
    AddressLookup, Credentials, ErrorBody, Location, LocationInput, LoginResponse, NewTrip, NewUser, Trip, User,
    UserUpdate,
};
use crate::config::ClientConfig;
use crate::storage::{self, SessionStorage, StorageError};

// =============================================================================
// ERROR
// =============================================================================

/// Errors produced by backend calls.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// The request never produced an HTTP response (DNS, connect, timeout).
    #[error("network error: {0}")]
    Transport(#[from] reqwest::Error),

    /// HTTP 401: credentials rejected or token no longer valid.
    #[error("{message}")]
    Unauthorized { message: String },

    /// HTTP 403: authenticated but lacking privilege.
    #[error("{message}")]
    Forbidden { message: String },

    /// Any other non-success status.
    #[error("{message}")]
    Status { status: u16, message: String },

    /// A success body did not match the expected shape.
    #[error("response decode failed: {0}")]
    Decode(String),

    /// A request body could not be encoded.
    #[error("request encode failed: {0}")]
    Encode(String),

    /// The persisted token could not be read.
    #[error(transparent)]
    Storage(#[from] StorageError),

    /// The underlying HTTP client could not be constructed.
    #[error("HTTP client build failed: {0}")]
    HttpClientBuild(String),
}

impl ApiError {
    /// HTTP status for errors that carry one.
    #[must_use]
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Unauthorized { .. } => Some(401),
            Self::Forbidden { .. } => Some(403),
            Self::Status { status, .. } => Some(*status),
            Self::Transport(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }

    /// The backend-supplied `message`, for errors built from a response.
    #[must_use]
    pub fn server_message(&self) -> Option<&str> {
        match self {
            Self::Unauthorized { message } | Self::Forbidden { message } | Self::Status { message, .. } => {
                Some(message)
            }
            _ => None,
        }
    }
}

fn error_message(status: u16, body: &str) -> String {
    serde_json::from_str::<ErrorBody>(body)
        .ok()
        .and_then(|b| b.message)
        .filter(|m| !m.trim().is_empty())
        .unwrap_or_else(|| format!("API error: {status}"))
}

fn error_from_status(status: u16, body: &str) -> ApiError {
    let message = error_message(status, body);
    match status {
        401 => ApiError::Unauthorized { message },
        403 => ApiError::Forbidden { message },
        _ => ApiError::Status { status, message },
    }
}

fn decode<T: DeserializeOwned>(body: &str) -> Result<T, ApiError> {
    let body = if body.trim().is_empty() { "null" } else { body };
    serde_json::from_str(body).map_err(|e| ApiError::Decode(e.to_string()))
}

fn encode<B: Serialize + ?Sized>(body: &B) -> Result<Value, ApiError> {
    serde_json::to_value(body).map_err(|e| ApiError::Encode(e.to_string()))
}

fn location_path(id: i64) -> String {
    format!("/locations/{id}")
}

fn admin_user_path(id: i64) -> String {
    format!("/admin/users/{id}")
}

// =============================================================================
// CLIENT
// =============================================================================

/// Whether a call carries the persisted bearer token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Auth {
    Bearer,
    Public,
}

/// Credential exchange used by the session store.
///
/// Implemented by [`ApiClient`]; tests substitute their own.
#[async_trait::async_trait]
pub trait AuthApi: Send + Sync {
    /// Exchange credentials for a token without touching any session state.
    async fn login(&self, credentials: &Credentials) -> Result<LoginResponse, ApiError>;
}

#[derive(Clone)]
pub struct ApiClient {
    http: reqwest::Client,
    base_url: String,
    storage: Arc<dyn SessionStorage>,
    events: AuthEvents,
}

impl ApiClient {
    /// Build a client that reads its token from `storage` and reports 401s
    /// on `events`.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError::HttpClientBuild`] if the HTTP client cannot be built.
    pub fn new(config: &ClientConfig, storage: Arc<dyn SessionStorage>, events: AuthEvents) -> Result<Self, ApiError> {
        let http = reqwest::Client::builder()
            .timeout(config.timeouts.request())
            .connect_timeout(config.timeouts.connect())
            .build()
            .map_err(|e| ApiError::HttpClientBuild(e.to_string()))?;
        Ok(Self { http, base_url: config.api_url.clone(), storage, events })
    }

    #[cfg(test)]
    pub(crate) fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn call<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, &str)],
        body: Option<Value>,
        auth: Auth,
    ) -> Result<T, ApiError> {
        let url = format!("{}{path}", self.base_url);
        let mut request = self.http.request(method.clone(), &url);
        if !query.is_empty() {
            request = request.query(query);
        }
        if auth == Auth::Bearer {
            if let Some(token) = storage::read_token(self.storage.as_ref())? {
                request = request.bearer_auth(token);
            }
        }
        if let Some(json) = body {
            request = request.json(&json);
        }

        let response = request.send().await.map_err(|e| {
            tracing::warn!(%method, path, error = %e, "backend request failed");
            ApiError::Transport(e)
        })?;
        let status = response.status().as_u16();
        let text = response.text().await?;

        if !(200..300).contains(&status) {
            let err = error_from_status(status, &text);
            if status == 401 && auth == Auth::Bearer {
                let reached = self.events.publish(AuthEvent::Unauthorized);
                tracing::warn!(%method, path, subscribers = reached, "token rejected; published unauthorized");
            } else if status == 403 {
                tracing::warn!(%method, path, "permission denied by backend");
            } else {
                tracing::debug!(%method, path, status, "backend returned error status");
            }
            return Err(err);
        }

        tracing::debug!(%method, path, status, "backend request ok");
        decode(&text)
    }

    /// Authenticated request with an optional JSON body, returning the raw
    /// JSON response.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError::Unauthorized`] on 401 (after publishing the
    /// invalidation event), [`ApiError::Forbidden`] on 403, and other
    /// [`ApiError`] variants for transport, status, or decode failures.
    pub async fn request(&self, method: Method, path: &str, body: Option<Value>) -> Result<Value, ApiError> {
        self.call(method, path, &[], body, Auth::Bearer).await
    }

    /// Exchange credentials for a token at `POST /login`.
    ///
    /// Sent without a bearer token. A 401 here is a rejected login and does
    /// not publish an invalidation event.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError::Unauthorized`] for bad credentials or any other
    /// [`ApiError`] on transport or decode failure.
    pub async fn login(&self, credentials: &Credentials) -> Result<LoginResponse, ApiError> {
        self.call(Method::POST, "/login", &[], Some(encode(credentials)?), Auth::Public).await
    }

    // -------------------------------------------------------------------------
    // Trips
    // -------------------------------------------------------------------------

    /// `GET /trips`.
    ///
    /// # Errors
    ///
    /// See [`ApiClient::request`].
    pub async fn list_trips(&self) -> Result<Vec<Trip>, ApiError> {
        self.call(Method::GET, "/trips", &[], None, Auth::Bearer).await
    }

    /// `POST /trips`.
    ///
    /// # Errors
    ///
    /// See [`ApiClient::request`].
    pub async fn create_trip(&self, trip: &NewTrip) -> Result<Trip, ApiError> {
        self.call(Method::POST, "/trips", &[], Some(encode(trip)?), Auth::Bearer).await
    }

    // -------------------------------------------------------------------------
    // Locations
    // -------------------------------------------------------------------------

    /// `GET /locations`.
    ///
    /// # Errors
    ///
    /// See [`ApiClient::request`].
    pub async fn list_locations(&self) -> Result<Vec<Location>, ApiError> {
        self.call(Method::GET, "/locations", &[], None, Auth::Bearer).await
    }

    /// `POST /locations`.
    ///
    /// # Errors
    ///
    /// See [`ApiClient::request`].
    pub async fn create_location(&self, location: &LocationInput) -> Result<Location, ApiError> {
        self.call(Method::POST, "/locations", &[], Some(encode(location)?), Auth::Bearer).await
    }

    /// `PUT /locations/{id}`.
    ///
    /// # Errors
    ///
    /// See [`ApiClient::request`].
    pub async fn update_location(&self, id: i64, location: &LocationInput) -> Result<Location, ApiError> {
        self.call(Method::PUT, &location_path(id), &[], Some(encode(location)?), Auth::Bearer).await
    }

    /// `DELETE /locations/{id}`.
    ///
    /// # Errors
    ///
    /// See [`ApiClient::request`].
    pub async fn delete_location(&self, id: i64) -> Result<(), ApiError> {
        self.call::<Value>(Method::DELETE, &location_path(id), &[], None, Auth::Bearer).await?;
        Ok(())
    }

    /// `GET /lookup-address?address=...`. Public; no token is sent.
    ///
    /// # Errors
    ///
    /// See [`ApiClient::request`].
    pub async fn lookup_address(&self, address: &str) -> Result<AddressLookup, ApiError> {
        self.call(Method::GET, "/lookup-address", &[("address", address)], None, Auth::Public).await
    }

    // -------------------------------------------------------------------------
    // Admin users
    // -------------------------------------------------------------------------

    /// `GET /admin/users`.
    ///
    /// # Errors
    ///
    /// See [`ApiClient::request`].
    pub async fn list_users(&self) -> Result<Vec<User>, ApiError> {
        self.call(Method::GET, "/admin/users", &[], None, Auth::Bearer).await
    }

    /// `POST /admin/users`.
    ///
    /// # Errors
    ///
    /// See [`ApiClient::request`].
    pub async fn create_user(&self, user: &NewUser) -> Result<User, ApiError> {
        self.call(Method::POST, "/admin/users", &[], Some(encode(user)?), Auth::Bearer).await
    }

    /// `PUT /admin/users/{id}`.
    ///
    /// # Errors
    ///
    /// See [`ApiClient::request`].
    pub async fn update_user(&self, id: i64, update: &UserUpdate) -> Result<User, ApiError> {
        self.call(Method::PUT, &admin_user_path(id), &[], Some(encode(update)?), Auth::Bearer).await
    }

    /// `DELETE /admin/users/{id}`.
    ///
    /// # Errors
    ///
    /// See [`ApiClient::request`].
    pub async fn delete_user(&self, id: i64) -> Result<(), ApiError> {
        self.call::<Value>(Method::DELETE, &admin_user_path(id), &[], None, Auth::Bearer).await?;
        Ok(())
    }
}

#[async_trait::async_trait]
impl AuthApi for ApiClient {
    async fn login(&self, credentials: &Credentials) -> Result<LoginResponse, ApiError> {
        ApiClient::login(self, credentials).await
    }
}
