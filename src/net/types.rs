//! Wire DTOs for the køerebog backend API.
//!
//! DESIGN
//! ======
//! Response types tolerate missing optional fields so older backend revisions
//! still decode. Request types skip `None` fields so partial updates only send
//! what changed.

#[cfg(test)]
#[path = "types_test.rs"]
mod types_test;

use std::fmt;

use serde::{Deserialize, Serialize};

// =============================================================================
// AUTH
// =============================================================================

/// Username/password pair exchanged for a bearer token at `POST /login`.
#[derive(Clone, PartialEq, Eq, Serialize)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    #[must_use]
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self { username: username.into(), password: password.into() }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Successful `POST /login` body.
#[derive(Clone, PartialEq, Eq, Deserialize)]
pub struct LoginResponse {
    /// Bearer token. Empty when the backend omitted it.
    #[serde(default)]
    pub access_token: String,
    /// Canonical username as stored by the backend.
    #[serde(default)]
    pub username: String,
    /// Whether the account has admin privileges.
    #[serde(default)]
    pub is_admin: bool,
}

impl fmt::Debug for LoginResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoginResponse")
            .field("access_token", &"<redacted>")
            .field("username", &self.username)
            .field("is_admin", &self.is_admin)
            .finish()
    }
}

/// Error body returned with non-2xx responses.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ErrorBody {
    #[serde(default)]
    pub message: Option<String>,
}

// =============================================================================
// TRIPS
// =============================================================================

/// A logged trip.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trip {
    pub id: i64,
    /// Trip date as sent by the backend (ISO `YYYY-MM-DD`).
    pub date: Option<String>,
    pub start_location_id: Option<i64>,
    pub end_location_id: Option<i64>,
    /// Driven distance in kilometres.
    pub distance_km: Option<f64>,
    /// Business purpose of the trip.
    pub purpose: Option<String>,
    /// Owner of the trip, when the backend includes it.
    pub username: Option<String>,
}

/// Body for `POST /trips`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NewTrip {
    pub date: String,
    pub start_location_id: i64,
    pub end_location_id: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub distance_km: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub purpose: Option<String>,
}

// =============================================================================
// LOCATIONS
// =============================================================================

/// A saved location trips start or end at.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub id: i64,
    pub name: String,
    pub address: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
}

/// Body for `POST /locations` and `PUT /locations/{id}`.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct LocationInput {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latitude: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub longitude: Option<f64>,
}

/// Result of `GET /lookup-address`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AddressLookup {
    /// Normalized address, when the geocoder returns one.
    pub address: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
}

// =============================================================================
// ADMIN USERS
// =============================================================================

/// A user account as listed by the admin endpoints.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: i64,
    pub username: String,
    #[serde(default)]
    pub is_admin: bool,
}

/// Body for `POST /admin/users`.
#[derive(Clone, PartialEq, Eq, Serialize)]
pub struct NewUser {
    pub username: String,
    pub password: String,
    pub is_admin: bool,
}

impl fmt::Debug for NewUser {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NewUser")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("is_admin", &self.is_admin)
            .finish()
    }
}

/// Body for `PUT /admin/users/{id}`. Only set fields are sent.
#[derive(Clone, Default, PartialEq, Eq, Serialize)]
pub struct UserUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_admin: Option<bool>,
}

impl fmt::Debug for UserUpdate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UserUpdate")
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("is_admin", &self.is_admin)
            .finish()
    }
}
