//! Networking modules for the backend REST API.
//!
//! SYSTEM CONTEXT
//! ==============
//! `api` performs HTTP calls and attaches the bearer token, `events` carries
//! the one-way "unauthorized" signal out of the client, and `types` defines
//! the JSON wire schema.

pub mod api;
pub mod events;
pub mod types;

#[cfg(test)]
pub mod test_helpers;
