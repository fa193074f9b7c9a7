//! # koerebog
//!
//! Client core for the køerebog trip-logging service: who is logged in,
//! how requests reach the backend, and which routes the current user may
//! visit.
//!
//! SYSTEM CONTEXT
//! ==============
//! Leaves first: `storage` persists the session record, `net` talks to the
//! backend and publishes invalidation events, `state` owns the session and
//! listens for those events, and `router` gates navigation on a session
//! snapshot. `net` never depends on `state`; the only path back from the
//! API client to the session is the `net::events` broadcast channel.

pub mod config;
pub mod net;
pub mod router;
pub mod state;
pub mod storage;
