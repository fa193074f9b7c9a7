//! Client-side state owned by the application.
//!
//! SYSTEM CONTEXT
//! ==============
//! `session` is the single writer of "who is logged in". Route guards and
//! front-end code read snapshots of it and never mutate it directly.

pub mod session;
