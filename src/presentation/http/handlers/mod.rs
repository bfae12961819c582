//! HTTP Handlers
//!
//! Request handlers for the HTTP endpoints.

pub mod health;
