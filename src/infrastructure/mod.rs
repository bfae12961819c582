//! Infrastructure Layer
//!
//! Contains implementations for external services including:
//! - Persistence (PostgreSQL and in-memory repositories)
//! - Prometheus metrics

pub mod database;
pub mod metrics;
pub mod repositories;
