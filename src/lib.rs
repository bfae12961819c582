//! # Marketplace Chat Library
//!
//! Real-time messaging core behind the pet marketplace's buyer/seller chat:
//! - WebSocket gateway with heartbeats and reconnect-friendly semantics
//! - Per-conversation rooms with ordered message fan-out
//! - Self-expiring typing indicators and unread counters
//! - PostgreSQL (or in-memory) persistence for conversations and messages
//! - A client-side state store that replays server events
//!
//! ## Architecture
//!
//! The crate follows Clean Architecture principles:
//!
//! - **Domain Layer**: Core business entities and repository traits
//! - **Application Layer**: The chat core and its surrounding services
//! - **Infrastructure Layer**: Database, in-memory store, and metrics
//! - **Presentation Layer**: HTTP handlers and WebSocket gateway
//!
//! ## Module Structure
//!
//! ```text
//! marketplace_chat/
//! +-- config/         Configuration management
//! +-- domain/         Domain entities, value objects, and traits
//! +-- application/    Chat core and application services
//! +-- client/         Consumer-side state store
//! +-- infrastructure/ Persistence and metrics implementations
//! +-- presentation/   HTTP routes and WebSocket handlers
//! +-- shared/         Common utilities (errors, snowflake IDs)
//! ```

// Configuration module
pub mod config;

// Domain layer - Core business logic
pub mod domain;

// Application layer - Chat core and services
pub mod application;

// Consumer-side state store
pub mod client;

// Infrastructure layer - External implementations
pub mod infrastructure;

// Presentation layer - HTTP and WebSocket handlers
pub mod presentation;

// Shared utilities
pub mod shared;

// Application startup and state management
pub mod startup;

// Telemetry and observability
pub mod telemetry;
