//! Repository Implementations
//!
//! Concrete implementations of the domain persistence traits.
//!
//! ## Available Repositories
//!
//! - **PgConversationRepository** - Conversations and inbox ordering
//! - **PgMessageRepository** - Ordered message history with read flags
//! - **PgUserDirectory** - Read-only account lookups
//! - **InMemoryStore** - All of the above in process memory
//!
//! ## Usage Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use sqlx::PgPool;
//! use crate::infrastructure::repositories::{
//!     PgConversationRepository, PgMessageRepository, PgUserDirectory,
//! };
//!
//! fn setup_repositories(pool: PgPool, ids: Arc<SnowflakeGenerator>) {
//!     let conversations = PgConversationRepository::new(pool.clone(), ids.clone());
//!     let messages = PgMessageRepository::new(pool.clone(), ids);
//!     let users = PgUserDirectory::new(pool);
//! }
//! ```

pub mod conversation_repository;
pub mod memory;
pub mod message_repository;
pub mod user_repository;

pub use conversation_repository::PgConversationRepository;
pub use memory::InMemoryStore;
pub use message_repository::PgMessageRepository;
pub use user_repository::PgUserDirectory;
