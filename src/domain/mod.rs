//! # Domain Layer
//!
//! The domain layer contains the core business types of the marketplace chat.
//! It is independent of any transport or storage concerns.
//!
//! ## Structure
//!
//! - **entities**: Conversation, Message, Principal and their repository traits
//! - **value_objects**: canonical identifier types
//!
//! Repository traits define the persistence collaborator contract; the
//! infrastructure layer provides PostgreSQL and in-memory implementations.

pub mod entities;
pub mod value_objects;

// Re-export commonly used types
pub use entities::*;
pub use value_objects::*;
