//! # Domain Entities
//!
//! Core domain entities of the marketplace chat.
//!
//! - **Principal**: an authenticated account id plus marketplace role
//! - **Conversation**: a two-party chat between a buyer and a shop or rescue center
//! - **Message**: a persisted chat message
//!
//! Each entity has an associated repository trait. The traits are
//! implemented in the infrastructure layer (PostgreSQL and in-memory).

mod conversation;
mod message;
mod user;

pub use conversation::{
    summarize, Conversation, ConversationKind, ConversationRepository, Participants,
    RelatedEntity, SUMMARY_MAX_CHARS,
};
pub use message::{ContentKind, Message, MessageRepository, NewMessage};
pub use user::{Principal, UserDirectory, UserRole};

#[cfg(test)]
pub use conversation::MockConversationRepository;
#[cfg(test)]
pub use message::MockMessageRepository;
#[cfg(test)]
pub use user::MockUserDirectory;
