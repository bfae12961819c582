//! Message entity and repository trait.
//!
//! Maps to the `messages` table in the database schema.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::value_objects::{ConversationId, MessageId, UserId};
use crate::shared::error::AppError;

/// Payload kind of a message.
///
/// Database definition:
/// ```sql
/// content_kind VARCHAR(16) NOT NULL CHECK (content_kind IN ('text', 'image', 'file'))
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ContentKind {
    #[default]
    Text,
    Image,
    File,
}

impl ContentKind {
    /// Convert from database string representation.
    pub fn from_str(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "image" => Self::Image,
            "file" => Self::File,
            _ => Self::Text,
        }
    }

    /// Convert to database string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Image => "image",
            Self::File => "file",
        }
    }

    /// Image and file messages carry their payload as an attachment.
    pub fn requires_attachment(&self) -> bool {
        !matches!(self, Self::Text)
    }
}

impl std::fmt::Display for ContentKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A persisted message.
///
/// Maps to the `messages` table:
/// - id: BIGINT PRIMARY KEY (Snowflake ID, ordering authority)
/// - conversation_id: BIGINT NOT NULL REFERENCES conversations(id)
/// - sender_id: BIGINT NOT NULL
/// - content: TEXT NOT NULL
/// - content_kind: VARCHAR(16) NOT NULL DEFAULT 'text'
/// - attachment_ref: TEXT NULL
/// - read: BOOLEAN NOT NULL DEFAULT FALSE
/// - created_at: TIMESTAMPTZ NOT NULL DEFAULT NOW()
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub conversation_id: ConversationId,
    pub sender_id: UserId,
    pub content: String,
    pub kind: ContentKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attachment: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub read: bool,
}

impl Message {
    /// Whether the message was sent by `user`.
    pub fn is_from(&self, user: UserId) -> bool {
        self.sender_id == user
    }

    /// Total order key within a conversation.
    pub fn order_key(&self) -> (DateTime<Utc>, MessageId) {
        (self.created_at, self.id)
    }
}

/// A message that has not been assigned an id or timestamp yet.
#[derive(Debug, Clone, PartialEq)]
pub struct NewMessage {
    pub conversation_id: ConversationId,
    pub sender_id: UserId,
    pub content: String,
    pub kind: ContentKind,
    pub attachment: Option<String>,
}

/// Repository trait for Message data access operations.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MessageRepository: Send + Sync {
    /// Persist a message, assigning its id and creation timestamp.
    ///
    /// Ids and timestamps are monotonic within a conversation. Fails with
    /// `AppError::Conflict` when the other participant's account has been
    /// deactivated.
    async fn append(&self, message: NewMessage) -> Result<Message, AppError>;

    /// One page of a conversation's history in ascending order. Page 0 holds
    /// the oldest messages; an empty page marks the end.
    async fn list(
        &self,
        conversation_id: ConversationId,
        page: u32,
        page_size: u32,
    ) -> Result<Vec<Message>, AppError>;

    /// Mark every message in the conversation not sent by `reader` as read.
    /// Returns the number of messages that changed.
    async fn mark_read(
        &self,
        conversation_id: ConversationId,
        reader: UserId,
    ) -> Result<u64, AppError>;
}
