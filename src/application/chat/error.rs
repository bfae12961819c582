//! Chat core error taxonomy.

use crate::application::services::AuthError;
use crate::shared::error::AppError;

/// Errors surfaced by the real-time chat core.
#[derive(Debug, thiserror::Error)]
pub enum ChatError {
    /// Credentials rejected; no connection state was created.
    #[error("Authentication failed: {0}")]
    Auth(#[from] AuthError),

    /// Principal is not a participant of the conversation.
    #[error("Not a participant of this conversation")]
    NotAuthorized,

    /// Send or typing attempted without joining the room first.
    #[error("Not joined to this conversation")]
    NotJoined,

    #[error("Conversation not found")]
    ConversationNotFound,

    #[error("Invalid content: {0}")]
    InvalidContent(String),

    /// The message was not stored; nobody saw it.
    #[error("Persistence failure: {0}")]
    Persistence(String),

    /// Delivery to one recipient failed. Never surfaced to a sender.
    #[error("Transport failure: {0}")]
    Transport(String),

    #[error("Heartbeat timeout")]
    HeartbeatTimeout,
}

impl ChatError {
    /// Stable machine-readable code used on the wire.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Auth(_) => "auth_error",
            Self::NotAuthorized => "not_authorized",
            Self::NotJoined => "not_joined",
            Self::ConversationNotFound => "conversation_not_found",
            Self::InvalidContent(_) => "invalid_content",
            Self::Persistence(_) => "persistence_failure",
            Self::Transport(_) => "transport_failure",
            Self::HeartbeatTimeout => "heartbeat_timeout",
        }
    }

    /// Map a repository failure on the send path.
    pub fn persistence(err: AppError) -> Self {
        match err {
            AppError::Conflict(msg) => Self::Persistence(msg),
            AppError::Database(e) => Self::Persistence(format!("database error: {}", e)),
            other => Self::Persistence(other.to_string()),
        }
    }
}
