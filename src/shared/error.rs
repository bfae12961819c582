//! Persistence-layer error type.
//!
//! Repositories and the directory report failures as [`AppError`]. The chat
//! core folds these into `ChatError`, the conversation service into
//! `ConversationError`; neither leaks database detail to clients.

/// Error raised by repositories and other collaborators.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    /// Requested row does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// Caller is not allowed to touch the row
    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// Write refused because of current state, e.g. an inactive recipient
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Stored data could not be mapped back into the domain
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl AppError {
    /// Stable machine-readable code, used in logs and metric labels.
    pub fn code(&self) -> &'static str {
        match self {
            AppError::NotFound(_) => "not_found",
            AppError::Forbidden(_) => "forbidden",
            AppError::Conflict(_) => "conflict",
            AppError::Internal(_) => "internal",
            AppError::Database(_) => "database",
        }
    }

    /// Whether retrying the same call could succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            AppError::Database(
                sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_)
            )
        )
    }
}
