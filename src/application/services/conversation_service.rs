//! Conversation Service
//!
//! Opening conversations, listing a principal's inbox, and paging history.

use std::sync::Arc;

use async_trait::async_trait;

use crate::config::ChatSettings;
use crate::domain::{
    Conversation, ConversationId, ConversationKind, ConversationRepository, Message,
    MessageRepository, Participants, Principal, RelatedEntity, UserDirectory, UserId, UserRole,
};
use crate::shared::error::AppError;

/// Conversation service trait
#[async_trait]
pub trait ConversationService: Send + Sync {
    /// Create or fetch the conversation between `principal` and `counterpart_id`.
    async fn open_conversation(
        &self,
        principal: &Principal,
        counterpart_id: UserId,
        kind: ConversationKind,
        related: Option<RelatedEntity>,
    ) -> Result<Conversation, ConversationError>;

    /// Conversations the principal participates in, most recent first.
    async fn list_conversations(
        &self,
        principal: &Principal,
    ) -> Result<Vec<Conversation>, ConversationError>;

    /// One page of history in ascending order.
    async fn load_history(
        &self,
        principal: &Principal,
        conversation_id: ConversationId,
        page: u32,
        page_size: Option<u32>,
    ) -> Result<Vec<Message>, ConversationError>;
}

/// Conversation service errors
#[derive(Debug, thiserror::Error)]
pub enum ConversationError {
    #[error("Conversation not found")]
    NotFound,

    #[error("Not a participant of this conversation")]
    NotParticipant,

    #[error("Counterpart not found")]
    CounterpartNotFound,

    #[error("Counterpart account is deactivated")]
    CounterpartInactive,

    #[error("Cannot open a conversation with yourself")]
    SelfConversation,

    #[error("Roles {initiator} and {counterpart} cannot form a {kind} conversation")]
    RoleMismatch {
        initiator: UserRole,
        counterpart: UserRole,
        kind: &'static str,
    },

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ConversationError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotFound => "conversation_not_found",
            Self::NotParticipant => "not_authorized",
            Self::CounterpartNotFound => "counterpart_not_found",
            Self::CounterpartInactive => "counterpart_inactive",
            Self::SelfConversation => "self_conversation",
            Self::RoleMismatch { .. } => "role_mismatch",
            Self::Internal(_) => "internal_error",
        }
    }
}

impl From<AppError> for ConversationError {
    fn from(err: AppError) -> Self {
        match err {
            AppError::NotFound(_) => Self::NotFound,
            other => Self::Internal(other.to_string()),
        }
    }
}

/// ConversationService implementation
pub struct ConversationServiceImpl {
    conversations: Arc<dyn ConversationRepository>,
    messages: Arc<dyn MessageRepository>,
    directory: Arc<dyn UserDirectory>,
    settings: ChatSettings,
}

impl ConversationServiceImpl {
    pub fn new(
        conversations: Arc<dyn ConversationRepository>,
        messages: Arc<dyn MessageRepository>,
        directory: Arc<dyn UserDirectory>,
        settings: ChatSettings,
    ) -> Self {
        Self {
            conversations,
            messages,
            directory,
            settings,
        }
    }

    /// Order the pair as (buyer, counterpart), checking roles against `kind`.
    fn arrange(
        principal: &Principal,
        counterpart: &Principal,
        kind: ConversationKind,
    ) -> Result<Participants, ConversationError> {
        if kind.admits(principal.role, counterpart.role) {
            Ok(Participants::new(principal.id, counterpart.id))
        } else if kind.admits(counterpart.role, principal.role) {
            Ok(Participants::new(counterpart.id, principal.id))
        } else {
            Err(ConversationError::RoleMismatch {
                initiator: principal.role,
                counterpart: counterpart.role,
                kind: kind.as_str(),
            })
        }
    }
}

#[async_trait]
impl ConversationService for ConversationServiceImpl {
    async fn open_conversation(
        &self,
        principal: &Principal,
        counterpart_id: UserId,
        kind: ConversationKind,
        related: Option<RelatedEntity>,
    ) -> Result<Conversation, ConversationError> {
        if counterpart_id == principal.id {
            return Err(ConversationError::SelfConversation);
        }

        let counterpart = self
            .directory
            .find_principal(counterpart_id)
            .await?
            .ok_or(ConversationError::CounterpartNotFound)?;
        let participants = Self::arrange(principal, &counterpart, kind)?;

        if !self.directory.is_active(counterpart_id).await? {
            return Err(ConversationError::CounterpartInactive);
        }

        let conversation = self
            .conversations
            .create_or_get(participants, kind, related)
            .await?;

        tracing::debug!(
            conversation_id = %conversation.id,
            user_id = %principal.id,
            counterpart_id = %counterpart_id,
            kind = kind.as_str(),
            "Conversation opened"
        );
        Ok(conversation)
    }

    async fn list_conversations(
        &self,
        principal: &Principal,
    ) -> Result<Vec<Conversation>, ConversationError> {
        Ok(self.conversations.list_for_principal(principal.id).await?)
    }

    async fn load_history(
        &self,
        principal: &Principal,
        conversation_id: ConversationId,
        page: u32,
        page_size: Option<u32>,
    ) -> Result<Vec<Message>, ConversationError> {
        let conversation = self
            .conversations
            .find_by_id(conversation_id)
            .await?
            .ok_or(ConversationError::NotFound)?;
        if !conversation.is_participant(principal.id) {
            return Err(ConversationError::NotParticipant);
        }

        let page_size = self.settings.page_size(page_size);
        Ok(self.messages.list(conversation_id, page, page_size).await?)
    }
}
