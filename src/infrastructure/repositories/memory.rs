//! In-memory repositories.
//!
//! Backs the `memory` storage backend and the test suites. One store
//! implements every persistence trait so that appends can see account state
//! the same way the PostgreSQL implementation does.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;

use crate::domain::{
    Conversation, ConversationId, ConversationKind, ConversationRepository, Message, MessageId,
    MessageRepository, NewMessage, Participants, Principal, RelatedEntity, UserDirectory, UserId,
};
use crate::shared::error::AppError;
use crate::shared::snowflake::SnowflakeGenerator;

#[derive(Debug, Clone, Copy)]
struct Account {
    principal: Principal,
    active: bool,
}

#[derive(Debug, Default)]
struct State {
    accounts: HashMap<UserId, Account>,
    conversations: HashMap<ConversationId, Conversation>,
    messages: HashMap<ConversationId, Vec<Message>>,
}

pub struct InMemoryStore {
    state: RwLock<State>,
    ids: SnowflakeGenerator,
}

impl InMemoryStore {
    pub fn new(machine_id: u64, node_id: u64) -> Self {
        Self {
            state: RwLock::new(State::default()),
            ids: SnowflakeGenerator::new(machine_id, node_id),
        }
    }

    /// Add or replace an active account.
    pub fn register_user(&self, principal: Principal) {
        self.state.write().accounts.insert(
            principal.id,
            Account {
                principal,
                active: true,
            },
        );
    }

    /// Returns whether the account existed.
    pub fn deactivate_user(&self, id: UserId) -> bool {
        match self.state.write().accounts.get_mut(&id) {
            Some(account) => {
                account.active = false;
                true
            }
            None => false,
        }
    }

    pub fn message_count(&self, conversation_id: ConversationId) -> usize {
        self.state
            .read()
            .messages
            .get(&conversation_id)
            .map_or(0, Vec::len)
    }
}

#[async_trait]
impl UserDirectory for InMemoryStore {
    async fn find_principal(&self, id: UserId) -> Result<Option<Principal>, AppError> {
        Ok(self.state.read().accounts.get(&id).map(|a| a.principal))
    }

    async fn is_active(&self, id: UserId) -> Result<bool, AppError> {
        Ok(self.state.read().accounts.get(&id).is_some_and(|a| a.active))
    }
}

#[async_trait]
impl ConversationRepository for InMemoryStore {
    async fn create_or_get(
        &self,
        participants: Participants,
        kind: ConversationKind,
        related: Option<RelatedEntity>,
    ) -> Result<Conversation, AppError> {
        let mut state = self.state.write();
        if let Some(existing) = state.conversations.values().find(|c| {
            c.participants == participants && c.kind == kind && c.related == related
        }) {
            return Ok(existing.clone());
        }

        let now = Utc::now();
        let conversation = Conversation {
            id: ConversationId::new(self.ids.generate()),
            participants,
            kind,
            related,
            last_message: None,
            created_at: now,
            last_activity_at: now,
        };
        state.conversations.insert(conversation.id, conversation.clone());
        Ok(conversation)
    }

    async fn find_by_id(&self, id: ConversationId) -> Result<Option<Conversation>, AppError> {
        Ok(self.state.read().conversations.get(&id).cloned())
    }

    async fn list_for_principal(&self, user: UserId) -> Result<Vec<Conversation>, AppError> {
        let mut conversations: Vec<Conversation> = self
            .state
            .read()
            .conversations
            .values()
            .filter(|c| c.is_participant(user))
            .cloned()
            .collect();
        conversations.sort_by(|a, b| {
            b.last_activity_at
                .cmp(&a.last_activity_at)
                .then_with(|| b.id.cmp(&a.id))
        });
        Ok(conversations)
    }

    async fn record_activity(
        &self,
        id: ConversationId,
        at: DateTime<Utc>,
        summary: &str,
    ) -> Result<(), AppError> {
        let mut state = self.state.write();
        let conversation = state
            .conversations
            .get_mut(&id)
            .ok_or_else(|| AppError::NotFound(format!("Conversation {} not found", id)))?;
        conversation.last_activity_at = conversation.last_activity_at.max(at);
        conversation.last_message = Some(summary.to_string());
        Ok(())
    }
}

#[async_trait]
impl MessageRepository for InMemoryStore {
    async fn append(&self, message: NewMessage) -> Result<Message, AppError> {
        let mut state = self.state.write();

        let participants = state
            .conversations
            .get(&message.conversation_id)
            .map(|c| c.participants)
            .ok_or_else(|| {
                AppError::NotFound(format!("Conversation {} not found", message.conversation_id))
            })?;
        let recipient = participants.other(message.sender_id).ok_or_else(|| {
            AppError::Forbidden("Sender is not a participant of this conversation".into())
        })?;
        if !state.accounts.get(&recipient).is_some_and(|a| a.active) {
            return Err(AppError::Conflict("Recipient account is deactivated".into()));
        }

        let history = state.messages.entry(message.conversation_id).or_default();
        let floor = history.last().map(|m| m.created_at);
        let created_at = floor.map_or_else(Utc::now, |floor| Utc::now().max(floor));

        let stored = Message {
            id: MessageId::new(self.ids.generate()),
            conversation_id: message.conversation_id,
            sender_id: message.sender_id,
            content: message.content,
            kind: message.kind,
            attachment: message.attachment,
            created_at,
            read: false,
        };
        history.push(stored.clone());
        Ok(stored)
    }

    async fn list(
        &self,
        conversation_id: ConversationId,
        page: u32,
        page_size: u32,
    ) -> Result<Vec<Message>, AppError> {
        let page_size = page_size.max(1) as usize;
        let offset = page as usize * page_size;
        Ok(self
            .state
            .read()
            .messages
            .get(&conversation_id)
            .map(|history| history.iter().skip(offset).take(page_size).cloned().collect())
            .unwrap_or_default())
    }

    async fn mark_read(
        &self,
        conversation_id: ConversationId,
        reader: UserId,
    ) -> Result<u64, AppError> {
        let mut state = self.state.write();
        let Some(history) = state.messages.get_mut(&conversation_id) else {
            return Ok(0);
        };
        let mut marked = 0;
        for message in history.iter_mut().filter(|m| !m.is_from(reader) && !m.read) {
            message.read = true;
            marked += 1;
        }
        Ok(marked)
    }
}
