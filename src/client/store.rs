use std::collections::{HashMap, HashSet};
use std::time::Duration;

use tokio::time::Instant;
use uuid::Uuid;

use super::backoff::ReconnectBackoff;
use crate::application::chat::{
    ClientCommand, CloseReason, CommandReply, ConnectionState, ConnectionStateChangedEvent,
    MessageDeliveredEvent, SendMessageCommand, ServerEvent, TypingChangedEvent,
    UnreadChangedEvent,
};
use crate::domain::{
    summarize, ContentKind, Conversation, ConversationId, Message, MessageId, UserId,
};

/// History loading progress of one conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LoadState {
    #[default]
    NotLoaded,
    Loading,
    Loaded,
}

/// A send shown locally before the server confirmed it.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingMessage {
    pub nonce: String,
    pub conversation_id: ConversationId,
    pub content: String,
    pub kind: ContentKind,
    pub attachment: Option<String>,
}

#[derive(Debug, Default)]
struct Thread {
    load: LoadState,
    messages: Vec<Message>,
    seen: HashSet<MessageId>,
    pending: Vec<PendingMessage>,
    typing: HashMap<UserId, Instant>,
    unread: u32,
}

impl Thread {
    /// Insert keeping `(created_at, id)` order. Duplicates are dropped.
    fn insert(&mut self, message: Message) -> bool {
        if !self.seen.insert(message.id) {
            return false;
        }
        let key = message.order_key();
        let at = self.messages.partition_point(|m| m.order_key() <= key);
        self.messages.insert(at, message);
        true
    }
}

/// Local view of a principal's chats, rebuilt from server events.
#[derive(Debug)]
pub struct ClientStore {
    me: UserId,
    state: ConnectionState,
    conversations: Vec<Conversation>,
    threads: HashMap<ConversationId, Thread>,
    /// Rooms to occupy, in join order. Survives transport drops.
    joined: Vec<ConversationId>,
    typing_expiry: Duration,
    backoff: ReconnectBackoff,
}

impl ClientStore {
    pub fn new(me: UserId, typing_expiry: Duration) -> Self {
        Self {
            me,
            state: ConnectionState::Disconnected,
            conversations: Vec::new(),
            threads: HashMap::new(),
            joined: Vec::new(),
            typing_expiry,
            backoff: ReconnectBackoff::default(),
        }
    }

    pub fn with_backoff(mut self, backoff: ReconnectBackoff) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn me(&self) -> UserId {
        self.me
    }

    /// Whether `message` was sent by the local principal.
    pub fn is_mine(&self, message: &Message) -> bool {
        message.is_from(self.me)
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.state
    }

    /// Record a transport state change.
    ///
    /// Entering `Connected` returns a `Join` for every previously joined
    /// conversation, in join order, since server-side membership does not
    /// outlive a connection.
    pub fn connection_state_changed(&mut self, next: ConnectionState) -> Vec<ClientCommand> {
        let previous = std::mem::replace(&mut self.state, next);
        if previous != next {
            tracing::debug!(?previous, ?next, "Connection state changed");
        }

        match next {
            ConnectionState::Connected => {
                self.backoff.reset();
                if previous == ConnectionState::Connected {
                    return Vec::new();
                }
                self.joined
                    .iter()
                    .map(|&conversation_id| ClientCommand::Join { conversation_id })
                    .collect()
            }
            ConnectionState::Connecting => Vec::new(),
            ConnectionState::Reconnecting | ConnectionState::Disconnected => {
                // Nobody's typing can be trusted across a gap.
                for thread in self.threads.values_mut() {
                    thread.typing.clear();
                }
                Vec::new()
            }
        }
    }

    /// Delay before the next reconnect attempt.
    pub fn next_reconnect_delay(&mut self) -> Duration {
        self.backoff.next_delay()
    }

    /// Join a conversation and request its first history page if needed.
    pub fn open(&mut self, conversation_id: ConversationId) -> Vec<ClientCommand> {
        let mut commands = vec![self.join(conversation_id)];
        if self.load_state(conversation_id) == LoadState::NotLoaded {
            commands.push(self.load_history(conversation_id, 0));
        }
        commands
    }

    pub fn join(&mut self, conversation_id: ConversationId) -> ClientCommand {
        if !self.joined.contains(&conversation_id) {
            self.joined.push(conversation_id);
        }
        ClientCommand::Join { conversation_id }
    }

    pub fn leave(&mut self, conversation_id: ConversationId) -> Option<ClientCommand> {
        let position = self.joined.iter().position(|&c| c == conversation_id)?;
        self.joined.remove(position);
        if let Some(thread) = self.threads.get_mut(&conversation_id) {
            thread.typing.clear();
        }
        Some(ClientCommand::Leave { conversation_id })
    }

    pub fn load_history(&mut self, conversation_id: ConversationId, page: u32) -> ClientCommand {
        let thread = self.threads.entry(conversation_id).or_default();
        if thread.load == LoadState::NotLoaded {
            thread.load = LoadState::Loading;
        }
        ClientCommand::LoadHistory {
            conversation_id,
            page,
            page_size: None,
        }
    }

    /// Queue an optimistic send. The entry is shown as pending until the
    /// server confirms or rejects it.
    pub fn send(
        &mut self,
        conversation_id: ConversationId,
        content: impl Into<String>,
        kind: ContentKind,
        attachment: Option<String>,
    ) -> ClientCommand {
        let pending = PendingMessage {
            nonce: Uuid::new_v4().simple().to_string(),
            conversation_id,
            content: content.into(),
            kind,
            attachment,
        };
        let command = ClientCommand::Send(SendMessageCommand {
            conversation_id,
            content: pending.content.clone(),
            kind,
            attachment: pending.attachment.clone(),
            client_nonce: Some(pending.nonce.clone()),
        });
        self.threads.entry(conversation_id).or_default().pending.push(pending);
        command
    }

    pub fn send_text(
        &mut self,
        conversation_id: ConversationId,
        content: impl Into<String>,
    ) -> ClientCommand {
        self.send(conversation_id, content, ContentKind::Text, None)
    }

    /// Typing is only meaningful inside a joined room.
    pub fn set_typing(
        &self,
        conversation_id: ConversationId,
        is_typing: bool,
    ) -> Option<ClientCommand> {
        self.is_joined(conversation_id).then_some(ClientCommand::SetTyping {
            conversation_id,
            is_typing,
        })
    }

    /// Apply a server-pushed event. Returns commands the event makes necessary.
    pub fn apply(&mut self, event: &ServerEvent) -> Vec<ClientCommand> {
        match event {
            ServerEvent::MessageDelivered(e) => {
                self.on_message_delivered(e);
                Vec::new()
            }
            ServerEvent::TypingChanged(e) => {
                self.on_typing_changed(e);
                Vec::new()
            }
            ServerEvent::UnreadChanged(e) => {
                self.on_unread_changed(e);
                Vec::new()
            }
            ServerEvent::ConnectionStateChanged(e) => self.on_connection_state_changed(e),
        }
    }

    /// Apply the server's reply to one of our commands.
    pub fn apply_reply(&mut self, reply: &CommandReply) {
        match reply {
            CommandReply::Joined(ack) => {
                if !self.joined.contains(&ack.conversation_id) {
                    self.joined.push(ack.conversation_id);
                }
                self.threads.entry(ack.conversation_id).or_default().unread = 0;
            }
            CommandReply::Left { conversation_id } => {
                self.joined.retain(|c| c != conversation_id);
            }
            CommandReply::Sent {
                message,
                client_nonce,
            } => {
                if let Some(nonce) = client_nonce {
                    self.take_pending(message.conversation_id, nonce);
                }
                self.record_message(message.clone());
            }
            CommandReply::TypingAccepted { .. } => {}
            CommandReply::History {
                conversation_id,
                messages,
                ..
            } => {
                let thread = self.threads.entry(*conversation_id).or_default();
                for message in messages {
                    thread.insert(message.clone());
                }
                thread.load = LoadState::Loaded;
            }
            CommandReply::Conversation(conversation) => self.upsert_conversation(conversation.clone()),
            CommandReply::Conversations(list) => {
                self.conversations = list.clone();
                self.sort_conversations();
            }
            CommandReply::Rejected {
                command,
                code,
                client_nonce,
                ..
            } => {
                tracing::debug!(command = %command, code = %code, "Command rejected");
                if let Some(nonce) = client_nonce {
                    if let Some(rolled_back) = self.rollback(nonce) {
                        tracing::debug!(
                            conversation_id = %rolled_back.conversation_id,
                            nonce = %rolled_back.nonce,
                            "Optimistic send rolled back"
                        );
                    }
                }
            }
        }
    }

    /// Drop a pending send by nonce, wherever it lives.
    pub fn rollback(&mut self, nonce: &str) -> Option<PendingMessage> {
        let conversation_id = self
            .threads
            .iter()
            .find(|(_, t)| t.pending.iter().any(|p| p.nonce == nonce))
            .map(|(id, _)| *id)?;
        self.take_pending(conversation_id, nonce)
    }

    /// Remove typing entries whose local expiry has passed.
    pub fn prune_typing(&mut self) -> usize {
        let now = Instant::now();
        let mut removed = 0;
        for thread in self.threads.values_mut() {
            let before = thread.typing.len();
            thread.typing.retain(|_, expires| *expires > now);
            removed += before - thread.typing.len();
        }
        removed
    }

    /// Users currently shown as typing, sorted by id.
    pub fn typing(&self, conversation_id: ConversationId) -> Vec<UserId> {
        let now = Instant::now();
        let mut users: Vec<UserId> = self
            .threads
            .get(&conversation_id)
            .map(|t| {
                t.typing
                    .iter()
                    .filter(|(_, expires)| **expires > now)
                    .map(|(user, _)| *user)
                    .collect()
            })
            .unwrap_or_default();
        users.sort();
        users
    }

    pub fn messages(&self, conversation_id: ConversationId) -> &[Message] {
        self.threads
            .get(&conversation_id)
            .map(|t| t.messages.as_slice())
            .unwrap_or(&[])
    }

    pub fn pending(&self, conversation_id: ConversationId) -> &[PendingMessage] {
        self.threads
            .get(&conversation_id)
            .map(|t| t.pending.as_slice())
            .unwrap_or(&[])
    }

    pub fn unread(&self, conversation_id: ConversationId) -> u32 {
        self.threads.get(&conversation_id).map_or(0, |t| t.unread)
    }

    pub fn total_unread(&self) -> u32 {
        self.threads.values().map(|t| t.unread).sum()
    }

    pub fn load_state(&self, conversation_id: ConversationId) -> LoadState {
        self.threads
            .get(&conversation_id)
            .map(|t| t.load)
            .unwrap_or_default()
    }

    pub fn is_joined(&self, conversation_id: ConversationId) -> bool {
        self.joined.contains(&conversation_id)
    }

    pub fn joined(&self) -> &[ConversationId] {
        &self.joined
    }

    /// Conversation list, most recent activity first.
    pub fn conversations(&self) -> &[Conversation] {
        &self.conversations
    }

    fn on_message_delivered(&mut self, event: &MessageDeliveredEvent) {
        let message = &event.message;
        if let Some(thread) = self.threads.get_mut(&message.conversation_id) {
            thread.typing.remove(&message.sender_id);
        }
        self.record_message(message.clone());
    }

    fn on_typing_changed(&mut self, event: &TypingChangedEvent) {
        if event.user_id == self.me {
            return;
        }
        let typing = &mut self.threads.entry(event.conversation_id).or_default().typing;
        if event.is_typing {
            typing.insert(event.user_id, Instant::now() + self.typing_expiry);
        } else {
            typing.remove(&event.user_id);
        }
    }

    fn on_unread_changed(&mut self, event: &UnreadChangedEvent) {
        self.threads.entry(event.conversation_id).or_default().unread = event.count;
    }

    fn on_connection_state_changed(
        &mut self,
        event: &ConnectionStateChangedEvent,
    ) -> Vec<ClientCommand> {
        let next = match (event.state, event.reason) {
            // Another session took over or we hung up ourselves.
            (
                ConnectionState::Disconnected,
                Some(CloseReason::Superseded | CloseReason::ClientClosed),
            ) => ConnectionState::Disconnected,
            (ConnectionState::Disconnected, _) => ConnectionState::Reconnecting,
            (state, _) => state,
        };
        self.connection_state_changed(next)
    }

    fn take_pending(
        &mut self,
        conversation_id: ConversationId,
        nonce: &str,
    ) -> Option<PendingMessage> {
        let thread = self.threads.get_mut(&conversation_id)?;
        let position = thread.pending.iter().position(|p| p.nonce == nonce)?;
        Some(thread.pending.remove(position))
    }

    fn record_message(&mut self, message: Message) {
        let conversation_id = message.conversation_id;
        let created_at = message.created_at;
        let summary = summarize(&message.content);

        if !self.threads.entry(conversation_id).or_default().insert(message) {
            return;
        }

        if let Some(conversation) = self.conversations.iter_mut().find(|c| c.id == conversation_id) {
            if created_at >= conversation.last_activity_at {
                conversation.last_activity_at = created_at;
                conversation.last_message = Some(summary);
            }
            self.sort_conversations();
        }
    }

    fn upsert_conversation(&mut self, conversation: Conversation) {
        match self.conversations.iter_mut().find(|c| c.id == conversation.id) {
            Some(existing) => *existing = conversation,
            None => self.conversations.push(conversation),
        }
        self.sort_conversations();
    }

    fn sort_conversations(&mut self) {
        self.conversations.sort_by(|a, b| {
            b.last_activity_at
                .cmp(&a.last_activity_at)
                .then_with(|| b.id.cmp(&a.id))
        });
    }
}
