//! Message Router
//!
//! Persists a message, then fans it out to the conversation's room. Each
//! conversation has its own sequencing lock held across persist and fan-out,
//! so every joined member observes messages in persistence order while
//! unrelated conversations proceed in parallel.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::Mutex;

use super::connection::{Connection, SessionTable};
use super::error::ChatError;
use super::events::{SendMessageCommand, ServerEvent};
use super::room_registry::RoomRegistry;
use super::unread_tracker::UnreadTracker;
use crate::config::ChatSettings;
use crate::domain::{
    summarize, ContentKind, ConversationId, ConversationRepository, Message, MessageRepository,
    NewMessage, UserId,
};
use crate::infrastructure::metrics;

/// A message as submitted by a sender.
#[derive(Debug, Clone, PartialEq)]
pub struct OutgoingMessage {
    pub conversation_id: ConversationId,
    pub content: String,
    pub kind: ContentKind,
    pub attachment: Option<String>,
}

impl OutgoingMessage {
    pub fn text(conversation_id: ConversationId, content: impl Into<String>) -> Self {
        Self {
            conversation_id,
            content: content.into(),
            kind: ContentKind::Text,
            attachment: None,
        }
    }
}

impl From<SendMessageCommand> for OutgoingMessage {
    fn from(command: SendMessageCommand) -> Self {
        Self {
            conversation_id: command.conversation_id,
            content: command.content,
            kind: command.kind,
            attachment: command.attachment,
        }
    }
}

/// Outcome of fanning one message out to its room.
#[derive(Debug, Default)]
struct FanOut {
    delivered: usize,
    failed: usize,
    /// (absent participant, new unread count)
    unread: Option<(UserId, u32)>,
}

pub struct MessageRouter {
    messages: Arc<dyn MessageRepository>,
    conversations: Arc<dyn ConversationRepository>,
    rooms: Arc<RoomRegistry>,
    sessions: Arc<SessionTable>,
    unread: Arc<UnreadTracker>,
    sequencers: DashMap<ConversationId, Arc<Mutex<()>>>,
    settings: ChatSettings,
}

impl MessageRouter {
    pub fn new(
        messages: Arc<dyn MessageRepository>,
        conversations: Arc<dyn ConversationRepository>,
        rooms: Arc<RoomRegistry>,
        sessions: Arc<SessionTable>,
        unread: Arc<UnreadTracker>,
        settings: ChatSettings,
    ) -> Self {
        Self {
            messages,
            conversations,
            rooms,
            sessions,
            unread,
            sequencers: DashMap::new(),
            settings,
        }
    }

    /// Send a message from `connection`.
    ///
    /// The sender must have joined the room. Persistence failure rejects the
    /// send with nothing delivered; per-recipient delivery failures are logged
    /// and never reach the sender.
    pub async fn send(
        &self,
        connection: &Connection,
        outgoing: OutgoingMessage,
    ) -> Result<Message, ChatError> {
        let conversation_id = outgoing.conversation_id;
        let sender = connection.user_id();

        self.validate(&outgoing)?;

        if let Some(participants) = self.rooms.cached_participants(conversation_id) {
            if !participants.contains(sender) {
                return Err(ChatError::NotAuthorized);
            }
        }

        let sequencer = self.sequencer(conversation_id);
        let turn = sequencer.lock().await;

        // Checked after taking the turn: a leave that raced ahead wins.
        if !self.rooms.is_member(conversation_id, connection) {
            drop(turn);
            self.release_sequencer(conversation_id, sequencer);
            return Err(ChatError::NotJoined);
        }

        let result = self.persist_and_fan_out(sender, outgoing).await;

        drop(turn);
        self.release_sequencer(conversation_id, sequencer);
        result
    }

    async fn persist_and_fan_out(
        &self,
        sender: UserId,
        outgoing: OutgoingMessage,
    ) -> Result<Message, ChatError> {
        let conversation_id = outgoing.conversation_id;

        // 1. Persist: the repository assigns id and timestamp.
        let message = self
            .messages
            .append(NewMessage {
                conversation_id,
                sender_id: sender,
                content: outgoing.content,
                kind: outgoing.kind,
                attachment: outgoing.attachment,
            })
            .await
            .map_err(|e| {
                tracing::warn!(
                    conversation_id = %conversation_id,
                    sender_id = %sender,
                    code = e.code(),
                    transient = e.is_transient(),
                    error = %e,
                    "Message persistence failed"
                );
                metrics::record_message_rejected("persistence");
                ChatError::persistence(e)
            })?;

        if message.sender_id != sender || message.conversation_id != conversation_id {
            tracing::error!(
                message_id = %message.id,
                expected_sender = %sender,
                stored_sender = %message.sender_id,
                "Stored message identity does not match the sending connection"
            );
        }

        // 2. Conversation list bookkeeping. The message is already durable.
        if let Err(e) = self
            .conversations
            .record_activity(conversation_id, message.created_at, &summarize(&message.content))
            .await
        {
            tracing::warn!(
                conversation_id = %conversation_id,
                error = %e,
                "Failed to record conversation activity"
            );
        }

        // 3 + 4. Fan-out and unread bookkeeping, atomic against joins/leaves.
        // A member whose delivery fails has a closed connection: it is evicted
        // here so the message counts as unread for it.
        let fan_out = self
            .rooms
            .with_room(conversation_id, |room| {
                let mut outcome = FanOut::default();
                let event = ServerEvent::message_delivered(message.clone());
                let mut evicted = Vec::new();

                for (member, connection_id) in room.members() {
                    match self
                        .sessions
                        .deliver_to_connection(member, connection_id, event.clone())
                    {
                        Ok(()) => outcome.delivered += 1,
                        Err(e) => {
                            outcome.failed += 1;
                            evicted.push((member, connection_id));
                            tracing::warn!(
                                conversation_id = %conversation_id,
                                message_id = %message.id,
                                recipient = %member,
                                error = %e,
                                "Message delivery failed"
                            );
                        }
                    }
                }

                for (member, connection_id) in evicted {
                    if room.evict(member, connection_id) {
                        tracing::debug!(
                            conversation_id = %conversation_id,
                            user_id = %member,
                            connection_id = %connection_id,
                            "Evicted member with closed connection"
                        );
                    }
                }

                if let Some(other) = room.participants().other(sender) {
                    if !room.has_member(other) {
                        let count = self.unread.increment(conversation_id, other);
                        outcome.unread = Some((other, count));
                    }
                }
                outcome
            })
            .unwrap_or_default();

        metrics::record_message_routed(fan_out.delivered, fan_out.failed);

        if let Some((viewer, count)) = fan_out.unread {
            // Offline viewers pick the count up from the snapshot on connect.
            if self
                .sessions
                .deliver_to_user(viewer, ServerEvent::unread(conversation_id, count, count - 1))
                .is_ok()
            {
                tracing::trace!(viewer = %viewer, count, "Unread count pushed");
            }
        }

        tracing::debug!(
            conversation_id = %conversation_id,
            message_id = %message.id,
            delivered = fan_out.delivered,
            failed = fan_out.failed,
            "Message routed"
        );

        Ok(message)
    }

    fn validate(&self, outgoing: &OutgoingMessage) -> Result<(), ChatError> {
        let length = outgoing.content.chars().count();
        if length > self.settings.max_content_length {
            return Err(ChatError::InvalidContent(format!(
                "content exceeds {} characters",
                self.settings.max_content_length
            )));
        }
        match (outgoing.kind, outgoing.attachment.as_deref()) {
            (ContentKind::Text, _) if outgoing.content.trim().is_empty() => Err(
                ChatError::InvalidContent("text message must not be empty".into()),
            ),
            (kind, None) if kind.requires_attachment() => Err(ChatError::InvalidContent(
                format!("{} message requires an attachment", kind),
            )),
            (_, Some(attachment)) if attachment.trim().is_empty() => Err(
                ChatError::InvalidContent("attachment reference must not be blank".into()),
            ),
            _ => Ok(()),
        }
    }

    fn sequencer(&self, conversation_id: ConversationId) -> Arc<Mutex<()>> {
        Arc::clone(
            self.sequencers
                .entry(conversation_id)
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .value(),
        )
    }

    /// Drop the sequencing lock once nobody else holds or waits on it.
    fn release_sequencer(&self, conversation_id: ConversationId, sequencer: Arc<Mutex<()>>) {
        drop(sequencer);
        self.sequencers
            .remove_if(&conversation_id, |_, lock| Arc::strong_count(lock) == 1);
    }

    pub fn active_sequencers(&self) -> usize {
        self.sequencers.len()
    }
}
