//! Real-time Chat Core
//!
//! Connection lifecycle, room membership, ordered message fan-out, typing
//! presence and unread bookkeeping for buyer/seller conversations.
//!
//! ## Components
//!
//! - **ConnectionManager**: handshake, heartbeats, supersession, cleanup cascade
//! - **RoomRegistry**: conversation rooms and their live members
//! - **MessageRouter**: persist-then-fan-out, serialized per conversation
//! - **TypingTracker**: self-expiring typing signals
//! - **UnreadTracker**: per-(conversation, viewer) unread counters
//!
//! [`ChatHub`] wires them together and is what the transport layer talks to.

mod connection;
mod connection_manager;
mod error;
mod events;
mod message_router;
mod room_registry;
mod typing_tracker;
mod unread_tracker;

pub use connection::{Connection, SessionTable};
pub use connection_manager::{ConnectionManager, Session};
pub use error::ChatError;
pub use events::{
    ClientCommand, CloseReason, CommandReply, ConnectionState, ConnectionStateChangedEvent,
    JoinAck, MessageDeliveredEvent, SendMessageCommand, ServerEvent, TypingChangedEvent,
    UnreadChangedEvent,
};
pub use message_router::{MessageRouter, OutgoingMessage};
pub use room_registry::{Room, RoomRegistry};
pub use typing_tracker::TypingTracker;
pub use unread_tracker::UnreadTracker;

use std::collections::HashSet;
use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::application::services::{Authenticator, Credentials};
use crate::config::{ChatSettings, WebSocketSettings};
use crate::domain::{ConversationId, ConversationRepository, Message, MessageRepository, UserId};

/// Entry point of the chat core for transports.
pub struct ChatHub {
    manager: ConnectionManager,
    rooms: Arc<RoomRegistry>,
    router: MessageRouter,
    typing: Arc<TypingTracker>,
    unread: Arc<UnreadTracker>,
    messages: Arc<dyn MessageRepository>,
}

impl ChatHub {
    pub fn new(
        authenticator: Arc<dyn Authenticator>,
        conversations: Arc<dyn ConversationRepository>,
        messages: Arc<dyn MessageRepository>,
        websocket: WebSocketSettings,
        chat: ChatSettings,
    ) -> Self {
        let sessions = Arc::new(SessionTable::new());
        let unread = Arc::new(UnreadTracker::new());
        let rooms = Arc::new(RoomRegistry::new(Arc::clone(&conversations), Arc::clone(&unread)));
        let typing = Arc::new(TypingTracker::new(
            Arc::clone(&rooms),
            Arc::clone(&sessions),
            chat.typing_expiry(),
        ));
        let router = MessageRouter::new(
            Arc::clone(&messages),
            conversations,
            Arc::clone(&rooms),
            Arc::clone(&sessions),
            Arc::clone(&unread),
            chat,
        );
        let manager = ConnectionManager::new(
            authenticator,
            sessions,
            Arc::clone(&rooms),
            Arc::clone(&typing),
            Arc::clone(&unread),
            websocket,
        );

        Self {
            manager,
            rooms,
            router,
            typing,
            unread,
            messages,
        }
    }

    pub async fn connect(&self, credentials: &Credentials) -> Result<Session, ChatError> {
        self.manager.connect(credentials).await
    }

    pub fn disconnect(&self, connection: &Connection, reason: CloseReason) {
        self.manager.disconnect(connection, reason);
    }

    pub fn heartbeat(&self, connection: &Connection) {
        self.manager.heartbeat(connection);
    }

    /// Join a conversation room, resetting the viewer's unread counter.
    ///
    /// Stored messages from the other participant are then marked read; that
    /// step is best effort and never fails the join.
    pub async fn join(
        &self,
        connection: &Connection,
        conversation_id: ConversationId,
    ) -> Result<JoinAck, ChatError> {
        let ack = self.rooms.join(connection, conversation_id).await?;

        match self.messages.mark_read(conversation_id, connection.user_id()).await {
            Ok(0) => {}
            Ok(marked) => tracing::debug!(
                conversation_id = %conversation_id,
                user_id = %connection.user_id(),
                marked,
                "Messages marked read"
            ),
            Err(e) => tracing::warn!(
                conversation_id = %conversation_id,
                user_id = %connection.user_id(),
                error = %e,
                "Failed to mark messages read"
            ),
        }
        Ok(ack)
    }

    /// Leave a room. Any typing signal the principal had there is cleared.
    pub fn leave(&self, connection: &Connection, conversation_id: ConversationId) -> bool {
        let left = self.rooms.leave(connection, conversation_id);
        if left {
            self.typing.clear(conversation_id, connection.user_id());
        }
        left
    }

    pub async fn send(
        &self,
        connection: &Connection,
        message: OutgoingMessage,
    ) -> Result<Message, ChatError> {
        self.router.send(connection, message).await
    }

    pub fn set_typing(
        &self,
        connection: &Connection,
        conversation_id: ConversationId,
        is_typing: bool,
    ) -> bool {
        self.typing.set_typing(connection, conversation_id, is_typing)
    }

    pub fn members_of(&self, conversation_id: ConversationId) -> HashSet<UserId> {
        self.rooms.members_of(conversation_id)
    }

    pub fn unread_count(&self, conversation_id: ConversationId, viewer: UserId) -> u32 {
        self.unread.count(conversation_id, viewer)
    }

    pub fn is_typing(&self, conversation_id: ConversationId, user: UserId) -> bool {
        self.typing.is_typing(conversation_id, user)
    }

    pub fn connection_count(&self) -> usize {
        self.manager.connection_count()
    }

    /// Conversations with a room materialized in memory.
    pub fn room_count(&self) -> usize {
        self.rooms.room_count()
    }

    pub fn reap_stale(&self) -> usize {
        self.manager.reap_stale()
    }

    pub fn shutdown(&self) -> usize {
        self.manager.shutdown()
    }

    /// Periodically time out silent connections.
    pub fn spawn_reaper(self: &Arc<Self>) -> JoinHandle<()> {
        let hub = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(hub.manager.heartbeat_interval());
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let reaped = hub.reap_stale();
                if reaped > 0 {
                    tracing::debug!(reaped, "Reaped stale connections");
                }
            }
        })
    }
}
