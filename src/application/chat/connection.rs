//! A single authenticated connection.
//!
//! The transport side owns the receiving half of the outbound queue; the chat
//! core only ever pushes into it with `try_send`, so a stalled socket can
//! never block a conversation's sequencing point.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{mpsc, Notify};
use tokio::time::Instant;
use uuid::Uuid;

use super::error::ChatError;
use super::events::{CloseReason, ServerEvent};
use crate::domain::{ConversationId, Principal, UserId};

/// Joined rooms plus the teardown flag, guarded together so a join can never
/// slip in behind a teardown.
#[derive(Debug, Default)]
struct RoomSet {
    rooms: Vec<ConversationId>,
    torn_down: bool,
}

/// Live connection of one principal.
#[derive(Debug)]
pub struct Connection {
    id: Uuid,
    principal: Principal,
    outbound: mpsc::Sender<ServerEvent>,
    rooms: Mutex<RoomSet>,
    last_seen: Mutex<Instant>,
    closed: AtomicBool,
    close_reason: Mutex<Option<CloseReason>>,
    close_notify: Notify,
}

impl Connection {
    /// Create a connection with a bounded outbound queue of `capacity` events.
    pub fn new(principal: Principal, capacity: usize) -> (Arc<Self>, mpsc::Receiver<ServerEvent>) {
        let (outbound, rx) = mpsc::channel(capacity.max(1));
        let connection = Arc::new(Self {
            id: Uuid::new_v4(),
            principal,
            outbound,
            rooms: Mutex::new(RoomSet::default()),
            last_seen: Mutex::new(Instant::now()),
            closed: AtomicBool::new(false),
            close_reason: Mutex::new(None),
            close_notify: Notify::new(),
        });
        (connection, rx)
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn principal(&self) -> &Principal {
        &self.principal
    }

    pub fn user_id(&self) -> UserId {
        self.principal.id
    }

    /// Queue an event without waiting.
    ///
    /// A full queue means the consumer is too slow: the connection is closed
    /// with [`CloseReason::SlowConsumer`] and the event is dropped.
    pub fn deliver(&self, event: ServerEvent) -> Result<(), ChatError> {
        if self.is_closed() {
            return Err(ChatError::Transport("connection closed".into()));
        }
        match self.outbound.try_send(event) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(_)) => {
                self.close(CloseReason::SlowConsumer);
                Err(ChatError::Transport("outbound queue full".into()))
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                self.close(CloseReason::TransportError);
                Err(ChatError::Transport("transport closed".into()))
            }
        }
    }

    /// Record inbound traffic.
    pub fn touch(&self) {
        *self.last_seen.lock() = Instant::now();
    }

    pub fn idle_for(&self) -> Duration {
        self.last_seen.lock().elapsed()
    }

    /// Request the connection to close. Returns `true` for the first caller.
    pub fn close(&self, reason: CloseReason) -> bool {
        if self.closed.swap(true, Ordering::AcqRel) {
            return false;
        }
        *self.close_reason.lock() = Some(reason);
        self.close_notify.notify_waiters();
        true
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub fn close_reason(&self) -> Option<CloseReason> {
        *self.close_reason.lock()
    }

    /// Resolves once [`Connection::close`] has been called.
    pub async fn closed(&self) {
        loop {
            let notified = self.close_notify.notified();
            if self.is_closed() {
                return;
            }
            notified.await;
        }
    }

    /// Rooms this connection currently occupies, in join order.
    pub fn joined_rooms(&self) -> Vec<ConversationId> {
        self.rooms.lock().rooms.clone()
    }

    pub fn is_in_room(&self, conversation_id: ConversationId) -> bool {
        self.rooms.lock().rooms.contains(&conversation_id)
    }

    /// Record a room under the room-set lock, then run `register` while the
    /// lock is still held. Fails once teardown has started.
    pub(crate) fn with_room_added<R>(
        &self,
        conversation_id: ConversationId,
        register: impl FnOnce() -> R,
    ) -> Result<R, ChatError> {
        let mut set = self.rooms.lock();
        if set.torn_down {
            return Err(ChatError::Transport("connection closed".into()));
        }
        if !set.rooms.contains(&conversation_id) {
            set.rooms.push(conversation_id);
        }
        Ok(register())
    }

    /// Drop a room under the room-set lock, running `unregister` while held.
    pub(crate) fn with_room_removed<R>(
        &self,
        conversation_id: ConversationId,
        unregister: impl FnOnce() -> R,
    ) -> R {
        let mut set = self.rooms.lock();
        set.rooms.retain(|room| *room != conversation_id);
        unregister()
    }

    /// Mark the connection torn down and hand back every joined room.
    /// Returns `None` when teardown already ran.
    pub(crate) fn begin_teardown(&self) -> Option<Vec<ConversationId>> {
        let mut set = self.rooms.lock();
        if set.torn_down {
            return None;
        }
        set.torn_down = true;
        Some(std::mem::take(&mut set.rooms))
    }

    pub fn is_torn_down(&self) -> bool {
        self.rooms.lock().torn_down
    }
}

/// Latest connection per principal.
#[derive(Debug, Default)]
pub struct SessionTable {
    connections: dashmap::DashMap<UserId, Arc<Connection>>,
}

impl SessionTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install `connection` as the principal's live connection, returning the
    /// one it supersedes.
    pub fn insert(&self, connection: Arc<Connection>) -> Option<Arc<Connection>> {
        self.connections.insert(connection.user_id(), connection)
    }

    /// Remove `connection` only if it is still the principal's live one.
    pub fn remove_if_current(&self, connection: &Connection) -> bool {
        self.connections
            .remove_if(&connection.user_id(), |_, current| current.id() == connection.id())
            .is_some()
    }

    pub fn get(&self, user_id: UserId) -> Option<Arc<Connection>> {
        self.connections.get(&user_id).map(|c| Arc::clone(c.value()))
    }

    pub fn is_connected(&self, user_id: UserId) -> bool {
        self.connections.contains_key(&user_id)
    }

    /// Deliver to the principal's live connection, whichever it is.
    pub fn deliver_to_user(&self, user_id: UserId, event: ServerEvent) -> Result<(), ChatError> {
        match self.get(user_id) {
            Some(connection) => connection.deliver(event),
            None => Err(ChatError::Transport("principal not connected".into())),
        }
    }

    /// Deliver only if `connection_id` is still the principal's live connection.
    pub fn deliver_to_connection(
        &self,
        user_id: UserId,
        connection_id: Uuid,
        event: ServerEvent,
    ) -> Result<(), ChatError> {
        match self.get(user_id) {
            Some(connection) if connection.id() == connection_id => connection.deliver(event),
            _ => Err(ChatError::Transport("connection no longer live".into())),
        }
    }

    pub fn all(&self) -> Vec<Arc<Connection>> {
        self.connections.iter().map(|c| Arc::clone(c.value())).collect()
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }
}
