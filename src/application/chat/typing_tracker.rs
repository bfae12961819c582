//! Presence/Typing Tracker
//!
//! Short-lived "is typing" signals per (conversation, user). Each signal
//! expires on its own after the quiescence window, so a client that vanishes
//! mid-sentence can't leave a permanent indicator behind.
//!
//! Start and stop broadcasts for a key are emitted while that key's map entry
//! is locked, which keeps them causally ordered for every observer.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::time::Instant;

use super::connection::{Connection, SessionTable};
use super::events::ServerEvent;
use super::room_registry::RoomRegistry;
use crate::domain::{ConversationId, UserId};
use crate::infrastructure::metrics;

type TypingKey = (ConversationId, UserId);

#[derive(Debug, Clone, Copy)]
struct TypingEntry {
    generation: u64,
    expires_at: Instant,
}

/// Owner of all typing signals.
pub struct TypingTracker {
    entries: DashMap<TypingKey, TypingEntry>,
    rooms: Arc<RoomRegistry>,
    sessions: Arc<SessionTable>,
    expiry: Duration,
    generations: AtomicU64,
}

impl TypingTracker {
    pub fn new(rooms: Arc<RoomRegistry>, sessions: Arc<SessionTable>, expiry: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            rooms,
            sessions,
            expiry,
            generations: AtomicU64::new(0),
        }
    }

    pub fn expiry(&self) -> Duration {
        self.expiry
    }

    /// Apply a typing signal from `connection`.
    ///
    /// Ignored unless the connection is joined to the conversation. Returns
    /// whether other members were notified.
    pub fn set_typing(
        self: &Arc<Self>,
        connection: &Connection,
        conversation_id: ConversationId,
        is_typing: bool,
    ) -> bool {
        if !self.rooms.is_member(conversation_id, connection) {
            tracing::debug!(
                user_id = %connection.user_id(),
                conversation_id = %conversation_id,
                "Typing signal ignored for non-member"
            );
            return false;
        }

        if is_typing {
            self.start(conversation_id, connection.user_id())
        } else {
            self.clear(conversation_id, connection.user_id())
        }
    }

    /// Whether `user` currently shows as typing.
    pub fn is_typing(&self, conversation_id: ConversationId, user: UserId) -> bool {
        self.entries.contains_key(&(conversation_id, user))
    }

    /// Users currently typing in a conversation.
    pub fn typing_users(&self, conversation_id: ConversationId) -> Vec<UserId> {
        let mut users: Vec<UserId> = self
            .entries
            .iter()
            .filter(|entry| entry.key().0 == conversation_id)
            .map(|entry| entry.key().1)
            .collect();
        users.sort();
        users
    }

    fn start(self: &Arc<Self>, conversation_id: ConversationId, user: UserId) -> bool {
        let key = (conversation_id, user);
        let expires_at = Instant::now() + self.expiry;

        match self.entries.entry(key) {
            Entry::Occupied(mut occupied) => {
                // Debounce: refresh the deadline, no new broadcast.
                occupied.get_mut().expires_at = expires_at;
                false
            }
            Entry::Vacant(vacant) => {
                let generation = self.generations.fetch_add(1, Ordering::Relaxed);
                let entry = vacant.insert(TypingEntry {
                    generation,
                    expires_at,
                });
                self.broadcast(conversation_id, user, true);
                drop(entry);

                let tracker = Arc::clone(self);
                tokio::spawn(async move {
                    tracker.expire_when_quiet(key, generation).await;
                });
                true
            }
        }
    }

    /// Clear a signal and broadcast its removal. Returns whether one existed.
    pub fn clear(&self, conversation_id: ConversationId, user: UserId) -> bool {
        match self.entries.entry((conversation_id, user)) {
            Entry::Occupied(occupied) => {
                self.broadcast(conversation_id, user, false);
                occupied.remove();
                true
            }
            Entry::Vacant(_) => false,
        }
    }

    async fn expire_when_quiet(&self, key: TypingKey, generation: u64) {
        loop {
            let deadline = match self.entries.get(&key) {
                Some(entry) if entry.generation == generation => entry.expires_at,
                _ => return,
            };

            tokio::time::sleep_until(deadline).await;

            if let Entry::Occupied(occupied) = self.entries.entry(key) {
                let entry = *occupied.get();
                if entry.generation != generation {
                    return;
                }
                if entry.expires_at <= Instant::now() {
                    tracing::debug!(
                        conversation_id = %key.0,
                        user_id = %key.1,
                        "Typing signal expired"
                    );
                    self.broadcast(key.0, key.1, false);
                    occupied.remove();
                    return;
                }
                // Refreshed while we slept; wait for the new deadline.
            } else {
                return;
            }
        }
    }

    fn broadcast(&self, conversation_id: ConversationId, user: UserId, is_typing: bool) {
        let event = ServerEvent::typing(conversation_id, user, is_typing);
        for (member, connection_id) in self.rooms.member_connections(conversation_id) {
            if member == user {
                continue;
            }
            if let Err(e) = self
                .sessions
                .deliver_to_connection(member, connection_id, event.clone())
            {
                tracing::debug!(
                    conversation_id = %conversation_id,
                    recipient = %member,
                    error = %e,
                    "Typing delivery failed"
                );
            }
        }
        metrics::record_typing_broadcast(is_typing);
    }
}
