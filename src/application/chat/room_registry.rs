//! Room Registry
//!
//! Maps each conversation to the connections currently viewing it. A room is
//! created the first time someone joins and outlives every leave; only the
//! transient membership changes.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use dashmap::DashMap;
use uuid::Uuid;

use super::connection::Connection;
use super::error::ChatError;
use super::events::JoinAck;
use super::unread_tracker::UnreadTracker;
use crate::domain::{ConversationId, ConversationRepository, Participants, UserId};

/// One conversation's room.
#[derive(Debug)]
pub struct Room {
    participants: Participants,
    /// user -> id of the connection that joined
    members: HashMap<UserId, Uuid>,
}

impl Room {
    fn new(participants: Participants) -> Self {
        Self {
            participants,
            members: HashMap::new(),
        }
    }

    pub fn participants(&self) -> &Participants {
        &self.participants
    }

    pub fn has_member(&self, user: UserId) -> bool {
        self.members.contains_key(&user)
    }

    pub fn member_connection(&self, user: UserId) -> Option<Uuid> {
        self.members.get(&user).copied()
    }

    pub fn members(&self) -> impl Iterator<Item = (UserId, Uuid)> + '_ {
        self.members.iter().map(|(user, conn)| (*user, *conn))
    }

    /// Drop a membership whose connection can no longer receive events.
    pub(crate) fn evict(&mut self, user: UserId, connection_id: Uuid) -> bool {
        if self.members.get(&user) == Some(&connection_id) {
            self.members.remove(&user);
            true
        } else {
            false
        }
    }
}

/// Registry of all rooms.
pub struct RoomRegistry {
    rooms: DashMap<ConversationId, Room>,
    conversations: Arc<dyn ConversationRepository>,
    unread: Arc<UnreadTracker>,
}

impl RoomRegistry {
    pub fn new(conversations: Arc<dyn ConversationRepository>, unread: Arc<UnreadTracker>) -> Self {
        Self {
            rooms: DashMap::new(),
            conversations,
            unread,
        }
    }

    /// Fixed participants of a conversation. Served from the room once one
    /// exists; before the first successful join every call asks the repository.
    pub async fn participants(&self, conversation_id: ConversationId) -> Result<Participants, ChatError> {
        if let Some(room) = self.rooms.get(&conversation_id) {
            return Ok(room.participants);
        }

        let conversation = self
            .conversations
            .find_by_id(conversation_id)
            .await
            .map_err(|e| ChatError::Persistence(e.to_string()))?
            .ok_or(ChatError::ConversationNotFound)?;

        Ok(conversation.participants)
    }

    /// Attach `connection` to the conversation's room.
    ///
    /// Only the two participants may join. Every successful join, including a
    /// repeat join, resets the viewer's unread counter; the reset happens under
    /// the room lock so it orders cleanly against concurrent deliveries.
    pub async fn join(
        &self,
        connection: &Connection,
        conversation_id: ConversationId,
    ) -> Result<JoinAck, ChatError> {
        let user = connection.user_id();
        let participants = self.participants(conversation_id).await?;

        if !participants.contains(user) {
            tracing::warn!(
                user_id = %user,
                conversation_id = %conversation_id,
                "Join rejected for non-participant"
            );
            return Err(ChatError::NotAuthorized);
        }

        let (already_joined, previous_unread) = connection.with_room_added(conversation_id, || {
            let mut room = self
                .rooms
                .entry(conversation_id)
                .or_insert_with(|| Room::new(participants));
            let previous = room.members.insert(user, connection.id());
            let previous_unread = self.unread.reset(conversation_id, user);
            (previous == Some(connection.id()), previous_unread)
        })?;

        tracing::debug!(
            user_id = %user,
            conversation_id = %conversation_id,
            connection_id = %connection.id(),
            already_joined,
            previous_unread,
            "Joined room"
        );

        Ok(JoinAck {
            conversation_id,
            previous_unread,
            already_joined,
        })
    }

    /// Detach `connection` from the room. Returns whether it was a member.
    pub fn leave(&self, connection: &Connection, conversation_id: ConversationId) -> bool {
        connection.with_room_removed(conversation_id, || {
            self.remove_member(conversation_id, connection.user_id(), connection.id())
        })
    }

    /// Remove `user` from the room if the membership belongs to `connection_id`.
    pub(crate) fn remove_member(
        &self,
        conversation_id: ConversationId,
        user: UserId,
        connection_id: Uuid,
    ) -> bool {
        match self.rooms.get_mut(&conversation_id) {
            Some(mut room) => room.evict(user, connection_id),
            None => false,
        }
    }

    /// Release `connection_id`'s slot during teardown.
    ///
    /// Returns `false` only when a newer connection of the same principal
    /// holds the slot; a slot already evicted by a failed delivery counts as
    /// released.
    pub(crate) fn release_member(
        &self,
        conversation_id: ConversationId,
        user: UserId,
        connection_id: Uuid,
    ) -> bool {
        match self.rooms.get_mut(&conversation_id) {
            Some(mut room) => match room.member_connection(user) {
                Some(current) if current != connection_id => false,
                Some(_) => room.evict(user, connection_id),
                None => true,
            },
            None => true,
        }
    }

    /// Principals currently joined to the conversation.
    pub fn members_of(&self, conversation_id: ConversationId) -> HashSet<UserId> {
        self.rooms
            .get(&conversation_id)
            .map(|room| room.members.keys().copied().collect())
            .unwrap_or_default()
    }

    /// (principal, connection id) pairs currently joined to the conversation.
    pub fn member_connections(&self, conversation_id: ConversationId) -> Vec<(UserId, Uuid)> {
        self.rooms
            .get(&conversation_id)
            .map(|room| room.members().collect())
            .unwrap_or_default()
    }

    /// Whether this exact connection is joined to the conversation.
    pub fn is_member(&self, conversation_id: ConversationId, connection: &Connection) -> bool {
        self.rooms
            .get(&conversation_id)
            .map(|room| room.member_connection(connection.user_id()) == Some(connection.id()))
            .unwrap_or(false)
    }

    /// Cached participants, without touching the repository.
    pub fn cached_participants(&self, conversation_id: ConversationId) -> Option<Participants> {
        self.rooms.get(&conversation_id).map(|room| room.participants)
    }

    /// Run `f` with the room locked against joins and leaves.
    pub(crate) fn with_room<R>(
        &self,
        conversation_id: ConversationId,
        f: impl FnOnce(&mut Room) -> R,
    ) -> Option<R> {
        self.rooms
            .get_mut(&conversation_id)
            .map(|mut room| f(&mut room))
    }

    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }
}
