//! Connection Manager
//!
//! Owns the lifecycle of authenticated connections: handshake, heartbeats,
//! supersession, and the cleanup cascade that runs when a connection ends.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use super::connection::{Connection, SessionTable};
use super::error::ChatError;
use super::events::{CloseReason, ConnectionState, ServerEvent};
use super::room_registry::RoomRegistry;
use super::typing_tracker::TypingTracker;
use super::unread_tracker::UnreadTracker;
use crate::application::services::{Authenticator, Credentials};
use crate::config::WebSocketSettings;
use crate::infrastructure::metrics;

/// A freshly established connection and the receiving half of its queue.
#[derive(Debug)]
pub struct Session {
    pub connection: Arc<Connection>,
    pub events: mpsc::Receiver<ServerEvent>,
}

pub struct ConnectionManager {
    authenticator: Arc<dyn Authenticator>,
    sessions: Arc<SessionTable>,
    rooms: Arc<RoomRegistry>,
    typing: Arc<TypingTracker>,
    unread: Arc<UnreadTracker>,
    settings: WebSocketSettings,
}

impl ConnectionManager {
    pub fn new(
        authenticator: Arc<dyn Authenticator>,
        sessions: Arc<SessionTable>,
        rooms: Arc<RoomRegistry>,
        typing: Arc<TypingTracker>,
        unread: Arc<UnreadTracker>,
        settings: WebSocketSettings,
    ) -> Self {
        Self {
            authenticator,
            sessions,
            rooms,
            typing,
            unread,
            settings,
        }
    }

    /// Authenticate and register a connection.
    ///
    /// Rejected credentials create no state. A successful connect supersedes
    /// any live connection of the same principal.
    pub async fn connect(&self, credentials: &Credentials) -> Result<Session, ChatError> {
        let principal = self.authenticator.authenticate(credentials).await.map_err(|e| {
            tracing::info!(error = %e, "Connection rejected");
            ChatError::Auth(e)
        })?;

        let (connection, events) =
            Connection::new(principal, self.settings.outbound_queue_capacity);

        if let Some(previous) = self.sessions.insert(Arc::clone(&connection)) {
            tracing::info!(
                user_id = %principal.id,
                connection_id = %previous.id(),
                superseded_by = %connection.id(),
                "Connection superseded"
            );
            self.close_and_teardown(&previous, CloseReason::Superseded);
        }

        let _ = connection.deliver(ServerEvent::connection_state(ConnectionState::Connected, None));
        for (conversation_id, count) in self.unread.counts_for(principal.id) {
            if count > 0 {
                let _ = connection.deliver(ServerEvent::unread(conversation_id, count, count));
            }
        }

        tracing::info!(
            user_id = %principal.id,
            role = %principal.role,
            connection_id = %connection.id(),
            "Connection established"
        );
        self.update_gauges();

        Ok(Session { connection, events })
    }

    /// Record liveness for `connection`.
    pub fn heartbeat(&self, connection: &Connection) {
        connection.touch();
    }

    /// End `connection` and run the cleanup cascade. Safe to call repeatedly.
    pub fn disconnect(&self, connection: &Connection, reason: CloseReason) {
        self.close_and_teardown(connection, reason);
    }

    /// Tear down closed connections and time out silent ones.
    ///
    /// Returns the number of connections removed.
    pub fn reap_stale(&self) -> usize {
        let timeout = self.settings.heartbeat_timeout();
        let mut reaped = 0;

        for connection in self.sessions.all() {
            if connection.is_closed() {
                let reason = connection.close_reason().unwrap_or(CloseReason::TransportError);
                self.close_and_teardown(&connection, reason);
                reaped += 1;
            } else if connection.idle_for() > timeout {
                tracing::info!(
                    user_id = %connection.user_id(),
                    connection_id = %connection.id(),
                    idle_ms = connection.idle_for().as_millis() as u64,
                    "Heartbeat timeout"
                );
                self.close_and_teardown(&connection, CloseReason::HeartbeatTimeout);
                reaped += 1;
            }
        }

        if reaped > 0 {
            self.update_gauges();
        }
        reaped
    }

    /// Close every live connection with `ServerShutdown`.
    pub fn shutdown(&self) -> usize {
        let connections = self.sessions.all();
        for connection in &connections {
            self.close_and_teardown(connection, CloseReason::ServerShutdown);
        }
        tracing::info!(closed = connections.len(), "Closed all connections for shutdown");
        connections.len()
    }

    pub fn heartbeat_interval(&self) -> Duration {
        self.settings.heartbeat_interval()
    }

    pub fn connection_count(&self) -> usize {
        self.sessions.len()
    }

    fn close_and_teardown(&self, connection: &Connection, reason: CloseReason) {
        if !connection.is_closed() && reason != CloseReason::ClientClosed {
            let _ = connection.deliver(ServerEvent::connection_state(
                ConnectionState::Disconnected,
                Some(reason),
            ));
        }
        if connection.close(reason) {
            metrics::record_connection_closed(reason.as_str());
        }
        self.teardown(connection);
    }

    /// Leave every room and clear typing as one unit. Runs at most once.
    fn teardown(&self, connection: &Connection) {
        let Some(rooms) = connection.begin_teardown() else {
            return;
        };
        let user = connection.user_id();
        self.sessions.remove_if_current(connection);

        for conversation_id in &rooms {
            // A newer connection of the same principal may own the membership.
            if self.rooms.release_member(*conversation_id, user, connection.id()) {
                self.typing.clear(*conversation_id, user);
            }
        }

        tracing::info!(
            user_id = %user,
            connection_id = %connection.id(),
            reason = connection.close_reason().map(|r| r.as_str()).unwrap_or("unknown"),
            rooms = rooms.len(),
            "Connection torn down"
        );
        self.update_gauges();
    }

    fn update_gauges(&self) {
        let connected = self.sessions.len() as i64;
        let in_room = self
            .sessions
            .all()
            .iter()
            .filter(|c| !c.joined_rooms().is_empty())
            .count() as i64;
        metrics::set_websocket_connections(connected, in_room);
    }
}
