//! Events and commands exchanged between the chat core and its consumers.
//!
//! Server-to-client traffic is a closed set of tagged variants; each variant
//! has its own handler on the consumer side instead of payload sniffing.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::domain::{
    ContentKind, Conversation, ConversationId, ConversationKind, Message, RelatedEntity, UserId,
};

/// Lifecycle of a client's connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
}

/// Why the server closed a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CloseReason {
    ClientClosed,
    Superseded,
    HeartbeatTimeout,
    SlowConsumer,
    TransportError,
    ServerShutdown,
}

impl CloseReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ClientClosed => "client_closed",
            Self::Superseded => "superseded",
            Self::HeartbeatTimeout => "heartbeat_timeout",
            Self::SlowConsumer => "slow_consumer",
            Self::TransportError => "transport_error",
            Self::ServerShutdown => "server_shutdown",
        }
    }
}

impl std::fmt::Display for CloseReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Server-pushed event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum ServerEvent {
    MessageDelivered(MessageDeliveredEvent),
    TypingChanged(TypingChangedEvent),
    UnreadChanged(UnreadChangedEvent),
    ConnectionStateChanged(ConnectionStateChangedEvent),
}

impl ServerEvent {
    /// Get the event name for dispatch
    pub fn event_name(&self) -> &'static str {
        match self {
            ServerEvent::MessageDelivered(_) => "MESSAGE_DELIVERED",
            ServerEvent::TypingChanged(_) => "TYPING_CHANGED",
            ServerEvent::UnreadChanged(_) => "UNREAD_CHANGED",
            ServerEvent::ConnectionStateChanged(_) => "CONNECTION_STATE_CHANGED",
        }
    }

    /// Conversation this event belongs to, if any.
    pub fn conversation_id(&self) -> Option<ConversationId> {
        match self {
            ServerEvent::MessageDelivered(e) => Some(e.message.conversation_id),
            ServerEvent::TypingChanged(e) => Some(e.conversation_id),
            ServerEvent::UnreadChanged(e) => Some(e.conversation_id),
            ServerEvent::ConnectionStateChanged(_) => None,
        }
    }

    pub fn message_delivered(message: Message) -> Self {
        ServerEvent::MessageDelivered(MessageDeliveredEvent { message })
    }

    pub fn typing(conversation_id: ConversationId, user_id: UserId, is_typing: bool) -> Self {
        ServerEvent::TypingChanged(TypingChangedEvent {
            conversation_id,
            user_id,
            is_typing,
            at: Utc::now(),
        })
    }

    pub fn unread(conversation_id: ConversationId, count: u32, previous: u32) -> Self {
        ServerEvent::UnreadChanged(UnreadChangedEvent {
            conversation_id,
            count,
            previous,
        })
    }

    pub fn connection_state(state: ConnectionState, reason: Option<CloseReason>) -> Self {
        ServerEvent::ConnectionStateChanged(ConnectionStateChangedEvent { state, reason })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageDeliveredEvent {
    pub message: Message,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TypingChangedEvent {
    pub conversation_id: ConversationId,
    pub user_id: UserId,
    pub is_typing: bool,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnreadChangedEvent {
    pub conversation_id: ConversationId,
    pub count: u32,
    pub previous: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectionStateChangedEvent {
    pub state: ConnectionState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<CloseReason>,
}

/// Client-issued command.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum ClientCommand {
    Join {
        conversation_id: ConversationId,
    },
    Leave {
        conversation_id: ConversationId,
    },
    Send(SendMessageCommand),
    SetTyping {
        conversation_id: ConversationId,
        is_typing: bool,
    },
    LoadHistory {
        conversation_id: ConversationId,
        #[serde(default)]
        page: u32,
        #[serde(default)]
        page_size: Option<u32>,
    },
    OpenConversation {
        counterpart_id: UserId,
        kind: ConversationKind,
        #[serde(default)]
        related: Option<RelatedEntity>,
    },
    ListConversations,
}

impl ClientCommand {
    pub fn name(&self) -> &'static str {
        match self {
            ClientCommand::Join { .. } => "join",
            ClientCommand::Leave { .. } => "leave",
            ClientCommand::Send(_) => "send",
            ClientCommand::SetTyping { .. } => "set_typing",
            ClientCommand::LoadHistory { .. } => "load_history",
            ClientCommand::OpenConversation { .. } => "open_conversation",
            ClientCommand::ListConversations => "list_conversations",
        }
    }
}

/// Payload of a send command.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct SendMessageCommand {
    pub conversation_id: ConversationId,

    #[validate(length(max = 16000, message = "content is too long"))]
    pub content: String,

    #[serde(default)]
    pub kind: ContentKind,

    #[serde(default)]
    #[validate(length(min = 1, max = 2048, message = "attachment reference must be 1-2048 characters"))]
    pub attachment: Option<String>,

    /// Client-chosen correlation id for optimistic sends.
    #[serde(default)]
    #[validate(length(max = 64, message = "client nonce is too long"))]
    pub client_nonce: Option<String>,
}

/// Acknowledgement of a successful join.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct JoinAck {
    pub conversation_id: ConversationId,
    /// Unread count before this join reset it.
    pub previous_unread: u32,
    /// The connection already occupied the room.
    pub already_joined: bool,
}

/// Direct reply to a client command.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum CommandReply {
    Joined(JoinAck),
    Left {
        conversation_id: ConversationId,
    },
    Sent {
        message: Message,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        client_nonce: Option<String>,
    },
    TypingAccepted {
        conversation_id: ConversationId,
    },
    History {
        conversation_id: ConversationId,
        page: u32,
        messages: Vec<Message>,
    },
    Conversation(Conversation),
    Conversations(Vec<Conversation>),
    Rejected {
        command: String,
        code: String,
        message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        client_nonce: Option<String>,
    },
}
