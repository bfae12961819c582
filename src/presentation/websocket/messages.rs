//! WebSocket Message Types
//!
//! Gateway frame format: `{"op": u8, "d": payload, "s": sequence, "t": name}`.
//! Dispatch frames carry server events with a per-connection sequence.
//! Command and Reply frames use `s` as a client-chosen reference.

use serde::{Deserialize, Serialize};

use crate::application::chat::{ChatError, ClientCommand, CloseReason, CommandReply, ServerEvent};

/// Gateway opcodes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum OpCode {
    /// Server event dispatch
    Dispatch = 0,
    /// Heartbeat
    Heartbeat = 1,
    /// Identify
    Identify = 2,
    /// Client command
    Command = 3,
    /// Reply to a client command
    Reply = 4,
    /// Invalid session
    InvalidSession = 9,
    /// Hello
    Hello = 10,
    /// Heartbeat ACK
    HeartbeatAck = 11,
}

impl OpCode {
    pub fn from_u8(op: u8) -> Option<Self> {
        match op {
            0 => Some(Self::Dispatch),
            1 => Some(Self::Heartbeat),
            2 => Some(Self::Identify),
            3 => Some(Self::Command),
            4 => Some(Self::Reply),
            9 => Some(Self::InvalidSession),
            10 => Some(Self::Hello),
            11 => Some(Self::HeartbeatAck),
            _ => None,
        }
    }
}

/// Incoming gateway message
#[derive(Debug, Deserialize)]
pub struct GatewayReceive {
    pub op: u8,
    pub d: Option<serde_json::Value>,
    pub s: Option<u64>,
    pub t: Option<String>,
}

impl GatewayReceive {
    pub fn opcode(&self) -> Option<OpCode> {
        OpCode::from_u8(self.op)
    }

    /// Decode the payload of a Command frame.
    pub fn command(&self) -> Result<ClientCommand, serde_json::Error> {
        serde_json::from_value(self.d.clone().unwrap_or(serde_json::Value::Null))
    }
}

/// Outgoing gateway message
#[derive(Debug, Clone, Serialize)]
pub struct GatewaySend {
    pub op: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub d: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub s: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub t: Option<String>,
}

impl GatewaySend {
    fn new(op: OpCode, d: Option<serde_json::Value>) -> Self {
        Self {
            op: op as u8,
            d,
            s: None,
            t: None,
        }
    }

    pub fn hello(heartbeat_interval: u64) -> Self {
        Self::new(
            OpCode::Hello,
            serde_json::to_value(HelloPayload { heartbeat_interval }).ok(),
        )
    }

    pub fn heartbeat_ack() -> Self {
        Self::new(OpCode::HeartbeatAck, None)
    }

    pub fn invalid_session(error: &ChatError) -> Self {
        Self::new(
            OpCode::InvalidSession,
            serde_json::to_value(InvalidSessionPayload {
                code: error.code().to_string(),
                message: error.to_string(),
            })
            .ok(),
        )
    }

    pub fn dispatch(sequence: u64, event: &ServerEvent) -> Result<Self, serde_json::Error> {
        Ok(Self {
            op: OpCode::Dispatch as u8,
            d: Some(serde_json::to_value(event)?),
            s: Some(sequence),
            t: Some(event.event_name().to_string()),
        })
    }

    pub fn reply(reference: Option<u64>, command: &str, reply: &CommandReply) -> Result<Self, serde_json::Error> {
        Ok(Self {
            op: OpCode::Reply as u8,
            d: Some(serde_json::to_value(reply)?),
            s: reference,
            t: Some(command.to_string()),
        })
    }
}

/// Hello payload (op 10)
#[derive(Debug, Serialize)]
pub struct HelloPayload {
    pub heartbeat_interval: u64,
}

/// Identify payload (op 2)
#[derive(Debug, Deserialize)]
pub struct IdentifyPayload {
    pub token: String,
}

/// Invalid session payload (op 9)
#[derive(Debug, Serialize)]
pub struct InvalidSessionPayload {
    pub code: String,
    pub message: String,
}

/// WebSocket close code for a server-initiated close.
pub fn close_code(reason: CloseReason) -> u16 {
    match reason {
        CloseReason::ClientClosed => 1000,
        CloseReason::ServerShutdown => 1001,
        CloseReason::TransportError => 1011,
        CloseReason::Superseded => 4000,
        CloseReason::HeartbeatTimeout => 4001,
        CloseReason::SlowConsumer => 4002,
    }
}

/// Close code sent when identification fails.
pub const CLOSE_AUTHENTICATION_FAILED: u16 = 4003;
