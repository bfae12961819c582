//! WebSocket Gateway
//!
//! Real-time communication via WebSocket connections.

pub mod handler;
pub mod messages;

pub use handler::ws_handler;
pub use messages::{GatewayReceive, GatewaySend, OpCode};
