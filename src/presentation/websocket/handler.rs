//! WebSocket Connection Handler
//!
//! One task reads frames and executes commands in arrival order; a writer
//! task drains the connection's outbound queue into the socket.

use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{
        ws::{CloseFrame, Message, WebSocket},
        State, WebSocketUpgrade,
    },
    response::Response,
};
use axum_extra::{
    headers::{authorization::Bearer, Authorization},
    TypedHeader,
};
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::time::timeout;
use validator::Validate;

use super::messages::{
    close_code, GatewayReceive, GatewaySend, IdentifyPayload, OpCode, CLOSE_AUTHENTICATION_FAILED,
};
use crate::application::chat::{
    ClientCommand, CloseReason, CommandReply, Connection, ServerEvent, Session,
};
use crate::application::services::Credentials;
use crate::shared::validation::validation_message;
use crate::startup::AppState;

/// How long the writer may keep flushing after the connection ended.
const WRITER_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

type WsSink = SplitSink<WebSocket, Message>;
type WsStream = SplitStream<WebSocket>;

/// WebSocket upgrade handler
///
/// The bearer token may arrive in the upgrade request's `Authorization`
/// header; otherwise the client must send an Identify frame.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    bearer: Option<TypedHeader<Authorization<Bearer>>>,
) -> Response {
    let token = bearer.map(|TypedHeader(Authorization(bearer))| bearer.token().to_string());
    let max_message_size = state.settings.websocket.max_message_size;
    let max_frame_size = state.settings.websocket.max_frame_size;

    ws.max_message_size(max_message_size)
        .max_frame_size(max_frame_size)
        .on_upgrade(move |socket| handle_socket(socket, state, token))
}

/// Handle individual WebSocket connection
async fn handle_socket(socket: WebSocket, state: AppState, token: Option<String>) {
    let (mut sink, mut stream) = socket.split();
    let ws_settings = state.settings.websocket.clone();

    if send_frame(&mut sink, &GatewaySend::hello(ws_settings.heartbeat_interval_ms))
        .await
        .is_err()
    {
        return;
    }

    let credentials = match token {
        Some(token) => Credentials::bearer(token),
        None => match timeout(ws_settings.identify_timeout(), await_identify(&mut stream)).await {
            Ok(Some(credentials)) => credentials,
            Ok(None) => {
                tracing::debug!("Connection closed before Identify");
                return;
            }
            Err(_) => {
                tracing::debug!("Identify timeout");
                let _ = sink
                    .send(close_message(CLOSE_AUTHENTICATION_FAILED, "identify_timeout"))
                    .await;
                return;
            }
        },
    };

    let Session { connection, events } = match state.chat.connect(&credentials).await {
        Ok(session) => session,
        Err(e) => {
            let _ = send_frame(&mut sink, &GatewaySend::invalid_session(&e)).await;
            let _ = sink
                .send(close_message(CLOSE_AUTHENTICATION_FAILED, e.code()))
                .await;
            return;
        }
    };

    let (control_tx, control_rx) = mpsc::unbounded_channel::<GatewaySend>();
    let mut writer = tokio::spawn(write_loop(sink, events, control_rx, Arc::clone(&connection)));

    loop {
        tokio::select! {
            _ = connection.closed() => break,
            msg = stream.next() => match msg {
                Some(Ok(Message::Text(text))) => {
                    state.chat.heartbeat(&connection);
                    handle_frame(&state, &connection, &control_tx, text.as_str()).await;
                }
                Some(Ok(Message::Close(_))) | None => {
                    state.chat.disconnect(&connection, CloseReason::ClientClosed);
                    break;
                }
                Some(Ok(_)) => {
                    // Ping, pong and binary frames still count as traffic.
                    state.chat.heartbeat(&connection);
                }
                Some(Err(e)) => {
                    tracing::debug!(connection_id = %connection.id(), error = %e, "WebSocket error");
                    state.chat.disconnect(&connection, CloseReason::TransportError);
                    break;
                }
            }
        }
    }

    // Server-initiated closes land here with their reason already recorded.
    let reason = connection.close_reason().unwrap_or(CloseReason::ClientClosed);
    state.chat.disconnect(&connection, reason);
    drop(control_tx);

    if timeout(WRITER_DRAIN_TIMEOUT, &mut writer).await.is_err() {
        writer.abort();
    }

    tracing::info!(
        user_id = %connection.user_id(),
        connection_id = %connection.id(),
        reason = %reason,
        "User disconnected"
    );
}

/// Wait for an Identify frame, ignoring anything else.
async fn await_identify(stream: &mut WsStream) -> Option<Credentials> {
    while let Some(msg) = stream.next().await {
        match msg {
            Ok(Message::Text(text)) => {
                let Ok(frame) = serde_json::from_str::<GatewayReceive>(text.as_str()) else {
                    continue;
                };
                if frame.opcode() != Some(OpCode::Identify) {
                    continue;
                }
                if let Some(Ok(identify)) = frame.d.map(serde_json::from_value::<IdentifyPayload>) {
                    return Some(Credentials::bearer(identify.token));
                }
            }
            Ok(Message::Close(_)) | Err(_) => return None,
            Ok(_) => continue,
        }
    }
    None
}

async fn write_loop(
    mut sink: WsSink,
    mut events: mpsc::Receiver<ServerEvent>,
    mut control: mpsc::UnboundedReceiver<GatewaySend>,
    connection: Arc<Connection>,
) {
    let mut sequence = 0u64;

    loop {
        let frame = tokio::select! {
            biased;
            Some(frame) = control.recv() => frame,
            Some(event) = events.recv() => {
                sequence += 1;
                match GatewaySend::dispatch(sequence, &event) {
                    Ok(frame) => frame,
                    Err(e) => {
                        tracing::error!(error = %e, event = event.event_name(), "Failed to serialize event");
                        continue;
                    }
                }
            }
            _ = connection.closed() => break,
        };

        if send_frame(&mut sink, &frame).await.is_err() {
            connection.close(CloseReason::TransportError);
            break;
        }
    }

    // Flush whatever was queued before the close, then say why.
    while let Ok(event) = events.try_recv() {
        sequence += 1;
        let Ok(frame) = GatewaySend::dispatch(sequence, &event) else {
            continue;
        };
        if send_frame(&mut sink, &frame).await.is_err() {
            return;
        }
    }
    let reason = connection.close_reason().unwrap_or(CloseReason::ClientClosed);
    let _ = sink.send(close_message(close_code(reason), reason.as_str())).await;
}

async fn send_frame(sink: &mut WsSink, frame: &GatewaySend) -> Result<(), axum::Error> {
    let text = serde_json::to_string(frame).map_err(axum::Error::new)?;
    sink.send(Message::Text(text.into())).await
}

fn close_message(code: u16, reason: &str) -> Message {
    Message::Close(Some(CloseFrame {
        code,
        reason: reason.to_string().into(),
    }))
}

/// Handle one inbound frame from an identified connection.
async fn handle_frame(
    state: &AppState,
    connection: &Connection,
    control: &mpsc::UnboundedSender<GatewaySend>,
    text: &str,
) {
    let frame: GatewayReceive = match serde_json::from_str(text) {
        Ok(frame) => frame,
        Err(e) => {
            tracing::debug!(connection_id = %connection.id(), error = %e, "Invalid frame");
            return;
        }
    };

    match frame.opcode() {
        Some(OpCode::Heartbeat) => {
            let _ = control.send(GatewaySend::heartbeat_ack());
            tracing::trace!(connection_id = %connection.id(), "Heartbeat received");
        }
        Some(OpCode::Command) => {
            let (name, reply) = match frame.command() {
                Ok(command) => {
                    let name = command.name();
                    (name, execute(state, connection, command).await)
                }
                Err(e) => ("unknown", rejected("unknown", "invalid_command", e, None)),
            };
            match GatewaySend::reply(frame.s, name, &reply) {
                Ok(reply) => {
                    let _ = control.send(reply);
                }
                Err(e) => tracing::error!(error = %e, command = name, "Failed to serialize reply"),
            }
        }
        Some(OpCode::Identify) => {
            tracing::debug!(connection_id = %connection.id(), "Identify on identified connection ignored");
        }
        _ => {
            tracing::debug!(connection_id = %connection.id(), op = frame.op, "Unknown opcode");
        }
    }
}

/// Execute a client command against the chat core.
async fn execute(state: &AppState, connection: &Connection, command: ClientCommand) -> CommandReply {
    let name = command.name();
    let principal = connection.principal();

    let reply = match command {
        ClientCommand::Join { conversation_id } => match state.chat.join(connection, conversation_id).await {
            Ok(ack) => CommandReply::Joined(ack),
            Err(e) => rejected(name, e.code(), e, None),
        },
        ClientCommand::Leave { conversation_id } => {
            state.chat.leave(connection, conversation_id);
            CommandReply::Left { conversation_id }
        }
        ClientCommand::Send(command) => {
            let client_nonce = command.client_nonce.clone();
            if let Err(errors) = command.validate() {
                return rejected(name, "invalid_content", validation_message(&errors), client_nonce);
            }
            match state.chat.send(connection, command.into()).await {
                Ok(message) => CommandReply::Sent {
                    message,
                    client_nonce,
                },
                Err(e) => rejected(name, e.code(), e, client_nonce),
            }
        }
        ClientCommand::SetTyping {
            conversation_id,
            is_typing,
        } => {
            state.chat.set_typing(connection, conversation_id, is_typing);
            CommandReply::TypingAccepted { conversation_id }
        }
        ClientCommand::LoadHistory {
            conversation_id,
            page,
            page_size,
        } => match state
            .conversations
            .load_history(principal, conversation_id, page, page_size)
            .await
        {
            Ok(messages) => CommandReply::History {
                conversation_id,
                page,
                messages,
            },
            Err(e) => rejected(name, e.code(), e, None),
        },
        ClientCommand::OpenConversation {
            counterpart_id,
            kind,
            related,
        } => match state
            .conversations
            .open_conversation(principal, counterpart_id, kind, related)
            .await
        {
            Ok(conversation) => CommandReply::Conversation(conversation),
            Err(e) => rejected(name, e.code(), e, None),
        },
        ClientCommand::ListConversations => {
            match state.conversations.list_conversations(principal).await {
                Ok(conversations) => CommandReply::Conversations(conversations),
                Err(e) => rejected(name, e.code(), e, None),
            }
        }
    };

    if let CommandReply::Rejected { code, message, .. } = &reply {
        tracing::debug!(
            user_id = %principal.id,
            command = name,
            code = %code,
            message = %message,
            "Command rejected"
        );
    }
    reply
}

fn rejected(
    command: &str,
    code: &str,
    message: impl std::fmt::Display,
    client_nonce: Option<String>,
) -> CommandReply {
    CommandReply::Rejected {
        command: command.to_string(),
        code: code.to_string(),
        message: message.to_string(),
        client_nonce,
    }
}
