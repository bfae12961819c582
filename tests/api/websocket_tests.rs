//! WebSocket Protocol Tests
//!
//! Real sockets against a served router: handshake, commands, heartbeats and
//! server-initiated closes.

use std::net::SocketAddr;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use pretty_assertions::assert_eq;
use serde_json::{json, Value};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use crate::common::{test_settings, TestApp, BUYER, SHOP};
use marketplace_chat::application::chat::{
    CloseReason, CommandReply, ConnectionState, ServerEvent,
};
use marketplace_chat::application::services::JwtAuthenticator;
use marketplace_chat::domain::{ConversationId, Principal};
use marketplace_chat::presentation::websocket::{GatewayReceive, OpCode};
use marketplace_chat::startup::Application;

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

const FRAME_TIMEOUT: Duration = Duration::from_secs(5);

/// Serve the test app's router on an ephemeral port.
async fn serve(app: &TestApp) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let router = app.router();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    addr
}

async fn open(addr: SocketAddr) -> Socket {
    let (socket, _) = connect_async(format!("ws://{}/gateway", addr)).await.unwrap();
    socket
}

/// What the client reads off the socket.
#[derive(Debug)]
enum Inbound {
    Frame(GatewayReceive),
    Close(u16, String),
}

async fn next_inbound(socket: &mut Socket) -> Inbound {
    loop {
        let message = timeout(FRAME_TIMEOUT, socket.next())
            .await
            .expect("frame within timeout")
            .expect("socket still open")
            .expect("valid frame");
        match message {
            WsMessage::Text(text) => {
                return Inbound::Frame(serde_json::from_str(text.as_str()).unwrap());
            }
            WsMessage::Close(Some(frame)) => {
                return Inbound::Close(u16::from(frame.code), frame.reason.to_string());
            }
            WsMessage::Close(None) => return Inbound::Close(1005, String::new()),
            _ => continue,
        }
    }
}

async fn next_frame(socket: &mut Socket) -> GatewayReceive {
    match next_inbound(socket).await {
        Inbound::Frame(frame) => frame,
        Inbound::Close(code, reason) => panic!("closed early: {} {}", code, reason),
    }
}

/// Skip frames until one with `op` arrives.
async fn frame_with_op(socket: &mut Socket, op: OpCode) -> GatewayReceive {
    loop {
        let frame = next_frame(socket).await;
        if frame.opcode() == Some(op) {
            return frame;
        }
    }
}

/// Skip frames until a dispatch matching `pred` arrives.
async fn event_where(socket: &mut Socket, pred: impl Fn(&ServerEvent) -> bool) -> ServerEvent {
    loop {
        let frame = frame_with_op(socket, OpCode::Dispatch).await;
        let event: ServerEvent = serde_json::from_value(frame.d.unwrap()).unwrap();
        if pred(&event) {
            return event;
        }
    }
}

/// Read frames until the server closes the socket.
async fn close_code(socket: &mut Socket) -> (u16, String) {
    loop {
        if let Inbound::Close(code, reason) = next_inbound(socket).await {
            return (code, reason);
        }
    }
}

async fn send_json(socket: &mut Socket, value: Value) {
    socket.send(WsMessage::text(value.to_string())).await.unwrap();
}

async fn command(socket: &mut Socket, reference: u64, command: Value) -> (GatewayReceive, CommandReply) {
    send_json(socket, json!({"op": OpCode::Command as u8, "d": command, "s": reference})).await;
    loop {
        let frame = frame_with_op(socket, OpCode::Reply).await;
        if frame.s == Some(reference) {
            let reply = serde_json::from_value(frame.d.clone().unwrap()).unwrap();
            return (frame, reply);
        }
    }
}

/// Hello, then Identify, then the Connected dispatch.
async fn identify(socket: &mut Socket, token: &str) {
    let hello = next_frame(socket).await;
    assert_eq!(hello.opcode(), Some(OpCode::Hello));
    assert_eq!(hello.d.unwrap()["heartbeat_interval"], json!(1_000));

    send_json(socket, json!({"op": OpCode::Identify as u8, "d": {"token": token}})).await;
    let connected = event_where(socket, |e| matches!(e, ServerEvent::ConnectionStateChanged(_))).await;
    match connected {
        ServerEvent::ConnectionStateChanged(e) => assert_eq!(e.state, ConnectionState::Connected),
        other => panic!("unexpected event {:?}", other),
    }
}

fn token(app: &TestApp, principal: Principal) -> String {
    app.auth.issue_token(&principal).unwrap()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_commands_over_the_wire() {
    let app = TestApp::new();
    let conversation = app.conversation(BUYER, SHOP).await;
    let addr = serve(&app).await;
    let conv = conversation.to_string();

    let mut buyer = open(addr).await;
    let mut shop = open(addr).await;
    identify(&mut buyer, &token(&app, BUYER)).await;
    identify(&mut shop, &token(&app, SHOP)).await;

    // Replies echo the client's reference in `s` and name the command in `t`.
    let (frame, reply) = command(&mut buyer, 7, json!({"type": "join", "data": {"conversation_id": conv}})).await;
    assert_eq!(frame.t.as_deref(), Some("join"));
    assert!(matches!(reply, CommandReply::Joined(ack) if ack.conversation_id == conversation));
    let (_, reply) = command(&mut shop, 1, json!({"type": "join", "data": {"conversation_id": conv}})).await;
    assert!(matches!(reply, CommandReply::Joined(_)));

    let (_, reply) = command(
        &mut buyer,
        8,
        json!({"type": "set_typing", "data": {"conversation_id": conv, "is_typing": true}}),
    )
    .await;
    assert_eq!(reply, CommandReply::TypingAccepted { conversation_id: conversation });
    event_where(&mut shop, |e| {
        matches!(e, ServerEvent::TypingChanged(t) if t.user_id == BUYER.id && t.is_typing)
    })
    .await;

    let (_, reply) = command(
        &mut buyer,
        9,
        json!({"type": "send", "data": {"conversation_id": conv, "content": "Is the puppy still available?", "client_nonce": "n-1"}}),
    )
    .await;
    let sent = match reply {
        CommandReply::Sent { message, client_nonce } => {
            assert_eq!(client_nonce.as_deref(), Some("n-1"));
            message
        }
        other => panic!("unexpected reply {:?}", other),
    };
    let delivered = event_where(&mut shop, |e| matches!(e, ServerEvent::MessageDelivered(_))).await;
    assert!(matches!(delivered, ServerEvent::MessageDelivered(e) if e.message.id == sent.id));

    // Rejected by field validation before reaching the chat core.
    let (frame, reply) = command(
        &mut buyer,
        10,
        json!({"type": "send", "data": {"conversation_id": conv, "content": "pic", "kind": "image", "attachment": "", "client_nonce": "n-2"}}),
    )
    .await;
    assert_eq!(frame.t.as_deref(), Some("send"));
    match reply {
        CommandReply::Rejected { code, client_nonce, .. } => {
            assert_eq!(code, "invalid_content");
            assert_eq!(client_nonce.as_deref(), Some("n-2"));
        }
        other => panic!("unexpected reply {:?}", other),
    }

    let (_, reply) = command(
        &mut shop,
        2,
        json!({"type": "load_history", "data": {"conversation_id": conv}}),
    )
    .await;
    match reply {
        CommandReply::History { conversation_id, messages, .. } => {
            assert_eq!(conversation_id, conversation);
            assert_eq!(messages.iter().map(|m| m.id).collect::<Vec<_>>(), vec![sent.id]);
        }
        other => panic!("unexpected reply {:?}", other),
    }

    send_json(&mut buyer, json!({"op": OpCode::Heartbeat as u8})).await;
    frame_with_op(&mut buyer, OpCode::HeartbeatAck).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_unknown_conversation_rejected_with_reference() {
    let app = TestApp::new();
    let addr = serve(&app).await;
    let mut buyer = open(addr).await;
    identify(&mut buyer, &token(&app, BUYER)).await;

    let missing = ConversationId::new(999_999).to_string();
    let (frame, reply) = command(&mut buyer, 42, json!({"type": "join", "data": {"conversation_id": missing}})).await;
    assert_eq!(frame.s, Some(42));
    assert!(matches!(reply, CommandReply::Rejected { code, .. } if code == "conversation_not_found"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_bad_token_closes_with_auth_failure() {
    let app = TestApp::new();
    let addr = serve(&app).await;
    let mut socket = open(addr).await;

    frame_with_op(&mut socket, OpCode::Hello).await;
    send_json(&mut socket, json!({"op": OpCode::Identify as u8, "d": {"token": "not-a-jwt"}})).await;

    let invalid = frame_with_op(&mut socket, OpCode::InvalidSession).await;
    assert_eq!(invalid.d.unwrap()["code"], json!("auth_error"));
    let (code, _) = close_code(&mut socket).await;
    assert_eq!(code, 4003);
    assert_eq!(app.hub().connection_count(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_silent_client_times_out_identify() {
    let mut settings = test_settings();
    settings.websocket.identify_timeout_secs = 1;
    let app = TestApp::with_settings(settings);
    let addr = serve(&app).await;
    let mut socket = open(addr).await;

    frame_with_op(&mut socket, OpCode::Hello).await;
    let (code, reason) = close_code(&mut socket).await;
    assert_eq!(code, 4003);
    assert_eq!(reason, "identify_timeout");
}

/// Boots the real application and checks that a second login pushes the
/// first socket out with the superseded close code.
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_application_supersedes_older_socket() {
    let mut settings = test_settings();
    settings.server.host = "127.0.0.1".to_string();
    settings.server.port = 0;
    let auth = JwtAuthenticator::new(settings.jwt.clone());
    let token = auth.issue_token(&BUYER).unwrap();

    let application = Application::build(settings).await.unwrap();
    let addr = application.local_addr().unwrap();
    let hub = application.state().chat.clone();
    tokio::spawn(application.run_until_stopped());

    let mut first = open(addr).await;
    identify(&mut first, &token).await;
    send_json(&mut first, json!({"op": OpCode::Heartbeat as u8})).await;
    frame_with_op(&mut first, OpCode::HeartbeatAck).await;

    let mut second = open(addr).await;
    identify(&mut second, &token).await;

    let disconnected = event_where(&mut first, |e| matches!(e, ServerEvent::ConnectionStateChanged(_))).await;
    match disconnected {
        ServerEvent::ConnectionStateChanged(e) => {
            assert_eq!(e.state, ConnectionState::Disconnected);
            assert_eq!(e.reason, Some(CloseReason::Superseded));
        }
        other => panic!("unexpected event {:?}", other),
    }
    let (code, reason) = close_code(&mut first).await;
    assert_eq!(code, 4000);
    assert_eq!(reason, "superseded");

    assert_eq!(hub.connection_count(), 1);
    send_json(&mut second, json!({"op": OpCode::Heartbeat as u8})).await;
    frame_with_op(&mut second, OpCode::HeartbeatAck).await;
}
