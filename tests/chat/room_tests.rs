//! Room membership and unread bookkeeping

use std::collections::HashSet;

use pretty_assertions::assert_eq;
use test_case::test_case;
use tokio_test::{assert_err, assert_ok};

use crate::common::{drain, TestApp, BUYER, OUTSIDER, SHOP};
use marketplace_chat::application::chat::{ChatError, OutgoingMessage, ServerEvent};
use marketplace_chat::domain::MessageRepository;

#[tokio::test]
async fn test_repeat_join_is_idempotent() {
    let app = TestApp::new();
    let conversation = app.conversation(BUYER, SHOP).await;
    let buyer = app.connect(BUYER).await;

    let first = app.hub().join(&buyer.connection, conversation).await.unwrap();
    let second = app.hub().join(&buyer.connection, conversation).await.unwrap();

    assert!(!first.already_joined);
    assert!(second.already_joined);
    assert_eq!(second.previous_unread, 0);
    assert_eq!(app.hub().members_of(conversation), HashSet::from([BUYER.id]));
    assert_eq!(buyer.connection.joined_rooms(), vec![conversation]);
}

#[test_case(1 ; "single message")]
#[test_case(7 ; "several messages")]
#[tokio::test]
async fn test_unread_accumulates_then_join_clears(n: u32) {
    let app = TestApp::new();
    let conversation = app.conversation(BUYER, SHOP).await;
    let shop = app.connect(SHOP).await;
    app.hub().join(&shop.connection, conversation).await.unwrap();

    for i in 0..n {
        app.hub()
            .send(&shop.connection, OutgoingMessage::text(conversation, format!("update {}", i)))
            .await
            .unwrap();
    }
    assert_eq!(app.hub().unread_count(conversation, BUYER.id), n);
    assert_eq!(app.hub().unread_count(conversation, SHOP.id), 0);

    let buyer = app.connect(BUYER).await;
    let ack = assert_ok!(app.hub().join(&buyer.connection, conversation).await);

    assert_eq!(ack.previous_unread, n);
    assert_eq!(app.hub().unread_count(conversation, BUYER.id), 0);
}

/// X says "hello" while Y is elsewhere: Y's counter moves and history grows.
#[tokio::test]
async fn test_hello_to_absent_participant() {
    let app = TestApp::new();
    let conversation = app.conversation(BUYER, SHOP).await;
    let shop = app.connect(SHOP).await;
    let mut buyer = app.connect(BUYER).await;
    app.hub().join(&shop.connection, conversation).await.unwrap();
    app.hub()
        .send(&shop.connection, OutgoingMessage::text(conversation, "new litter arrived"))
        .await
        .unwrap();
    let before = app.store.list(conversation, 0, 50).await.unwrap();
    drain(&mut buyer.events);

    let hello = app
        .hub()
        .send(&shop.connection, OutgoingMessage::text(conversation, "hello"))
        .await
        .unwrap();

    assert_eq!(app.hub().unread_count(conversation, BUYER.id), 2);
    let history = app.store.list(conversation, 0, 50).await.unwrap();
    assert_eq!(history.len(), before.len() + 1);
    assert_eq!(history.last(), Some(&hello));
    assert!(history[history.len() - 2].order_key() < hello.order_key());

    // The absent viewer is told about the new count, not the message.
    let events = drain(&mut buyer.events);
    assert_eq!(
        events,
        vec![ServerEvent::unread(conversation, 2, 1)]
    );
}

#[tokio::test]
async fn test_outsider_cannot_join_or_send() {
    let app = TestApp::new();
    let conversation = app.conversation(BUYER, SHOP).await;
    let buyer = app.connect(BUYER).await;
    app.hub().join(&buyer.connection, conversation).await.unwrap();
    let outsider = app.connect(OUTSIDER).await;

    let joined = assert_err!(app.hub().join(&outsider.connection, conversation).await);
    let sent = assert_err!(
        app.hub()
            .send(&outsider.connection, OutgoingMessage::text(conversation, "any cats?"))
            .await
    );

    assert!(matches!(joined, ChatError::NotAuthorized));
    assert!(matches!(sent, ChatError::NotAuthorized));
    assert_eq!(app.hub().members_of(conversation), HashSet::from([BUYER.id]));
    assert!(outsider.connection.joined_rooms().is_empty());
    assert_eq!(app.hub().unread_count(conversation, OUTSIDER.id), 0);
}

#[tokio::test]
async fn test_leave_keeps_room_and_resumes_unread() {
    let app = TestApp::new();
    let conversation = app.conversation(BUYER, SHOP).await;
    let buyer = app.connect(BUYER).await;
    let shop = app.connect(SHOP).await;
    app.hub().join(&buyer.connection, conversation).await.unwrap();
    app.hub().join(&shop.connection, conversation).await.unwrap();

    assert!(app.hub().leave(&buyer.connection, conversation));
    app.hub()
        .send(&shop.connection, OutgoingMessage::text(conversation, "price dropped"))
        .await
        .unwrap();

    assert_eq!(app.hub().members_of(conversation), HashSet::from([SHOP.id]));
    assert_eq!(app.hub().unread_count(conversation, BUYER.id), 1);
}

#[tokio::test]
async fn test_unknown_conversation() {
    let app = TestApp::new();
    let buyer = app.connect(BUYER).await;

    let result = app
        .hub()
        .join(&buyer.connection, marketplace_chat::domain::ConversationId::new(42))
        .await;

    assert!(matches!(result, Err(ChatError::ConversationNotFound)));
}
