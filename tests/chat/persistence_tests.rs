//! Persistence failures and history

use pretty_assertions::assert_eq;

use crate::common::{drain, message_body, TestApp, BUYER, SHOP};
use marketplace_chat::application::chat::{ChatError, OutgoingMessage};
use marketplace_chat::domain::{ContentKind, MessageRepository};

/// Sending to a deactivated counterpart fails before anything is fanned out.
#[tokio::test]
async fn test_deactivated_counterpart_rejects_send() {
    let app = TestApp::new();
    let conversation = app.conversation(BUYER, SHOP).await;
    let buyer = app.connect(BUYER).await;
    let mut shop = app.connect(SHOP).await;
    app.hub().join(&buyer.connection, conversation).await.unwrap();
    app.hub().join(&shop.connection, conversation).await.unwrap();
    assert!(app.store.deactivate_user(SHOP.id));

    let result = app
        .hub()
        .send(&buyer.connection, OutgoingMessage::text(conversation, "still for sale?"))
        .await;

    assert!(matches!(result, Err(ChatError::Persistence(_))));
    assert_eq!(app.store.message_count(conversation), 0);
    assert!(drain(&mut shop.events).is_empty());
    assert_eq!(app.hub().unread_count(conversation, SHOP.id), 0);
}

#[tokio::test]
async fn test_history_pages_in_ascending_order() {
    let app = TestApp::new();
    let conversation = app.conversation(BUYER, SHOP).await;
    let buyer = app.connect(BUYER).await;
    app.hub().join(&buyer.connection, conversation).await.unwrap();

    let mut sent = Vec::new();
    for _ in 0..5 {
        let message = app
            .hub()
            .send(&buyer.connection, OutgoingMessage::text(conversation, message_body()))
            .await
            .unwrap();
        sent.push(message.id);
    }

    let first = app.store.list(conversation, 0, 2).await.unwrap();
    let second = app.store.list(conversation, 1, 2).await.unwrap();
    let third = app.store.list(conversation, 2, 2).await.unwrap();
    let past_end = app.store.list(conversation, 3, 2).await.unwrap();

    let paged: Vec<_> = first
        .iter()
        .chain(&second)
        .chain(&third)
        .map(|m| m.id)
        .collect();
    assert_eq!(paged, sent);
    assert!(past_end.is_empty());
}

#[tokio::test]
async fn test_image_message_carries_attachment() {
    let app = TestApp::new();
    let conversation = app.conversation(BUYER, SHOP).await;
    let shop = app.connect(SHOP).await;
    app.hub().join(&shop.connection, conversation).await.unwrap();

    let outgoing = OutgoingMessage {
        conversation_id: conversation,
        content: String::new(),
        kind: ContentKind::Image,
        attachment: Some("uploads/pets/corgi-1.jpg".into()),
    };
    let message = app.hub().send(&shop.connection, outgoing).await.unwrap();

    assert_eq!(message.kind, ContentKind::Image);
    assert_eq!(message.attachment.as_deref(), Some("uploads/pets/corgi-1.jpg"));
}
