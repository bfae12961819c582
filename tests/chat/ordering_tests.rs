//! Message ordering and fan-out

use std::sync::Arc;

use pretty_assertions::assert_eq;

use crate::common::{delivered_ids, drain, message_body, TestApp, BUYER, SHOP};
use marketplace_chat::application::chat::{ChatError, OutgoingMessage, ServerEvent};
use marketplace_chat::domain::ConversationId;
use marketplace_chat::domain::MessageRepository;

const PER_SENDER: usize = 25;

/// Both members observe the same sequence, and it matches history.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_senders_observe_persistence_order() {
    let app = TestApp::new();
    let conversation = app.conversation(BUYER, SHOP).await;
    let mut buyer = app.connect(BUYER).await;
    let mut shop = app.connect(SHOP).await;
    app.hub().join(&buyer.connection, conversation).await.unwrap();
    app.hub().join(&shop.connection, conversation).await.unwrap();

    let mut senders = Vec::new();
    for connection in [Arc::clone(&buyer.connection), Arc::clone(&shop.connection)] {
        let hub = Arc::clone(app.hub());
        senders.push(tokio::spawn(async move {
            for _ in 0..PER_SENDER {
                hub.send(&connection, OutgoingMessage::text(conversation, message_body()))
                    .await
                    .unwrap();
            }
        }));
    }
    for sender in senders {
        sender.await.unwrap();
    }

    let seen_by_buyer = delivered_ids(&drain(&mut buyer.events));
    let seen_by_shop = delivered_ids(&drain(&mut shop.events));
    let history: Vec<i64> = app
        .store
        .list(conversation, 0, 100)
        .await
        .unwrap()
        .iter()
        .map(|m| m.id.as_i64())
        .collect();

    assert_eq!(history.len(), 2 * PER_SENDER);
    assert_eq!(seen_by_buyer, history);
    assert_eq!(seen_by_shop, history);
}

#[tokio::test]
async fn test_send_without_join_is_rejected() {
    let app = TestApp::new();
    let conversation = app.conversation(BUYER, SHOP).await;
    let buyer = app.connect(BUYER).await;

    let result = app
        .hub()
        .send(&buyer.connection, OutgoingMessage::text(conversation, "hi"))
        .await;

    assert!(matches!(result, Err(ChatError::NotJoined)));
    assert_eq!(app.store.message_count(conversation), 0);
}

#[tokio::test]
async fn test_blank_message_is_rejected() {
    let app = TestApp::new();
    let conversation = app.conversation(BUYER, SHOP).await;
    let buyer = app.connect(BUYER).await;
    app.hub().join(&buyer.connection, conversation).await.unwrap();

    let result = app
        .hub()
        .send(&buyer.connection, OutgoingMessage::text(conversation, "   "))
        .await;

    assert!(matches!(result, Err(ChatError::InvalidContent(_))));
}

/// A stalled reader is cut loose without holding up the conversation.
#[tokio::test]
async fn test_slow_consumer_disconnected() {
    let mut settings = crate::common::test_settings();
    settings.websocket.outbound_queue_capacity = 2;
    let app = TestApp::with_settings(settings);
    let conversation = app.conversation(BUYER, SHOP).await;
    let mut buyer = app.connect(BUYER).await;
    let shop = app.connect(SHOP).await;
    app.hub().join(&buyer.connection, conversation).await.unwrap();
    app.hub().join(&shop.connection, conversation).await.unwrap();

    for i in 0..4 {
        app.hub()
            .send(&buyer.connection, OutgoingMessage::text(conversation, format!("photo {}", i)))
            .await
            .unwrap();
        drain(&mut buyer.events);
    }

    assert!(shop.connection.is_closed());
    assert_eq!(
        shop.connection.close_reason(),
        Some(marketplace_chat::application::chat::CloseReason::SlowConsumer)
    );
    assert_eq!(app.store.message_count(conversation), 4);

    app.hub().reap_stale();
    assert_eq!(
        app.hub().members_of(conversation),
        std::collections::HashSet::from([BUYER.id])
    );
}

/// Messages a slow consumer never received are owed to it as unread.
#[tokio::test]
async fn test_slow_consumer_misses_count_as_unread() {
    let mut settings = crate::common::test_settings();
    settings.websocket.outbound_queue_capacity = 2;
    let app = TestApp::with_settings(settings);
    let conversation = app.conversation(BUYER, SHOP).await;
    let mut buyer = app.connect(BUYER).await;
    let shop = app.connect(SHOP).await;
    app.hub().join(&buyer.connection, conversation).await.unwrap();
    app.hub().join(&shop.connection, conversation).await.unwrap();

    for i in 0..4 {
        app.hub()
            .send(&buyer.connection, OutgoingMessage::text(conversation, format!("photo {}", i)))
            .await
            .unwrap();
        drain(&mut buyer.events);
    }

    // Closed but not yet reaped: already out of the room.
    assert!(shop.connection.is_closed());
    assert!(!app.hub().members_of(conversation).contains(&SHOP.id));
    assert_eq!(app.hub().unread_count(conversation, SHOP.id), 2);

    app.hub().reap_stale();
    let mut reconnected = app
        .hub()
        .connect(&app.credentials(SHOP))
        .await
        .unwrap();
    let snapshot: Vec<(ConversationId, u32)> = drain(&mut reconnected.events)
        .into_iter()
        .filter_map(|event| match event {
            ServerEvent::UnreadChanged(e) => Some((e.conversation_id, e.count)),
            _ => None,
        })
        .collect();
    assert_eq!(snapshot, vec![(conversation, 2)]);
}
