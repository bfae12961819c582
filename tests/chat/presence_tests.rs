//! Typing indicators and connection liveness

use std::collections::HashSet;
use std::time::Duration;

use pretty_assertions::assert_eq;

use crate::common::{drain, typing_flags, TestApp, BUYER, SHOP};
use marketplace_chat::application::chat::{CloseReason, OutgoingMessage};

#[tokio::test(start_paused = true)]
async fn test_typing_disappears_without_stop_signal() {
    let app = TestApp::new();
    let conversation = app.conversation(BUYER, SHOP).await;
    let buyer = app.connect(BUYER).await;
    let mut shop = app.connect(SHOP).await;
    app.hub().join(&buyer.connection, conversation).await.unwrap();
    app.hub().join(&shop.connection, conversation).await.unwrap();

    assert!(app.hub().set_typing(&buyer.connection, conversation, true));
    // Rapid repeats only refresh the timer.
    assert!(!app.hub().set_typing(&buyer.connection, conversation, true));

    tokio::time::sleep(Duration::from_millis(2_000)).await;
    assert!(app.hub().is_typing(conversation, BUYER.id));

    tokio::time::sleep(Duration::from_millis(1_001)).await;
    assert!(!app.hub().is_typing(conversation, BUYER.id));
    assert_eq!(typing_flags(&drain(&mut shop.events), BUYER.id), vec![true, false]);
}

/// X types, then its transport dies: Y sees the indicator go at once.
#[tokio::test(start_paused = true)]
async fn test_abrupt_disconnect_clears_typing() {
    let app = TestApp::new();
    let conversation = app.conversation(BUYER, SHOP).await;
    let buyer = app.connect(BUYER).await;
    let mut shop = app.connect(SHOP).await;
    app.hub().join(&buyer.connection, conversation).await.unwrap();
    app.hub().join(&shop.connection, conversation).await.unwrap();
    app.hub().set_typing(&buyer.connection, conversation, true);

    app.hub().disconnect(&buyer.connection, CloseReason::TransportError);

    assert!(!app.hub().is_typing(conversation, BUYER.id));
    assert_eq!(app.hub().members_of(conversation), HashSet::from([SHOP.id]));
    assert_eq!(typing_flags(&drain(&mut shop.events), BUYER.id), vec![true, false]);

    // The old expiry timer firing later must not produce a second removal.
    tokio::time::sleep(Duration::from_secs(5)).await;
    assert!(typing_flags(&drain(&mut shop.events), BUYER.id).is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_silent_connection_times_out_with_full_cleanup() {
    let app = TestApp::new();
    let conversation = app.conversation(BUYER, SHOP).await;
    let buyer = app.connect(BUYER).await;
    let shop = app.connect(SHOP).await;
    app.hub().join(&buyer.connection, conversation).await.unwrap();
    app.hub().join(&shop.connection, conversation).await.unwrap();

    for _ in 0..4 {
        tokio::time::sleep(Duration::from_millis(900)).await;
        app.hub().heartbeat(&shop.connection);
    }
    let reaped = app.hub().reap_stale();

    assert_eq!(reaped, 1);
    assert_eq!(buyer.connection.close_reason(), Some(CloseReason::HeartbeatTimeout));
    assert_eq!(app.hub().members_of(conversation), HashSet::from([SHOP.id]));
    assert_eq!(app.hub().connection_count(), 1);

    // Messages now count as unread for the timed-out buyer.
    app.hub()
        .send(&shop.connection, OutgoingMessage::text(conversation, "are you still there?"))
        .await
        .unwrap();
    assert_eq!(app.hub().unread_count(conversation, BUYER.id), 1);
}

#[tokio::test(start_paused = true)]
async fn test_typing_ignored_outside_room() {
    let app = TestApp::new();
    let conversation = app.conversation(BUYER, SHOP).await;
    let buyer = app.connect(BUYER).await;
    let mut shop = app.connect(SHOP).await;
    app.hub().join(&shop.connection, conversation).await.unwrap();

    assert!(!app.hub().set_typing(&buyer.connection, conversation, true));
    assert!(!app.hub().is_typing(conversation, BUYER.id));
    assert!(drain(&mut shop.events).is_empty());
}
