//! Reconnect behaviour driven through the client store

use std::time::Duration;

use pretty_assertions::assert_eq;

use crate::common::{drain, TestApp, BUYER, RESCUE, SHOP};
use marketplace_chat::application::chat::{
    ClientCommand, CloseReason, CommandReply, ConnectionState, OutgoingMessage, Session,
};
use marketplace_chat::client::ClientStore;

/// Run join commands the store asked for and feed the acks back.
async fn run_joins(app: &TestApp, session: &Session, store: &mut ClientStore, commands: Vec<ClientCommand>) {
    for command in commands {
        match command {
            ClientCommand::Join { conversation_id } => {
                let ack = app.hub().join(&session.connection, conversation_id).await.unwrap();
                store.apply_reply(&CommandReply::Joined(ack));
            }
            other => panic!("unexpected command {:?}", other),
        }
    }
}

/// Joined to {A, B}, drop the transport, reconnect: back in exactly {A, B}
/// with both unread counts cleared.
#[tokio::test]
async fn test_reconnect_restores_rooms_and_clears_unread() {
    let app = TestApp::new();
    let a = app.conversation(BUYER, SHOP).await;
    let b = app.conversation(BUYER, RESCUE).await;
    let shop = app.connect(SHOP).await;
    let rescue = app.connect(RESCUE).await;
    app.hub().join(&shop.connection, a).await.unwrap();
    app.hub().join(&rescue.connection, b).await.unwrap();

    let mut store = ClientStore::new(BUYER.id, Duration::from_secs(3));
    store.connection_state_changed(ConnectionState::Connecting);
    let first = app.connect(BUYER).await;
    store.connection_state_changed(ConnectionState::Connected);
    let commands = vec![store.join(a), store.join(b)];
    run_joins(&app, &first, &mut store, commands).await;

    // Transport drops; counterparts keep talking.
    app.hub().disconnect(&first.connection, CloseReason::TransportError);
    store.connection_state_changed(ConnectionState::Reconnecting);
    assert!(app.hub().members_of(a).iter().all(|u| *u != BUYER.id));
    app.hub()
        .send(&shop.connection, OutgoingMessage::text(a, "the kitten is reserved for you"))
        .await
        .unwrap();
    app.hub()
        .send(&rescue.connection, OutgoingMessage::text(b, "home visit on friday?"))
        .await
        .unwrap();
    assert_eq!(app.hub().unread_count(a, BUYER.id), 1);
    assert_eq!(app.hub().unread_count(b, BUYER.id), 1);

    // Reconnect: the Connected event asks for rejoins, the snapshot follows.
    store.connection_state_changed(ConnectionState::Connecting);
    let mut second = app
        .hub()
        .connect(&app.credentials(BUYER))
        .await
        .unwrap();
    let mut commands = Vec::new();
    for event in drain(&mut second.events) {
        commands.extend(store.apply(&event));
    }
    assert_eq!(store.connection_state(), ConnectionState::Connected);
    assert_eq!(store.unread(a), 1);
    assert_eq!(store.unread(b), 1);
    assert_eq!(
        commands,
        vec![
            ClientCommand::Join { conversation_id: a },
            ClientCommand::Join { conversation_id: b },
        ]
    );
    run_joins(&app, &second, &mut store, commands).await;

    assert_eq!(second.connection.joined_rooms(), vec![a, b]);
    assert!(app.hub().members_of(a).contains(&BUYER.id));
    assert!(app.hub().members_of(b).contains(&BUYER.id));
    assert_eq!(app.hub().unread_count(a, BUYER.id), 0);
    assert_eq!(app.hub().unread_count(b, BUYER.id), 0);
    assert_eq!(store.unread(a), 0);
    assert_eq!(store.unread(b), 0);
}

#[tokio::test]
async fn test_superseded_session_stops_receiving() {
    let app = TestApp::new();
    let a = app.conversation(BUYER, SHOP).await;
    let shop = app.connect(SHOP).await;
    app.hub().join(&shop.connection, a).await.unwrap();

    let mut old = app.connect(BUYER).await;
    app.hub().join(&old.connection, a).await.unwrap();
    let mut new = app.connect(BUYER).await;
    app.hub().join(&new.connection, a).await.unwrap();
    drain(&mut old.events);

    let message = app
        .hub()
        .send(&shop.connection, OutgoingMessage::text(a, "vet records attached"))
        .await
        .unwrap();

    assert_eq!(old.connection.close_reason(), Some(CloseReason::Superseded));
    assert!(drain(&mut old.events).is_empty());
    assert_eq!(
        crate::common::delivered_ids(&drain(&mut new.events)),
        vec![message.id.as_i64()]
    );
}
