//! Common Test Utilities
//!
//! Shared helpers, fixtures, and test infrastructure.

#![allow(dead_code)]

use std::sync::Arc;

use axum::Router;
use axum_test::TestServer;
use fake::faker::lorem::en::Sentence;
use fake::Fake;
use tokio::sync::mpsc;

use marketplace_chat::application::chat::{ChatHub, ServerEvent, Session};
use marketplace_chat::application::services::{Credentials, JwtAuthenticator};
use marketplace_chat::config::Settings;
use marketplace_chat::domain::{
    ConversationId, ConversationKind, ConversationRepository, Participants, Principal, UserId,
    UserRole,
};
use marketplace_chat::infrastructure::repositories::InMemoryStore;
use marketplace_chat::presentation::http::routes;
use marketplace_chat::startup::AppState;

pub const TEST_JWT_SECRET: &str = "integration-test-secret-with-32-plus-chars";

pub const BUYER: Principal = Principal {
    id: UserId::new(101),
    role: UserRole::Buyer,
};

pub const SHOP: Principal = Principal {
    id: UserId::new(202),
    role: UserRole::Shop,
};

pub const RESCUE: Principal = Principal {
    id: UserId::new(303),
    role: UserRole::RescueCenter,
};

/// Someone with no stake in the test conversations.
pub const OUTSIDER: Principal = Principal {
    id: UserId::new(404),
    role: UserRole::Buyer,
};

/// Settings for the in-memory backend with short timers.
pub fn test_settings() -> Settings {
    Settings::builder("test")
        .and_then(|builder| builder.set_override("database.backend", "memory"))
        .and_then(|builder| builder.set_override("jwt.secret", TEST_JWT_SECRET))
        .and_then(|builder| builder.set_override("websocket.heartbeat_interval_ms", 1_000_i64))
        .and_then(|builder| builder.set_override("websocket.heartbeat_timeout_ms", 3_000_i64))
        .and_then(|builder| builder.build())
        .and_then(|config| config.try_deserialize())
        .expect("test settings")
}

/// Test application builder
pub struct TestApp {
    pub state: AppState,
    pub store: Arc<InMemoryStore>,
    pub auth: JwtAuthenticator,
}

impl TestApp {
    /// Create a new test application over in-memory storage
    pub fn new() -> Self {
        Self::with_settings(test_settings())
    }

    pub fn with_settings(settings: Settings) -> Self {
        let store = Arc::new(InMemoryStore::new(1, 1));
        for principal in [BUYER, SHOP, RESCUE, OUTSIDER] {
            store.register_user(principal);
        }
        let auth = JwtAuthenticator::new(settings.jwt.clone());
        let state = AppState::new(settings, None, store.clone(), store.clone(), store.clone());
        Self { state, store, auth }
    }

    pub fn hub(&self) -> &Arc<ChatHub> {
        &self.state.chat
    }

    pub fn router(&self) -> Router {
        routes::create_router(self.state.clone())
    }

    pub fn server(&self) -> TestServer {
        TestServer::new(self.router()).expect("test server")
    }

    pub fn credentials(&self, principal: Principal) -> Credentials {
        Credentials::bearer(self.auth.issue_token(&principal).expect("token"))
    }

    /// Connect `principal` and discard the greeting events.
    pub async fn connect(&self, principal: Principal) -> Session {
        let mut session = self
            .hub()
            .connect(&self.credentials(principal))
            .await
            .expect("connect");
        drain(&mut session.events);
        session
    }

    /// Conversation between `buyer` and `counterpart`.
    pub async fn conversation(&self, buyer: Principal, counterpart: Principal) -> ConversationId {
        let kind = match counterpart.role {
            UserRole::RescueCenter => ConversationKind::BuyerRescueCenter,
            _ => ConversationKind::BuyerShop,
        };
        self.store
            .create_or_get(Participants::new(buyer.id, counterpart.id), kind, None)
            .await
            .expect("conversation")
            .id
    }
}

/// Everything queued for a connection right now.
pub fn drain(rx: &mut mpsc::Receiver<ServerEvent>) -> Vec<ServerEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

/// Ids of delivered messages, in arrival order.
pub fn delivered_ids(events: &[ServerEvent]) -> Vec<i64> {
    events
        .iter()
        .filter_map(|e| match e {
            ServerEvent::MessageDelivered(d) => Some(d.message.id.as_i64()),
            _ => None,
        })
        .collect()
}

/// Typing flags for `user`, in arrival order.
pub fn typing_flags(events: &[ServerEvent], user: UserId) -> Vec<bool> {
    events
        .iter()
        .filter_map(|e| match e {
            ServerEvent::TypingChanged(t) if t.user_id == user => Some(t.is_typing),
            _ => None,
        })
        .collect()
}

/// A plausible chat message body.
pub fn message_body() -> String {
    Sentence(3..10).fake()
}
