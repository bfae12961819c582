//! Application Startup
//!
//! Application building and server initialization.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use axum::Router;
use sqlx::PgPool;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

use crate::application::chat::ChatHub;
use crate::application::services::{ConversationService, ConversationServiceImpl, JwtAuthenticator};
use crate::config::{Settings, StorageBackend};
use crate::domain::{ConversationRepository, MessageRepository, UserDirectory};
use crate::infrastructure::database;
use crate::infrastructure::repositories::{
    InMemoryStore, PgConversationRepository, PgMessageRepository, PgUserDirectory,
};
use crate::presentation::http::{handlers, routes};
use crate::presentation::middleware::{cors, logging};
use crate::shared::snowflake::SnowflakeGenerator;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    /// `None` with the in-memory storage backend
    pub db: Option<PgPool>,
    pub chat: Arc<ChatHub>,
    pub conversations: Arc<dyn ConversationService>,
    pub settings: Arc<Settings>,
}

/// Persistence collaborators chosen by `database.backend`.
struct Storage {
    db: Option<PgPool>,
    conversations: Arc<dyn ConversationRepository>,
    messages: Arc<dyn MessageRepository>,
    users: Arc<dyn UserDirectory>,
}

impl Storage {
    async fn connect(settings: &Settings) -> Result<Self> {
        let machine_id = u64::from(settings.snowflake.machine_id);
        let node_id = u64::from(settings.snowflake.node_id);

        match settings.database.backend {
            StorageBackend::Postgres => {
                let pool = database::create_pool(&settings.database).await?;
                tracing::info!("Database connection pool created");
                if settings.database.run_migrations {
                    database::run_migrations(&pool).await?;
                    tracing::info!("Database migrations applied");
                }

                let ids = Arc::new(SnowflakeGenerator::new(machine_id, node_id));
                Ok(Self {
                    conversations: Arc::new(PgConversationRepository::new(pool.clone(), ids.clone())),
                    messages: Arc::new(PgMessageRepository::new(pool.clone(), ids)),
                    users: Arc::new(PgUserDirectory::new(pool.clone())),
                    db: Some(pool),
                })
            }
            StorageBackend::Memory => {
                tracing::warn!("Using in-memory storage; nothing survives a restart");
                let store = Arc::new(InMemoryStore::new(machine_id, node_id));
                Ok(Self {
                    db: None,
                    conversations: store.clone(),
                    messages: store.clone(),
                    users: store,
                })
            }
        }
    }
}

impl AppState {
    /// Wire the chat core and services over the given persistence.
    pub fn new(
        settings: Settings,
        db: Option<PgPool>,
        conversations: Arc<dyn ConversationRepository>,
        messages: Arc<dyn MessageRepository>,
        users: Arc<dyn UserDirectory>,
    ) -> Self {
        let authenticator = Arc::new(JwtAuthenticator::new(settings.jwt.clone()));
        let chat = Arc::new(ChatHub::new(
            authenticator,
            conversations.clone(),
            messages.clone(),
            settings.websocket.clone(),
            settings.chat.clone(),
        ));
        let service = Arc::new(ConversationServiceImpl::new(
            conversations,
            messages,
            users,
            settings.chat.clone(),
        ));

        Self {
            db,
            chat,
            conversations: service,
            settings: Arc::new(settings),
        }
    }
}

/// Application instance
pub struct Application {
    listener: TcpListener,
    router: Router,
    state: AppState,
    reaper: JoinHandle<()>,
}

impl Application {
    /// Build the application from settings
    pub async fn build(settings: Settings) -> Result<Self> {
        handlers::health::init_server_start();

        let storage = Storage::connect(&settings).await?;
        let state = AppState::new(
            settings.clone(),
            storage.db,
            storage.conversations,
            storage.messages,
            storage.users,
        );

        // Heartbeat timeouts for connections whose socket went quiet
        let reaper = state.chat.spawn_reaper();

        // Build router with middleware
        let router = routes::create_router(state.clone())
            .layer(logging::create_trace_layer())
            .layer(cors::create_cors_layer(&settings.cors));

        // Bind to address
        let addr = settings.server.socket_addr()?;
        let listener = TcpListener::bind(addr).await?;
        tracing::info!("Listening on {}", listener.local_addr()?);

        Ok(Self {
            listener,
            router,
            state,
            reaper,
        })
    }

    /// Run the server until stopped
    pub async fn run_until_stopped(self) -> Result<()> {
        let Self {
            listener,
            router,
            state,
            reaper,
        } = self;

        axum::serve(listener, router)
            .with_graceful_shutdown(shutdown_signal())
            .await?;

        reaper.abort();
        state.chat.shutdown();
        Ok(())
    }

    /// Get the bound address
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn state(&self) -> &AppState {
        &self.state
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
