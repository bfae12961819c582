//! # Marketplace Chat
//!
//! Real-time buyer/seller chat server for the pet marketplace.
//!
//! This is the application entry point that initializes:
//! - Tracing/logging subsystem
//! - Configuration loading
//! - Persistence (PostgreSQL or in-memory)
//! - HTTP/WebSocket server

use anyhow::Result;
use tracing::info;

use marketplace_chat::config::Settings;
use marketplace_chat::startup::Application;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing subscriber for structured logging
    marketplace_chat::telemetry::init_tracing();

    info!("Starting Marketplace Chat...");

    // Load configuration from environment and config files
    let settings = Settings::load()?;
    info!(
        host = %settings.server.host,
        port = %settings.server.port,
        environment = %settings.environment,
        backend = ?settings.database.backend,
        "Configuration loaded"
    );

    // Build and run the application
    let application = Application::build(settings).await?;

    info!("Server ready to accept connections");
    application.run_until_stopped().await?;

    Ok(())
}
