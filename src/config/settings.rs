//! Application settings and configuration structures.

use std::time::Duration;

use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

/// Root configuration structure containing all application settings.
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    /// Server configuration (host, port)
    pub server: ServerSettings,

    /// Persistence configuration
    pub database: DatabaseSettings,

    /// JWT authentication settings
    pub jwt: JwtSettings,

    /// Snowflake ID generator settings
    pub snowflake: SnowflakeSettings,

    /// CORS configuration
    pub cors: CorsSettings,

    /// WebSocket configuration
    pub websocket: WebSocketSettings,

    /// Chat core tuning
    pub chat: ChatSettings,

    /// Current environment (development, staging, production)
    pub environment: String,
}

/// Server binding configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerSettings {
    /// Host address to bind to (e.g., "0.0.0.0")
    pub host: String,

    /// Port number to listen on
    pub port: u16,
}

/// Which persistence implementation backs the chat core.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    Postgres,
    Memory,
}

/// Persistence configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseSettings {
    /// Storage backend
    pub backend: StorageBackend,

    /// Database connection URL (required for the postgres backend)
    #[serde(default)]
    pub url: String,

    /// Maximum number of connections in the pool
    pub max_connections: u32,

    /// Minimum number of connections to maintain
    pub min_connections: u32,

    /// Connection acquire timeout in seconds
    pub acquire_timeout: u64,

    /// Run pending migrations on startup
    pub run_migrations: bool,
}

/// JWT authentication configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct JwtSettings {
    /// Secret key for verifying tokens
    pub secret: String,

    /// Access token expiry in minutes (used when issuing development tokens)
    pub access_token_expiry_minutes: i64,
}

/// Snowflake ID generator configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct SnowflakeSettings {
    /// Machine/worker ID (0-31)
    pub machine_id: u16,

    /// Node ID (0-31)
    pub node_id: u16,
}

/// CORS configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct CorsSettings {
    /// Allowed origins (comma-separated in env)
    pub allowed_origins: Vec<String>,
}

/// WebSocket configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct WebSocketSettings {
    /// Maximum message size in bytes (default: 64KB)
    pub max_message_size: usize,

    /// Maximum frame size in bytes (default: 16KB)
    pub max_frame_size: usize,

    /// Heartbeat interval advertised to clients in milliseconds (default: 25000)
    pub heartbeat_interval_ms: u64,

    /// Silence after which a connection is torn down (default: 60000)
    pub heartbeat_timeout_ms: u64,

    /// Connection timeout for identify in seconds (default: 30)
    pub identify_timeout_secs: u64,

    /// Per-connection outbound queue capacity (default: 256)
    pub outbound_queue_capacity: usize,
}

/// Chat core configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ChatSettings {
    /// Typing indicator quiescence window in milliseconds (default: 3000)
    pub typing_expiry_ms: u64,

    /// Maximum message content length in characters (default: 4000)
    pub max_content_length: usize,

    /// History page size when the client does not ask for one (default: 50)
    pub default_page_size: u32,

    /// Upper bound for requested history page sizes (default: 100)
    pub max_page_size: u32,
}

/// Minimum required length for JWT secret (256 bits = 32 bytes)
pub const MIN_JWT_SECRET_LENGTH: usize = 32;

impl Settings {
    /// Load settings from environment variables and configuration files.
    ///
    /// The loading order is:
    /// 1. config/default.toml (base configuration)
    /// 2. config/{RUN_ENV}.toml (environment-specific overrides)
    /// 3. Environment variables (highest priority)
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if configuration cannot be loaded or parsed,
    /// or if a value fails validation.
    pub fn load() -> Result<Self, ConfigError> {
        // Load .env file if present (ignore errors if not found)
        let _ = dotenvy::dotenv();

        let environment = std::env::var("RUN_ENV").unwrap_or_else(|_| "development".into());

        Self::builder(&environment)?
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name(&format!("config/{}", environment)).required(false))
            // APP__SERVER__PORT=3000 -> server.port = 3000
            .add_source(
                Environment::default()
                    .prefix("APP")
                    .separator("__")
                    .try_parsing(true),
            )
            .set_override_option("server.host", std::env::var("SERVER_HOST").ok())?
            .set_override_option("server.port", std::env::var("SERVER_PORT").ok())?
            .set_override_option("database.url", std::env::var("DATABASE_URL").ok())?
            .set_override_option("jwt.secret", std::env::var("JWT_SECRET").ok())?
            .set_override_option(
                "snowflake.machine_id",
                std::env::var("SNOWFLAKE_MACHINE_ID").ok(),
            )?
            .build()?
            .try_deserialize()
            .and_then(Self::validate)
    }

    /// Builder pre-populated with every default value.
    pub fn builder(
        environment: &str,
    ) -> Result<config::ConfigBuilder<config::builder::DefaultState>, ConfigError> {
        Config::builder()
            .set_default("environment", environment)?
            .set_default("server.host", "0.0.0.0")?
            .set_default("server.port", 3000)?
            .set_default("database.backend", "postgres")?
            .set_default("database.max_connections", 10)?
            .set_default("database.min_connections", 2)?
            .set_default("database.acquire_timeout", 30)?
            .set_default("database.run_migrations", true)?
            .set_default("jwt.access_token_expiry_minutes", 60)?
            .set_default("snowflake.machine_id", 1)?
            .set_default("snowflake.node_id", 0)?
            .set_default("cors.allowed_origins", vec!["http://localhost:5173"])?
            .set_default("websocket.max_message_size", 65536_i64)? // 64KB
            .set_default("websocket.max_frame_size", 16384_i64)? // 16KB
            .set_default("websocket.heartbeat_interval_ms", 25000_i64)?
            .set_default("websocket.heartbeat_timeout_ms", 60000_i64)?
            .set_default("websocket.identify_timeout_secs", 30_i64)?
            .set_default("websocket.outbound_queue_capacity", 256_i64)?
            .set_default("chat.typing_expiry_ms", 3000_i64)?
            .set_default("chat.max_content_length", 4000_i64)?
            .set_default("chat.default_page_size", 50_i64)?
            .set_default("chat.max_page_size", 100_i64)
    }

    fn validate(settings: Self) -> Result<Self, ConfigError> {
        if settings.jwt.secret.len() < MIN_JWT_SECRET_LENGTH {
            return Err(ConfigError::Message(format!(
                "JWT secret must be at least {} characters for security. Current length: {}",
                MIN_JWT_SECRET_LENGTH,
                settings.jwt.secret.len()
            )));
        }
        if settings.database.backend == StorageBackend::Postgres && settings.database.url.is_empty() {
            return Err(ConfigError::Message(
                "database.url is required for the postgres backend".into(),
            ));
        }
        if settings.websocket.heartbeat_timeout_ms <= settings.websocket.heartbeat_interval_ms {
            return Err(ConfigError::Message(
                "websocket.heartbeat_timeout_ms must exceed heartbeat_interval_ms".into(),
            ));
        }
        if settings.websocket.outbound_queue_capacity == 0 {
            return Err(ConfigError::Message(
                "websocket.outbound_queue_capacity must be at least 1".into(),
            ));
        }
        if settings.chat.default_page_size == 0
            || settings.chat.default_page_size > settings.chat.max_page_size
        {
            return Err(ConfigError::Message(
                "chat.default_page_size must be between 1 and chat.max_page_size".into(),
            ));
        }
        Ok(settings)
    }

    /// Get the full server address as a string.
    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

impl ServerSettings {
    /// Get the socket address for binding.
    pub fn socket_addr(&self) -> Result<std::net::SocketAddr, std::net::AddrParseError> {
        format!("{}:{}", self.host, self.port).parse()
    }
}

impl WebSocketSettings {
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    pub fn heartbeat_timeout(&self) -> Duration {
        Duration::from_millis(self.heartbeat_timeout_ms)
    }

    pub fn identify_timeout(&self) -> Duration {
        Duration::from_secs(self.identify_timeout_secs)
    }
}

impl ChatSettings {
    pub fn typing_expiry(&self) -> Duration {
        Duration::from_millis(self.typing_expiry_ms)
    }

    /// Clamp a requested page size into `1..=max_page_size`.
    pub fn page_size(&self, requested: Option<u32>) -> u32 {
        requested
            .unwrap_or(self.default_page_size)
            .clamp(1, self.max_page_size)
    }
}

impl Default for WebSocketSettings {
    fn default() -> Self {
        Self {
            max_message_size: 65536,
            max_frame_size: 16384,
            heartbeat_interval_ms: 25000,
            heartbeat_timeout_ms: 60000,
            identify_timeout_secs: 30,
            outbound_queue_capacity: 256,
        }
    }
}

impl Default for ChatSettings {
    fn default() -> Self {
        Self {
            typing_expiry_ms: 3000,
            max_content_length: 4000,
            default_page_size: 50,
            max_page_size: 100,
        }
    }
}
