//! Health Check Handlers
//!
//! # Endpoints
//! - `GET /health` - Basic health check
//! - `GET /health/live` - Liveness probe (is the process serving?)
//! - `GET /health/ready` - Readiness probe (storage reachable, chat core up)

use std::time::Duration;

use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use serde::Serialize;

use crate::config::StorageBackend;
use crate::infrastructure::database;
use crate::startup::AppState;

/// Storage round trips slower than this report `degraded`.
const SLOW_STORAGE: Duration = Duration::from_millis(100);

static SERVER_START: Lazy<std::time::Instant> = Lazy::new(std::time::Instant::now);
static SERVER_START_TIME: Lazy<DateTime<Utc>> = Lazy::new(Utc::now);

/// Pin the start time; call once during startup.
pub fn init_server_start() {
    Lazy::force(&SERVER_START);
    Lazy::force(&SERVER_START_TIME);
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
}

#[derive(Debug, Serialize)]
pub struct LivenessResponse {
    pub status: &'static str,
}

#[derive(Debug, Serialize)]
pub struct ReadinessReport {
    pub status: HealthStatus,
    pub version: &'static str,
    pub uptime_seconds: u64,
    pub started_at: String,
    pub checks: ReadinessChecks,
}

#[derive(Debug, Serialize)]
pub struct ReadinessChecks {
    pub database: StorageCheck,
    pub websocket: GatewayCheck,
}

#[derive(Debug, Serialize)]
pub struct StorageCheck {
    pub status: HealthStatus,
    pub backend: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct GatewayCheck {
    pub status: HealthStatus,
    pub active_connections: usize,
    pub active_rooms: usize,
}

pub async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        version: env!("CARGO_PKG_VERSION"),
    })
}

pub async fn liveness() -> Json<LivenessResponse> {
    Json(LivenessResponse { status: "alive" })
}

/// 200 while storage answers (even slowly), 503 otherwise.
pub async fn readiness(State(state): State<AppState>) -> impl IntoResponse {
    let database = check_storage(&state).await;
    let websocket = GatewayCheck {
        status: HealthStatus::Healthy,
        active_connections: state.chat.connection_count(),
        active_rooms: state.chat.room_count(),
    };
    let status = overall_status(&[database.status, websocket.status]);

    let report = ReadinessReport {
        status,
        version: env!("CARGO_PKG_VERSION"),
        uptime_seconds: SERVER_START.elapsed().as_secs(),
        started_at: SERVER_START_TIME.to_rfc3339(),
        checks: ReadinessChecks {
            database,
            websocket,
        },
    };

    let code = if status == HealthStatus::Unhealthy {
        StatusCode::SERVICE_UNAVAILABLE
    } else {
        StatusCode::OK
    };
    (code, Json(report))
}

async fn check_storage(state: &AppState) -> StorageCheck {
    let Some(pool) = state.db.as_ref() else {
        return StorageCheck {
            status: HealthStatus::Healthy,
            backend: backend_name(StorageBackend::Memory),
            latency_ms: None,
            message: None,
        };
    };

    match database::ping(pool).await {
        Ok(latency) => StorageCheck {
            status: latency_status(latency),
            backend: backend_name(StorageBackend::Postgres),
            latency_ms: Some(latency.as_millis() as u64),
            message: None,
        },
        Err(e) => {
            tracing::warn!(error = %e, "Readiness database ping failed");
            StorageCheck {
                status: HealthStatus::Unhealthy,
                backend: backend_name(StorageBackend::Postgres),
                latency_ms: None,
                message: Some(format!("Database connection failed: {}", e)),
            }
        }
    }
}

fn backend_name(backend: StorageBackend) -> &'static str {
    match backend {
        StorageBackend::Postgres => "postgres",
        StorageBackend::Memory => "memory",
    }
}

fn latency_status(latency: Duration) -> HealthStatus {
    if latency < SLOW_STORAGE {
        HealthStatus::Healthy
    } else {
        HealthStatus::Degraded
    }
}

/// The worst individual status wins.
fn overall_status(checks: &[HealthStatus]) -> HealthStatus {
    checks.iter().copied().max().unwrap_or(HealthStatus::Healthy)
}
