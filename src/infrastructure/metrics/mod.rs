//! Prometheus Metrics Module
//!
//! Provides application-wide metrics collection using Prometheus.
//!
//! # Metrics Collected
//! - HTTP request counts and latency
//! - Active gateway connections
//! - Messages routed, rejected, and per-recipient delivery failures
//! - Typing broadcasts and unread increments
//! - Database query duration histograms

use once_cell::sync::Lazy;
use prometheus::{
    Encoder, GaugeVec, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, Opts, Registry,
    TextEncoder,
};

const NAMESPACE: &str = "marketplace_chat";

/// Global metrics registry
pub static REGISTRY: Lazy<Registry> = Lazy::new(|| {
    let registry = Registry::new();
    register_metrics(&registry);
    registry
});

/// HTTP request counter - tracks total requests by method, path, and status code
pub static HTTP_REQUESTS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("http_requests_total", "Total number of HTTP requests").namespace(NAMESPACE),
        &["method", "path", "status"],
    )
    .expect("Failed to create HTTP_REQUESTS_TOTAL metric")
});

/// HTTP request latency histogram - tracks request duration in seconds
pub static HTTP_REQUEST_DURATION_SECONDS: Lazy<HistogramVec> = Lazy::new(|| {
    let buckets = vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0];
    HistogramVec::new(
        HistogramOpts::new(
            "http_request_duration_seconds",
            "HTTP request latency in seconds",
        )
        .namespace(NAMESPACE)
        .buckets(buckets),
        &["method", "path"],
    )
    .expect("Failed to create HTTP_REQUEST_DURATION_SECONDS metric")
});

/// Active gateway connections gauge
pub static WEBSOCKET_CONNECTIONS_ACTIVE: Lazy<GaugeVec> = Lazy::new(|| {
    GaugeVec::new(
        Opts::new(
            "websocket_connections_active",
            "Number of active WebSocket connections",
        )
        .namespace(NAMESPACE),
        &["state"], // "connected", "in_room"
    )
    .expect("Failed to create WEBSOCKET_CONNECTIONS_ACTIVE metric")
});

/// Connections closed, by reason
pub static CONNECTIONS_CLOSED_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("connections_closed_total", "Connections closed by reason").namespace(NAMESPACE),
        &["reason"],
    )
    .expect("Failed to create CONNECTIONS_CLOSED_TOTAL metric")
});

/// Messages persisted and fanned out
pub static MESSAGES_ROUTED_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::with_opts(
        Opts::new("messages_routed_total", "Messages persisted and fanned out").namespace(NAMESPACE),
    )
    .expect("Failed to create MESSAGES_ROUTED_TOTAL metric")
});

/// Sends rejected, by cause
pub static MESSAGES_REJECTED_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("messages_rejected_total", "Sends rejected before fan-out").namespace(NAMESPACE),
        &["cause"],
    )
    .expect("Failed to create MESSAGES_REJECTED_TOTAL metric")
});

/// Per-recipient deliveries, by outcome
pub static DELIVERIES_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("deliveries_total", "Per-recipient message deliveries").namespace(NAMESPACE),
        &["outcome"], // "delivered", "failed"
    )
    .expect("Failed to create DELIVERIES_TOTAL metric")
});

pub static TYPING_BROADCASTS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("typing_broadcasts_total", "Typing signals broadcast").namespace(NAMESPACE),
        &["state"], // "start", "stop"
    )
    .expect("Failed to create TYPING_BROADCASTS_TOTAL metric")
});

pub static UNREAD_INCREMENTS_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::with_opts(
        Opts::new("unread_increments_total", "Unread counter increments").namespace(NAMESPACE),
    )
    .expect("Failed to create UNREAD_INCREMENTS_TOTAL metric")
});

/// Database query duration histogram
pub static DB_QUERY_DURATION_SECONDS: Lazy<HistogramVec> = Lazy::new(|| {
    let buckets = vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5];
    HistogramVec::new(
        HistogramOpts::new(
            "db_query_duration_seconds",
            "Database query latency in seconds",
        )
        .namespace(NAMESPACE)
        .buckets(buckets),
        &["operation", "table"],
    )
    .expect("Failed to create DB_QUERY_DURATION_SECONDS metric")
});

/// Database connection pool stats
pub static DB_POOL_CONNECTIONS: Lazy<GaugeVec> = Lazy::new(|| {
    GaugeVec::new(
        Opts::new("db_pool_connections", "Database connection pool statistics").namespace(NAMESPACE),
        &["state"], // "idle", "active", "max"
    )
    .expect("Failed to create DB_POOL_CONNECTIONS metric")
});

/// Register all metrics with the registry
fn register_metrics(registry: &Registry) {
    let collectors: Vec<Box<dyn prometheus::core::Collector>> = vec![
        Box::new(HTTP_REQUESTS_TOTAL.clone()),
        Box::new(HTTP_REQUEST_DURATION_SECONDS.clone()),
        Box::new(WEBSOCKET_CONNECTIONS_ACTIVE.clone()),
        Box::new(CONNECTIONS_CLOSED_TOTAL.clone()),
        Box::new(MESSAGES_ROUTED_TOTAL.clone()),
        Box::new(MESSAGES_REJECTED_TOTAL.clone()),
        Box::new(DELIVERIES_TOTAL.clone()),
        Box::new(TYPING_BROADCASTS_TOTAL.clone()),
        Box::new(UNREAD_INCREMENTS_TOTAL.clone()),
        Box::new(DB_QUERY_DURATION_SECONDS.clone()),
        Box::new(DB_POOL_CONNECTIONS.clone()),
    ];
    for collector in collectors {
        if let Err(e) = registry.register(collector) {
            tracing::error!(error = %e, "Failed to register metric");
        }
    }
}

/// Collect and encode all metrics as Prometheus text format
pub fn gather_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::error!(error = %e, "Failed to encode metrics");
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}

/// Helper to record HTTP request metrics
pub fn record_http_request(method: &str, path: &str, status: u16, duration_secs: f64) {
    HTTP_REQUESTS_TOTAL
        .with_label_values(&[method, path, &status.to_string()])
        .inc();
    HTTP_REQUEST_DURATION_SECONDS
        .with_label_values(&[method, path])
        .observe(duration_secs);
}

/// Helper to record database query metrics
pub fn record_db_query(operation: &str, table: &str, duration_secs: f64) {
    DB_QUERY_DURATION_SECONDS
        .with_label_values(&[operation, table])
        .observe(duration_secs);
}

/// Helper to update database pool stats
pub fn update_db_pool_stats(idle: u32, active: u32, max: u32) {
    DB_POOL_CONNECTIONS
        .with_label_values(&["idle"])
        .set(idle as f64);
    DB_POOL_CONNECTIONS
        .with_label_values(&["active"])
        .set(active as f64);
    DB_POOL_CONNECTIONS
        .with_label_values(&["max"])
        .set(max as f64);
}

/// Helper to update gateway connection counts
pub fn set_websocket_connections(connected: i64, in_room: i64) {
    WEBSOCKET_CONNECTIONS_ACTIVE
        .with_label_values(&["connected"])
        .set(connected as f64);
    WEBSOCKET_CONNECTIONS_ACTIVE
        .with_label_values(&["in_room"])
        .set(in_room as f64);
}

pub fn record_connection_closed(reason: &str) {
    CONNECTIONS_CLOSED_TOTAL.with_label_values(&[reason]).inc();
}

/// One message fanned out: `delivered` and `failed` count recipients.
pub fn record_message_routed(delivered: usize, failed: usize) {
    MESSAGES_ROUTED_TOTAL.inc();
    DELIVERIES_TOTAL
        .with_label_values(&["delivered"])
        .inc_by(delivered as u64);
    DELIVERIES_TOTAL
        .with_label_values(&["failed"])
        .inc_by(failed as u64);
}

pub fn record_message_rejected(cause: &str) {
    MESSAGES_REJECTED_TOTAL.with_label_values(&[cause]).inc();
}

pub fn record_typing_broadcast(is_typing: bool) {
    let state = if is_typing { "start" } else { "stop" };
    TYPING_BROADCASTS_TOTAL.with_label_values(&[state]).inc();
}

pub fn record_unread_increment() {
    UNREAD_INCREMENTS_TOTAL.inc();
}
