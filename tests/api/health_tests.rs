//! Health Check API Tests

use serde_json::Value;

use crate::common::{TestApp, BUYER};

/// Test basic health check endpoint returns 200 OK
#[tokio::test]
async fn test_health_check_returns_ok() {
    let app = TestApp::new();
    let server = app.server();

    let response = server.get("/health").await;

    response.assert_status_ok();
    let json: Value = response.json();
    assert_eq!(json["status"], "healthy");
    assert!(json.get("version").is_some());
}

/// Test liveness probe endpoint
#[tokio::test]
async fn test_liveness_probe() {
    let app = TestApp::new();
    let server = app.server();

    let response = server.get("/health/live").await;

    response.assert_status_ok();
    assert_eq!(response.json::<Value>()["status"], "alive");
}

/// Readiness with the in-memory backend reports healthy storage
#[tokio::test]
async fn test_readiness_probe_in_memory() {
    let app = TestApp::new();
    let server = app.server();

    let response = server.get("/health/ready").await;

    response.assert_status_ok();
    let json: Value = response.json();
    assert_eq!(json["status"], "healthy");
    assert_eq!(json["checks"]["database"]["status"], "healthy");
    assert_eq!(json["checks"]["database"]["backend"], "memory");
    assert_eq!(json["checks"]["websocket"]["active_connections"], 0);
}

/// Readiness counts live chat connections
#[tokio::test]
async fn test_readiness_counts_connections() {
    let app = TestApp::new();
    let _session = app.connect(BUYER).await;
    let server = app.server();

    let json: Value = server.get("/health/ready").await.json();

    assert_eq!(json["checks"]["websocket"]["active_connections"], 1);
}

/// Unknown routes are not served
#[tokio::test]
async fn test_unknown_route_is_not_found() {
    let app = TestApp::new();
    let server = app.server();

    server.get("/api/v1/conversations").await.assert_status_not_found();
}
