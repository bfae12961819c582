//! Gateway Upgrade Tests

use axum::{body::Body, http::Request};
use tower::ServiceExt;

use crate::common::TestApp;

/// A plain GET without upgrade headers is refused before any chat state exists
#[tokio::test]
async fn test_gateway_requires_websocket_upgrade() {
    let app = TestApp::new();

    let response = app
        .router()
        .oneshot(
            Request::builder()
                .method("GET")
                .uri("/gateway")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert!(response.status().is_client_error());
    assert_eq!(app.hub().connection_count(), 0);
}

#[tokio::test]
async fn test_gateway_rejects_post() {
    let app = TestApp::new();

    let response = app
        .router()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/gateway")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), axum::http::StatusCode::METHOD_NOT_ALLOWED);
}
