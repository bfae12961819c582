//! Metrics Endpoint Tests

use crate::common::{TestApp, BUYER, SHOP};
use marketplace_chat::application::chat::OutgoingMessage;

#[tokio::test]
async fn test_metrics_exposed_in_text_format() {
    let app = TestApp::new();
    let server = app.server();

    // Produce at least one chat and one HTTP sample.
    let conversation = app.conversation(BUYER, SHOP).await;
    let buyer = app.connect(BUYER).await;
    app.hub().join(&buyer.connection, conversation).await.unwrap();
    app.hub()
        .send(&buyer.connection, OutgoingMessage::text(conversation, "is she vaccinated?"))
        .await
        .unwrap();
    server.get("/health").await.assert_status_ok();

    let response = server.get("/metrics").await;

    response.assert_status_ok();
    let body = response.text();
    assert!(body.contains("marketplace_chat_messages_routed_total"));
    assert!(body.contains("marketplace_chat_http_requests_total"));
}
