mod gateway_tests;
mod health_tests;
mod metrics_tests;
mod websocket_tests;
