//! CORS Middleware Configuration
//!
//! Browsers only reach the gateway upgrade, health and metrics routes, all
//! of them `GET`.

use std::time::Duration;

use axum::http::{header, HeaderValue, Method};
use tower_http::cors::{Any, CorsLayer};

use crate::config::CorsSettings;

/// Create CORS layer from settings
///
/// An empty (or entirely unparsable) origin list allows any origin, which is
/// only meant for local development.
pub fn create_cors_layer(settings: &CorsSettings) -> CorsLayer {
    let layer = CorsLayer::new()
        .allow_methods([Method::GET, Method::OPTIONS])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE])
        .max_age(Duration::from_secs(3600));

    let origins = parse_origins(&settings.allowed_origins);
    if origins.is_empty() {
        tracing::warn!("No valid CORS origins configured; allowing any origin");
        layer.allow_origin(Any)
    } else {
        layer.allow_origin(origins)
    }
}

fn parse_origins(configured: &[String]) -> Vec<HeaderValue> {
    configured
        .iter()
        .filter_map(|origin| match origin.parse::<HeaderValue>() {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!(origin = %origin, "Ignoring invalid CORS origin");
                None
            }
        })
        .collect()
}
