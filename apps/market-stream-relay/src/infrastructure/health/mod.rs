//! Health Check and Metrics Endpoint
//!
//! HTTP routes served alongside the relay's WebSocket upgrade route.
//!
//! # Endpoints
//!
//! - `GET /health` - Static liveness payload `{"status":"ok"}`
//! - `GET /metrics` - Prometheus metrics in text format

use axum::{Json, Router, http::StatusCode, response::IntoResponse, routing::get};
use serde::Serialize;

use crate::infrastructure::metrics::get_metrics_handle;

/// Health check response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct HealthResponse {
    /// Always `"ok"` while the process serves requests.
    pub status: &'static str,
}

/// Router with the health and metrics endpoints.
pub fn health_routes<S>() -> Router<S>
where
    S: Clone + Send + Sync + 'static,
{
    Router::new()
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
}

async fn health_handler() -> impl IntoResponse {
    (StatusCode::OK, Json(HealthResponse { status: "ok" }))
}

async fn metrics_handler() -> impl IntoResponse {
    get_metrics_handle().map_or_else(
        || {
            (
                StatusCode::SERVICE_UNAVAILABLE,
                [("content-type", "text/plain")],
                "Metrics not initialized".to_string(),
            )
        },
        |handle| {
            let body = handle.render();
            (
                StatusCode::OK,
                [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
                body,
            )
        },
    )
}

// =============================================================================
// Tests
// =============================================================================
