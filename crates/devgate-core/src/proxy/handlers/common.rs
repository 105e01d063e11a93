//! Utility endpoints: health, telemetry snapshot, metrics exposition.

use crate::proxy::server::AppState;
use axum::{
    extract::State,
    http::header,
    response::{IntoResponse, Json},
};
use serde_json::json;

pub async fn handle_health() -> impl IntoResponse {
    Json(json!({ "status": "ok" }))
}

pub async fn handle_stats(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.monitor.snapshot().await)
}

pub async fn handle_metrics() -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        crate::proxy::prometheus::render_metrics(),
    )
}
