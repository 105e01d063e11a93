//! Gateway API-key authentication.
//!
//! Clients present the key via `x-api-key` or `Authorization: Bearer`.
//! An empty configured key disables the check. Health, stats, and metrics
//! endpoints are always open.

use crate::proxy::server::AppState;
use axum::{
    extract::{Request, State},
    http::{header, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

pub async fn auth_middleware(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    let method = request.method().clone();
    let path = request.uri().path().to_string();

    let is_open = matches!(path.as_str(), "/health" | "/stats" | "/metrics");
    if is_open {
        tracing::trace!("Open endpoint: {} {}", method, path);
        return next.run(request).await;
    }
    tracing::info!("Request: {} {}", method, path);

    if method == axum::http::Method::OPTIONS {
        return next.run(request).await;
    }

    if !state.config.auth_enabled() {
        return next.run(request).await;
    }

    let presented = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .and_then(|s| s.strip_prefix("Bearer ").or(Some(s)))
        .or_else(|| {
            request.headers().get("x-api-key").and_then(|h| h.to_str().ok())
        });

    if presented.is_some_and(|k| k == state.config.api_key) {
        next.run(request).await
    } else {
        unauthorized_response(&path)
    }
}

/// 401 body in the dialect the caller speaks.
fn unauthorized_response(path: &str) -> Response {
    let body = if path.starts_with("/v1/messages") {
        json!({
            "type": "error",
            "error": { "type": "authentication_error", "message": "Invalid API key" }
        })
    } else {
        json!({
            "error": { "type": "authentication_error", "message": "Invalid API key" }
        })
    };
    (StatusCode::UNAUTHORIZED, Json(body)).into_response()
}
