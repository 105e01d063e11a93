//! OpenAI-protocol endpoint handlers: chat completions with Mistral
//! compatibility fixes, legacy completions passthrough, and the model list.

use crate::error::AppError;
use crate::proxy::common::image_strip::{openai_has_image, strip_images_openai};
use crate::proxy::common::user_label::user_label;
use crate::proxy::mappers::openai::models::OpenAIRequest;
use crate::proxy::mappers::openai::pipeline::apply_mistral_fixes;
use crate::proxy::monitor::UsageRecord;
use crate::proxy::prometheus;
use crate::proxy::server::AppState;
use crate::proxy::upstream::client::compose_auth;
use crate::proxy::upstream::peek::peek_first_chunk;
use crate::proxy::upstream::selector::{select_backend, BackendKind};
use axum::{
    body::Body,
    extract::{Json, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use futures::TryStreamExt;
use serde_json::{json, Value};
use std::time::Instant;

pub async fn handle_chat_completions(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    const ENDPOINT: &str = "/v1/chat/completions";
    let started = Instant::now();
    let inbound_auth =
        headers.get(header::AUTHORIZATION).and_then(|h| h.to_str().ok()).map(|s| s.to_string());
    let user = user_label(inbound_auth.as_deref());

    let mut request: OpenAIRequest = match serde_json::from_value(body) {
        Ok(r) => r,
        Err(e) => {
            prometheus::record_request(
                &user,
                "unknown",
                ENDPOINT,
                "error",
                started.elapsed().as_millis() as u64,
            );
            return openai_validation_error(format!("Invalid request body: {e}"));
        }
    };

    let has_image = openai_has_image(&request.messages);
    let (backend, kind) = select_backend(&state.config, has_image);
    if has_image && kind == BackendKind::Default {
        request.messages = strip_images_openai(request.messages);
    }

    // The backend serves exactly one model; the advertised name wins.
    request.model = backend.model.clone();
    let request = apply_mistral_fixes(request);
    let stream = request.stream;

    let body_value = match serde_json::to_value(&request) {
        Ok(v) => v,
        Err(e) => return openai_api_error(format!("Serialization error: {e}")),
    };

    let auth = compose_auth(backend, inbound_auth.as_deref());
    let url = backend.chat_completions_url();
    let model = backend.model.clone();

    if stream {
        let byte_stream = match state.upstream.stream(&url, &body_value, auth.as_deref()).await {
            Ok(s) => s,
            Err(e) => {
                record_error(&state, &user, &model, ENDPOINT, started).await;
                return openai_backend_error(e);
            }
        };

        // Hold the 200 and SSE headers until the first body byte is in hand.
        match peek_first_chunk(byte_stream, ENDPOINT).await {
            Ok(byte_stream) => {
                prometheus::record_request(
                    &user,
                    &model,
                    ENDPOINT,
                    "ok",
                    started.elapsed().as_millis() as u64,
                );
                // Same dialect on both sides: pipe the bytes through untouched.
                Response::builder()
                    .status(StatusCode::OK)
                    .header(header::CONTENT_TYPE, "text/event-stream")
                    .header(header::CACHE_CONTROL, "no-cache")
                    .header(header::CONNECTION, "keep-alive")
                    .body(Body::from_stream(byte_stream.map_err(std::io::Error::other)))
                    .unwrap_or_else(|e| {
                        tracing::error!("Failed to build SSE response: {}", e);
                        (StatusCode::INTERNAL_SERVER_ERROR, "Internal streaming setup error")
                            .into_response()
                    })
            }
            Err(e) => {
                record_error(&state, &user, &model, ENDPOINT, started).await;
                openai_backend_error(e)
            }
        }
    } else {
        match state.upstream.call(&url, &body_value, auth.as_deref()).await {
            Ok(response) => {
                let (input_tokens, output_tokens) = usage_from_value(&response);
                prometheus::record_request(
                    &user,
                    &model,
                    ENDPOINT,
                    "ok",
                    started.elapsed().as_millis() as u64,
                );
                prometheus::record_tokens(&user, &model, input_tokens, output_tokens);
                state
                    .monitor
                    .record(UsageRecord {
                        id: uuid::Uuid::new_v4().to_string(),
                        timestamp: chrono::Utc::now(),
                        endpoint: ENDPOINT.to_string(),
                        model: model.clone(),
                        user: user.clone(),
                        status: "ok".to_string(),
                        input_tokens: input_tokens as u32,
                        output_tokens: output_tokens as u32,
                        duration_ms: started.elapsed().as_millis() as u64,
                    })
                    .await;
                Json(response).into_response()
            }
            Err(e) => {
                record_error(&state, &user, &model, ENDPOINT, started).await;
                openai_backend_error(e)
            }
        }
    }
}

/// Legacy completions passthrough: the body is forwarded opaquely.
pub async fn handle_completions(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    const ENDPOINT: &str = "/v1/completions";
    let started = Instant::now();
    let inbound_auth =
        headers.get(header::AUTHORIZATION).and_then(|h| h.to_str().ok()).map(|s| s.to_string());
    let user = user_label(inbound_auth.as_deref());

    let backend = &state.config.backend;
    let auth = compose_auth(backend, inbound_auth.as_deref());
    let url = backend.completions_url();
    let stream = body.get("stream").and_then(|s| s.as_bool()).unwrap_or(false);

    if stream {
        let byte_stream = match state.upstream.stream(&url, &body, auth.as_deref()).await {
            Ok(s) => s,
            Err(e) => {
                record_error(&state, &user, &backend.model, ENDPOINT, started).await;
                return openai_backend_error(e);
            }
        };

        match peek_first_chunk(byte_stream, ENDPOINT).await {
            Ok(byte_stream) => {
                prometheus::record_request(
                    &user,
                    &backend.model,
                    ENDPOINT,
                    "ok",
                    started.elapsed().as_millis() as u64,
                );
                Response::builder()
                    .status(StatusCode::OK)
                    .header(header::CONTENT_TYPE, "text/event-stream")
                    .header(header::CACHE_CONTROL, "no-cache")
                    .header(header::CONNECTION, "keep-alive")
                    .body(Body::from_stream(byte_stream.map_err(std::io::Error::other)))
                    .unwrap_or_else(|_| {
                        (StatusCode::INTERNAL_SERVER_ERROR, "Internal streaming setup error")
                            .into_response()
                    })
            }
            Err(e) => {
                record_error(&state, &user, &backend.model, ENDPOINT, started).await;
                openai_backend_error(e)
            }
        }
    } else {
        match state.upstream.call(&url, &body, auth.as_deref()).await {
            Ok(response) => {
                prometheus::record_request(
                    &user,
                    &backend.model,
                    ENDPOINT,
                    "ok",
                    started.elapsed().as_millis() as u64,
                );
                Json(response).into_response()
            }
            Err(e) => {
                record_error(&state, &user, &backend.model, ENDPOINT, started).await;
                openai_backend_error(e)
            }
        }
    }
}

/// Single-item model list advertising the configured backend model.
pub async fn handle_list_models(State(state): State<AppState>) -> impl IntoResponse {
    Json(json!({
        "object": "list",
        "data": [{
            "id": state.config.backend.model,
            "object": "model",
            "created": chrono::Utc::now().timestamp(),
            "owned_by": "vllm"
        }]
    }))
}

fn usage_from_value(response: &Value) -> (u64, u64) {
    let usage = response.get("usage");
    let input =
        usage.and_then(|u| u.get("prompt_tokens")).and_then(|v| v.as_u64()).unwrap_or(0);
    let output =
        usage.and_then(|u| u.get("completion_tokens")).and_then(|v| v.as_u64()).unwrap_or(0);
    (input, output)
}

async fn record_error(
    state: &AppState,
    user: &str,
    model: &str,
    endpoint: &str,
    started: Instant,
) {
    let duration_ms = started.elapsed().as_millis() as u64;
    prometheus::record_request(user, model, endpoint, "error", duration_ms);
    state
        .monitor
        .record(UsageRecord {
            id: uuid::Uuid::new_v4().to_string(),
            timestamp: chrono::Utc::now(),
            endpoint: endpoint.to_string(),
            model: model.to_string(),
            user: user.to_string(),
            status: "error".to_string(),
            input_tokens: 0,
            output_tokens: 0,
            duration_ms,
        })
        .await;
}

fn openai_validation_error(message: String) -> Response {
    (
        StatusCode::BAD_REQUEST,
        Json(json!({
            "error": { "type": "invalid_request_error", "message": message }
        })),
    )
        .into_response()
}

fn openai_api_error(message: String) -> Response {
    tracing::error!("OpenAI handler error: {}", message);
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({
            "error": { "type": "api_error", "message": message }
        })),
    )
        .into_response()
}

fn openai_backend_error(error: AppError) -> Response {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({
            "error": { "type": "api_error", "message": error.to_string() }
        })),
    )
        .into_response()
}
