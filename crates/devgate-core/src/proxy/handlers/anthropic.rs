//! Anthropic Messages endpoint handlers.

use crate::error::AppError;
use crate::proxy::common::image_strip::{anthropic_has_image, strip_images_anthropic};
use crate::proxy::common::token_count::count_request_tokens;
use crate::proxy::common::user_label::user_label;
use crate::proxy::mappers::anthropic::models::AnthropicRequest;
use crate::proxy::mappers::anthropic::{
    create_anthropic_sse_stream, transform_anthropic_request, transform_response,
    StreamTranslator,
};
use crate::proxy::mappers::openai::models::OpenAIResponse;
use crate::proxy::monitor::UsageRecord;
use crate::proxy::server::AppState;
use crate::proxy::upstream::client::compose_auth;
use crate::proxy::upstream::peek::peek_first_chunk;
use crate::proxy::upstream::selector::{select_backend, BackendKind};
use crate::proxy::prometheus;
use axum::{
    body::Body,
    extract::{Json, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use bytes::Bytes;
use futures::StreamExt;
use serde_json::{json, Value};
use std::time::Instant;

const ENDPOINT: &str = "/v1/messages";

pub async fn handle_messages(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    let started = Instant::now();
    let trace_id = generate_trace_id();
    let inbound_auth =
        headers.get(header::AUTHORIZATION).and_then(|h| h.to_str().ok()).map(|s| s.to_string());
    let user = user_label(inbound_auth.as_deref());

    let mut request: AnthropicRequest = match serde_json::from_value(body) {
        Ok(r) => r,
        Err(e) => return validation_error(&user, started, format!("Invalid request body: {e}")),
    };
    if request.model.is_empty() {
        return validation_error(&user, started, "model is required".to_string());
    }

    let client_model = request.model.clone();
    let has_image = anthropic_has_image(&request.messages);
    let (backend, kind) = select_backend(&state.config, has_image);
    let vision = kind == BackendKind::Vision;

    tracing::debug!(
        "[{}] model={} stream={} backend={} has_image={}",
        trace_id,
        client_model,
        request.stream,
        kind.as_str(),
        has_image
    );

    if has_image && !vision {
        request.messages = strip_images_anthropic(request.messages);
    }

    let openai_req = match transform_anthropic_request(&request, &backend.model, vision) {
        Ok(r) => r,
        Err(AppError::Validation(msg)) => return validation_error(&user, started, msg),
        Err(e) => return api_error(&user, &client_model, started, e.to_string()),
    };

    let body_value = match serde_json::to_value(&openai_req) {
        Ok(v) => v,
        Err(e) => {
            return api_error(&user, &client_model, started, format!("Serialization error: {e}"))
        }
    };

    let auth = compose_auth(backend, inbound_auth.as_deref());
    let url = backend.chat_completions_url();

    if request.stream {
        let estimate = count_request_tokens(&request);
        let byte_stream = match state.upstream.stream(&url, &body_value, auth.as_deref()).await {
            Ok(s) => s,
            Err(e) => return backend_error(&state, &user, &client_model, started, e).await,
        };

        // Hold the 200 and SSE headers until the first body byte is in hand;
        // a stream that dies before that still gets a proper HTTP error.
        let byte_stream = match peek_first_chunk(byte_stream, &trace_id).await {
            Ok(s) => s,
            Err(e) => return backend_error(&state, &user, &client_model, started, e).await,
        };

        let message_id = format!("msg_{}", uuid::Uuid::new_v4().simple());
        let translator =
            StreamTranslator::new(message_id, client_model.clone(), &backend.model, estimate);
        let translated = create_anthropic_sse_stream(byte_stream, translator, trace_id.clone());

        let ctx = StreamObserver {
            state: state.clone(),
            user,
            model: client_model,
            started,
            estimate,
        };
        build_sse_response(observe_stream(translated, ctx))
    } else {
        let response_value = match state.upstream.call(&url, &body_value, auth.as_deref()).await {
            Ok(v) => v,
            Err(e) => return backend_error(&state, &user, &client_model, started, e).await,
        };

        let openai_resp: OpenAIResponse = match serde_json::from_value(response_value) {
            Ok(r) => r,
            Err(e) => {
                return api_error(
                    &user,
                    &client_model,
                    started,
                    format!("Unexpected upstream response shape: {e}"),
                )
            }
        };

        let anthropic_resp = transform_response(&openai_resp, &client_model);

        record_success(
            &state,
            &user,
            &client_model,
            started,
            anthropic_resp.usage.input_tokens,
            anthropic_resp.usage.output_tokens,
        )
        .await;

        tracing::info!(
            "[{}] Request finished. Model: {}, Tokens: In {}, Out {}",
            trace_id,
            client_model,
            anthropic_resp.usage.input_tokens,
            anthropic_resp.usage.output_tokens
        );

        Json(anthropic_resp).into_response()
    }
}

/// Count input tokens without calling the backend.
pub async fn handle_count_tokens(Json(body): Json<Value>) -> Response {
    let request: AnthropicRequest = match serde_json::from_value(body) {
        Ok(r) => r,
        Err(e) => {
            return (
                StatusCode::BAD_REQUEST,
                Json(json!({
                    "type": "error",
                    "error": {
                        "type": "invalid_request_error",
                        "message": format!("Invalid request body: {e}")
                    }
                })),
            )
                .into_response()
        }
    };

    Json(json!({ "input_tokens": count_request_tokens(&request) })).into_response()
}

fn generate_trace_id() -> String {
    format!("req_{}", uuid::Uuid::new_v4().simple())
}

struct StreamObserver {
    state: AppState,
    user: String,
    model: String,
    started: Instant,
    estimate: u32,
}

/// Forward translated frames while watching for the final `message_delta`
/// usage, then record metrics when the stream ends. Errors from the
/// translation layer become a terminal SSE error event.
fn observe_stream(
    mut translated: std::pin::Pin<
        Box<dyn futures::Stream<Item = Result<Bytes, String>> + Send>,
    >,
    ctx: StreamObserver,
) -> impl futures::Stream<Item = Result<Bytes, std::convert::Infallible>> + Send {
    async_stream::stream! {
        let mut usage: Option<(u32, u32)> = None;
        let mut errored = false;

        while let Some(item) = translated.next().await {
            match item {
                Ok(frame) => {
                    if let Some(u) = extract_message_delta_usage(&frame) {
                        usage = Some(u);
                    }
                    yield Ok(frame);
                }
                Err(e) => {
                    errored = true;
                    let event = format!(
                        "event: error\ndata: {}\n\n",
                        json!({
                            "type": "error",
                            "error": { "type": "api_error", "message": e }
                        })
                    );
                    yield Ok(Bytes::from(event));
                    break;
                }
            }
        }

        let (input_tokens, output_tokens) = usage.unwrap_or((ctx.estimate, 0));
        let status = if errored { "error" } else { "ok" };
        let duration_ms = ctx.started.elapsed().as_millis() as u64;

        prometheus::record_request(&ctx.user, &ctx.model, ENDPOINT, status, duration_ms);
        prometheus::record_tokens(
            &ctx.user,
            &ctx.model,
            u64::from(input_tokens),
            u64::from(output_tokens),
        );
        ctx.state
            .monitor
            .record(usage_record(&ctx.user, &ctx.model, status, input_tokens, output_tokens, duration_ms))
            .await;
    }
}

/// Pull `usage` out of a serialized `message_delta` frame.
fn extract_message_delta_usage(frame: &Bytes) -> Option<(u32, u32)> {
    let text = std::str::from_utf8(frame).ok()?;
    if !text.starts_with("event: message_delta") {
        return None;
    }
    let data = text.lines().find_map(|l| l.strip_prefix("data: "))?;
    let value: Value = serde_json::from_str(data).ok()?;
    let usage = value.get("usage")?;
    Some((
        usage.get("input_tokens")?.as_u64()? as u32,
        usage.get("output_tokens")?.as_u64()? as u32,
    ))
}

fn build_sse_response<S>(stream: S) -> Response
where
    S: futures::Stream<Item = Result<Bytes, std::convert::Infallible>> + Send + 'static,
{
    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "text/event-stream")
        .header(header::CACHE_CONTROL, "no-cache")
        .header(header::CONNECTION, "keep-alive")
        .body(Body::from_stream(stream))
        .unwrap_or_else(|e| {
            tracing::error!("Failed to build SSE response: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, "Internal streaming setup error").into_response()
        })
}

fn usage_record(
    user: &str,
    model: &str,
    status: &str,
    input_tokens: u32,
    output_tokens: u32,
    duration_ms: u64,
) -> UsageRecord {
    UsageRecord {
        id: uuid::Uuid::new_v4().to_string(),
        timestamp: chrono::Utc::now(),
        endpoint: ENDPOINT.to_string(),
        model: model.to_string(),
        user: user.to_string(),
        status: status.to_string(),
        input_tokens,
        output_tokens,
        duration_ms,
    }
}

async fn record_success(
    state: &AppState,
    user: &str,
    model: &str,
    started: Instant,
    input_tokens: u32,
    output_tokens: u32,
) {
    let duration_ms = started.elapsed().as_millis() as u64;
    prometheus::record_request(user, model, ENDPOINT, "ok", duration_ms);
    prometheus::record_tokens(user, model, u64::from(input_tokens), u64::from(output_tokens));
    state
        .monitor
        .record(usage_record(user, model, "ok", input_tokens, output_tokens, duration_ms))
        .await;
}

fn validation_error(user: &str, started: Instant, message: String) -> Response {
    prometheus::record_request(
        user,
        "unknown",
        ENDPOINT,
        "error",
        started.elapsed().as_millis() as u64,
    );
    (
        StatusCode::BAD_REQUEST,
        Json(json!({
            "type": "error",
            "error": { "type": "invalid_request_error", "message": message }
        })),
    )
        .into_response()
}

fn api_error(user: &str, model: &str, started: Instant, message: String) -> Response {
    tracing::error!("Anthropic handler error: {}", message);
    prometheus::record_request(
        user,
        model,
        ENDPOINT,
        "error",
        started.elapsed().as_millis() as u64,
    );
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({
            "type": "error",
            "error": { "type": "api_error", "message": message }
        })),
    )
        .into_response()
}

async fn backend_error(
    state: &AppState,
    user: &str,
    model: &str,
    started: Instant,
    error: AppError,
) -> Response {
    let duration_ms = started.elapsed().as_millis() as u64;
    prometheus::record_request(user, model, ENDPOINT, "error", duration_ms);
    state
        .monitor
        .record(usage_record(user, model, "error", 0, 0, duration_ms))
        .await;

    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({
            "type": "error",
            "error": { "type": "api_error", "message": error.to_string() }
        })),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_delta_usage_is_extracted() {
        let frame = Bytes::from(
            "event: message_delta\ndata: {\"type\":\"message_delta\",\"delta\":{\"stop_reason\":\"end_turn\",\"stop_sequence\":null},\"usage\":{\"input_tokens\":7,\"output_tokens\":3}}\n\n",
        );
        assert_eq!(extract_message_delta_usage(&frame), Some((7, 3)));
    }

    #[test]
    fn other_frames_are_ignored() {
        let frame = Bytes::from(
            "event: content_block_delta\ndata: {\"type\":\"content_block_delta\"}\n\n",
        );
        assert_eq!(extract_message_delta_usage(&frame), None);
    }
}
