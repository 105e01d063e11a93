//! Normalization pipeline for straight OpenAI traffic.
//!
//! Requests arriving on `/v1/chat/completions` are already in the backend's
//! dialect but still trip over Mistral's tokenizer rules. Each step is a pure
//! `OpenAIRequest -> OpenAIRequest` function; the pipeline composes them in
//! order.

use super::models::{OpenAIMessage, OpenAIRequest, StreamOptions};
use crate::proxy::common::tool_id::normalize_request_tool_ids;
use crate::proxy::common::tool_name::sanitize_tool_name;

pub type Step = fn(OpenAIRequest) -> OpenAIRequest;

/// Run `req` through `steps` left to right.
pub fn pipe(req: OpenAIRequest, steps: &[Step]) -> OpenAIRequest {
    steps.iter().fold(req, |acc, step| step(acc))
}

/// The standard Mistral-compatibility pipeline.
pub fn apply_mistral_fixes(req: OpenAIRequest) -> OpenAIRequest {
    pipe(
        req,
        &[
            normalize_request_tool_ids,
            sanitize_tool_names,
            enforce_trailing_message,
            ensure_stream_usage,
        ],
    )
}

/// Mistral rejects function names outside `[a-zA-Z0-9_-]{1,64}`.
fn sanitize_tool_names(mut req: OpenAIRequest) -> OpenAIRequest {
    if let Some(tools) = req.tools.as_mut() {
        for tool in tools {
            tool.function.name = sanitize_tool_name(&tool.function.name);
        }
    }
    for msg in req.messages.iter_mut() {
        if let Some(calls) = msg.tool_calls.as_mut() {
            for call in calls {
                call.function.name = sanitize_tool_name(&call.function.name);
            }
        }
    }
    req
}

/// A conversation may not end on a bare assistant turn; a trailing tool
/// message is fine.
fn enforce_trailing_message(mut req: OpenAIRequest) -> OpenAIRequest {
    let needs_sentinel = matches!(
        req.messages.last(),
        Some(last) if last.role == "assistant" && last.tool_calls.is_none()
    );
    if needs_sentinel {
        req.messages.push(OpenAIMessage::text("user", "Continue."));
    }
    req
}

/// Streaming requests need usage in the final chunk so the proxy can report
/// token counts.
fn ensure_stream_usage(mut req: OpenAIRequest) -> OpenAIRequest {
    if req.stream && req.stream_options.is_none() {
        req.stream_options = Some(StreamOptions { include_usage: true });
    }
    req
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proxy::common::tool_id::is_normalized_tool_id;
    use serde_json::json;

    fn request(body: serde_json::Value) -> OpenAIRequest {
        serde_json::from_value(body).unwrap()
    }

    #[test]
    fn full_pipeline_normalizes_ids_and_appends_sentinel() {
        let req = request(json!({
            "model": "devstral-small",
            "messages": [
                {"role": "user", "content": "hi"},
                {"role": "assistant", "content": null, "tool_calls": [{
                    "id": "call_with_a_very_long_identifier",
                    "type": "function",
                    "function": {"name": "my tool!", "arguments": "{}"}
                }]},
                {"role": "tool", "tool_call_id": "call_with_a_very_long_identifier",
                 "content": "ok"},
                {"role": "assistant", "content": "done"}
            ]
        }));

        let out = apply_mistral_fixes(req);

        let call = &out.messages[1].tool_calls.as_ref().unwrap()[0];
        assert!(is_normalized_tool_id(&call.id));
        assert_eq!(call.function.name, "my_tool");
        assert_eq!(out.messages[2].tool_call_id.as_deref(), Some(call.id.as_str()));
        assert_eq!(out.messages.last().unwrap().role, "user");
    }

    #[test]
    fn trailing_tool_message_is_left_alone() {
        let req = request(json!({
            "model": "devstral-small",
            "messages": [
                {"role": "assistant", "content": null, "tool_calls": [{
                    "id": "abc123XYZ", "type": "function",
                    "function": {"name": "bash", "arguments": "{}"}
                }]},
                {"role": "tool", "tool_call_id": "abc123XYZ", "content": "ok"}
            ]
        }));

        let out = apply_mistral_fixes(req);
        assert_eq!(out.messages.last().unwrap().role, "tool");
    }

    #[test]
    fn stream_usage_is_requested() {
        let req = request(json!({
            "model": "devstral-small",
            "stream": true,
            "messages": [{"role": "user", "content": "hi"}]
        }));

        let out = apply_mistral_fixes(req);
        assert!(out.stream_options.unwrap().include_usage);
    }

    #[test]
    fn non_streaming_request_gains_no_stream_options() {
        let req = request(json!({
            "model": "devstral-small",
            "messages": [{"role": "user", "content": "hi"}]
        }));

        let out = apply_mistral_fixes(req);
        assert!(out.stream_options.is_none());
    }
}
