//! OpenAI → Anthropic response transformation.
//!
//! Rebuilds the Anthropic message shape from a unary chat completion,
//! including recovery of tool calls that the backend emitted inline as
//! `[TOOL_CALLS]` text instead of structured `tool_calls`.

use super::models::{AnthropicResponse, ContentBlock, Usage};
use crate::proxy::common::mistral::{parse_tool_calls, TOOL_CALLS_MARKER};
use crate::proxy::common::tool_id::synthesize_tool_id;
use crate::proxy::mappers::openai::models::OpenAIResponse;
use serde_json::json;

/// Map an OpenAI finish_reason onto the Anthropic stop_reason vocabulary.
/// Unrecognized values pass through verbatim.
pub fn map_finish_reason(finish_reason: Option<&str>) -> Option<String> {
    finish_reason.map(|r| {
        match r {
            "stop" => "end_turn",
            "tool_calls" => "tool_use",
            "length" => "max_tokens",
            other => other,
        }
        .to_string()
    })
}

pub fn transform_response(resp: &OpenAIResponse, output_model: &str) -> AnthropicResponse {
    let mut content: Vec<ContentBlock> = Vec::new();
    let mut inline_tool_use = false;

    let choice = resp.choices.first();

    if let Some(choice) = choice {
        if let Some(text) = choice.message.content.as_deref() {
            if text.contains(TOOL_CALLS_MARKER) {
                let calls = parse_tool_calls(text);
                let prefix = text.split(TOOL_CALLS_MARKER).next().unwrap_or("");
                if !prefix.trim().is_empty() {
                    content.push(ContentBlock::Text { text: prefix.to_string() });
                }
                if calls.is_empty() {
                    // Marker present but nothing recoverable: keep the raw text.
                    content.push(ContentBlock::Text { text: text.to_string() });
                } else {
                    inline_tool_use = true;
                    for call in calls {
                        content.push(ContentBlock::ToolUse {
                            id: synthesize_tool_id(),
                            name: call.name,
                            input: call.arguments,
                        });
                    }
                }
            } else if !text.is_empty() {
                content.push(ContentBlock::Text { text: text.to_string() });
            }
        }

        if let Some(tool_calls) = &choice.message.tool_calls {
            for call in tool_calls {
                let input = serde_json::from_str(&call.function.arguments)
                    .unwrap_or_else(|_| json!({ "raw": call.function.arguments }));
                content.push(ContentBlock::ToolUse {
                    id: call.id.clone(),
                    name: call.function.name.clone(),
                    input,
                });
            }
        }
    }

    if content.is_empty() {
        content.push(ContentBlock::Text { text: String::new() });
    }

    let stop_reason = if inline_tool_use {
        Some("tool_use".to_string())
    } else {
        map_finish_reason(choice.and_then(|c| c.finish_reason.as_deref()))
    };

    let usage = resp.usage.unwrap_or_default();

    AnthropicResponse {
        id: resp.id.clone(),
        response_type: "message".to_string(),
        role: "assistant".to_string(),
        content,
        model: output_model.to_string(),
        stop_reason,
        stop_sequence: None,
        usage: Usage {
            input_tokens: usage.prompt_tokens,
            output_tokens: usage.completion_tokens,
        },
    }
}
