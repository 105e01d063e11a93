//! Anthropic → OpenAI request transformation.
//!
//! Produces an OpenAI-form request that preserves the conversation's
//! semantics while satisfying the sequence rules a Mistral tokenizer
//! enforces: 9-alphanumeric tool IDs, no user turn between a tool result and
//! the next assistant turn, and a terminal role of `user` or `tool`.

use super::models::{
    AnthropicMessage, AnthropicRequest, ContentBlock, MessageContent, SystemPrompt,
};
use crate::error::{AppError, AppResult};
use crate::proxy::common::tool_id::normalize_tool_id;
use crate::proxy::common::tool_name::sanitize_tool_name;
use crate::proxy::mappers::openai::models::{
    ContentPart, FunctionCall, FunctionDef, ImageUrl, OpenAIContent, OpenAIMessage,
    OpenAIRequest, OpenAITool, StreamOptions, ToolCall,
};
use serde_json::Value;
use std::collections::HashMap;

/// Prepended as the leading system message when an image-bearing request is
/// dispatched to the vision backend.
const VISION_SYSTEM_PROMPT: &str = "You are a vision assistant. Describe the provided images \
precisely and completely; the description will be consumed by a coding agent that cannot see \
the images itself.";

/// Sentinel appended when the conversation would otherwise end on a bare
/// assistant turn, which Mistral rejects.
const CONTINUE_SENTINEL: &str = "Continue.";

pub fn transform_anthropic_request(
    req: &AnthropicRequest,
    target_model: &str,
    vision: bool,
) -> AppResult<OpenAIRequest> {
    let mut messages = Vec::with_capacity(req.messages.len() + 2);

    if vision {
        messages.push(OpenAIMessage::text("system", VISION_SYSTEM_PROMPT));
    }
    if let Some(system) = build_system_message(&req.system) {
        messages.push(system);
    }

    // Sweep 1: collect tool_use ids so tool_result references rewrite
    // consistently. Orphan results stay as-is and fail upstream, which is
    // the correct failure.
    let id_map = collect_tool_use_ids(&req.messages);

    for msg in &req.messages {
        match (&msg.role[..], &msg.content) {
            ("user" | "assistant", MessageContent::String(text)) => {
                messages.push(OpenAIMessage::text(&msg.role, text.clone()));
            }
            ("assistant", MessageContent::Array(blocks)) => {
                messages.push(map_assistant_blocks(blocks, &id_map));
            }
            ("user", MessageContent::Array(blocks)) => {
                messages.extend(map_user_blocks(blocks, &id_map));
            }
            (role, _) => {
                return Err(AppError::Validation(format!("Unsupported message role: {role}")));
            }
        }
    }

    apply_trailing_rule(&mut messages);

    Ok(OpenAIRequest {
        model: target_model.to_string(),
        messages,
        max_tokens: req.max_tokens,
        temperature: req.temperature,
        top_p: req.top_p,
        stop: req.stop_sequences.clone(),
        tools: build_tools(&req.tools),
        tool_choice: req.tool_choice.clone(),
        stream: req.stream,
        stream_options: req.stream.then_some(StreamOptions { include_usage: true }),
    })
}

fn build_system_message(system: &Option<SystemPrompt>) -> Option<OpenAIMessage> {
    match system {
        Some(SystemPrompt::String(s)) => Some(OpenAIMessage::text("system", s.clone())),
        Some(SystemPrompt::Array(blocks)) => {
            let joined =
                blocks.iter().map(|b| b.text.as_str()).collect::<Vec<_>>().join("\n");
            (!joined.is_empty()).then(|| OpenAIMessage::text("system", joined))
        }
        None => None,
    }
}

fn collect_tool_use_ids(messages: &[AnthropicMessage]) -> HashMap<String, String> {
    let mut map = HashMap::new();
    for msg in messages {
        let MessageContent::Array(blocks) = &msg.content else { continue };
        for block in blocks {
            if let ContentBlock::ToolUse { id, .. } = block {
                map.entry(id.clone()).or_insert_with(|| normalize_tool_id(id));
            }
        }
    }
    map
}

fn mapped_id(id: &str, id_map: &HashMap<String, String>) -> String {
    id_map.get(id).cloned().unwrap_or_else(|| id.to_string())
}

/// Collapse an assistant block list into one assistant message: text blocks
/// merge into a single body (or none) and tool_use blocks become tool_calls.
fn map_assistant_blocks(
    blocks: &[ContentBlock],
    id_map: &HashMap<String, String>,
) -> OpenAIMessage {
    let mut text_parts: Vec<String> = Vec::new();
    let mut tool_calls: Vec<ToolCall> = Vec::new();

    for block in blocks {
        match block {
            ContentBlock::Text { text } => text_parts.push(text.clone()),
            ContentBlock::ToolUse { id, name, input } => {
                let arguments = if input.is_null() {
                    "{}".to_string()
                } else {
                    serde_json::to_string(input).unwrap_or_else(|_| "{}".to_string())
                };
                tool_calls.push(ToolCall {
                    id: mapped_id(id, id_map),
                    call_type: "function".to_string(),
                    function: FunctionCall { name: sanitize_tool_name(name), arguments },
                });
            }
            ContentBlock::Unknown(v) => {
                if let Ok(rendered) = serde_json::to_string(v) {
                    text_parts.push(rendered);
                }
            }
            // Images and tool results on assistant turns have no OpenAI
            // counterpart and are dropped.
            _ => {}
        }
    }

    let content = if text_parts.is_empty() {
        None
    } else {
        Some(OpenAIContent::String(text_parts.join("\n")))
    };

    OpenAIMessage {
        role: "assistant".to_string(),
        content,
        tool_calls: (!tool_calls.is_empty()).then_some(tool_calls),
        tool_call_id: None,
    }
}

/// Expand a user block list. Tool results each become their own `tool`
/// message; text riding alongside them is dropped because a user turn may
/// not sit between a tool result and the next assistant turn.
fn map_user_blocks(
    blocks: &[ContentBlock],
    id_map: &HashMap<String, String>,
) -> Vec<OpenAIMessage> {
    let has_tool_result = blocks.iter().any(|b| matches!(b, ContentBlock::ToolResult { .. }));

    if has_tool_result {
        return blocks
            .iter()
            .filter_map(|block| match block {
                ContentBlock::ToolResult { tool_use_id, content, .. } => {
                    Some(OpenAIMessage {
                        role: "tool".to_string(),
                        content: Some(OpenAIContent::String(render_tool_result(content))),
                        tool_calls: None,
                        tool_call_id: Some(mapped_id(tool_use_id, id_map)),
                    })
                }
                _ => None,
            })
            .collect();
    }

    let parts: Vec<ContentPart> = blocks
        .iter()
        .filter_map(|block| match block {
            ContentBlock::Text { text } => Some(ContentPart::Text { text: text.clone() }),
            ContentBlock::Image { source } => Some(ContentPart::ImageUrl {
                image_url: ImageUrl {
                    url: format!("data:{};base64,{}", source.media_type, source.data),
                    detail: None,
                },
            }),
            ContentBlock::Unknown(v) => {
                serde_json::to_string(v).ok().map(|text| ContentPart::Text { text })
            }
            _ => None,
        })
        .collect();

    if parts.is_empty() {
        return vec![OpenAIMessage::text("user", "")];
    }

    vec![OpenAIMessage {
        role: "user".to_string(),
        content: Some(OpenAIContent::Parts(parts)),
        tool_calls: None,
        tool_call_id: None,
    }]
}

fn render_tool_result(content: &Option<Value>) -> String {
    match content {
        None => String::new(),
        Some(Value::String(s)) => s.clone(),
        Some(other) => serde_json::to_string(other).unwrap_or_default(),
    }
}

/// A conversation ending on an assistant turn without tool calls must gain a
/// sentinel user turn; a trailing `tool` message is a legal terminator.
fn apply_trailing_rule(messages: &mut Vec<OpenAIMessage>) {
    let needs_sentinel = matches!(
        messages.last(),
        Some(last) if last.role == "assistant" && last.tool_calls.is_none()
    );
    if needs_sentinel {
        messages.push(OpenAIMessage::text("user", CONTINUE_SENTINEL));
    }
}

fn build_tools(
    tools: &Option<Vec<super::models::AnthropicTool>>,
) -> Option<Vec<OpenAITool>> {
    let tools = tools.as_ref()?;
    if tools.is_empty() {
        return None;
    }
    Some(
        tools
            .iter()
            .map(|t| OpenAITool {
                tool_type: "function".to_string(),
                function: FunctionDef {
                    name: sanitize_tool_name(&t.name),
                    description: t.description.clone(),
                    parameters: t.input_schema.clone(),
                },
            })
            .collect(),
    )
}
