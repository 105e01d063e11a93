//! Anthropic Messages API types.
//!
//! Request structures for the Messages endpoint plus the response and
//! usage shapes the proxy emits back to clients.

use serde::{Deserialize, Serialize};

/// Request body for the Anthropic Messages API.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnthropicRequest {
    /// Model identifier the client asked for. Defaulted so that
    /// count_tokens payloads, which may omit it, still parse; the messages
    /// handler rejects an empty model itself.
    #[serde(default)]
    pub model: String,
    /// Ordered conversation messages.
    pub messages: Vec<AnthropicMessage>,
    /// Maximum tokens to generate.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    /// Optional system prompt.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system: Option<SystemPrompt>,
    /// Optional list of tools available to the model.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<AnthropicTool>>,
    /// Tool-choice directive, passed through opaquely.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_choice: Option<serde_json::Value>,
    /// Whether to stream the response.
    #[serde(default)]
    pub stream: bool,
    /// Sampling temperature.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    /// Top-p nucleus sampling parameter.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,
    /// Client-provided stop sequences.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop_sequences: Option<Vec<String>>,
    /// Request metadata (user_id etc.), passed through opaquely.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

/// A message in the conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnthropicMessage {
    /// Role of the message author ("user" or "assistant").
    pub role: String,
    /// Content of the message.
    pub content: MessageContent,
}

/// Message content that can be a string or array of content blocks.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    /// Simple string content.
    String(String),
    /// Array of content blocks.
    Array(Vec<ContentBlock>),
}

/// System prompt that can be a string or structured blocks.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SystemPrompt {
    String(String),
    Array(Vec<SystemBlock>),
}

/// A structured block within a system prompt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemBlock {
    #[serde(rename = "type")]
    pub block_type: String,
    pub text: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ContentBlock {
    #[serde(rename = "text")]
    Text { text: String },

    #[serde(rename = "image")]
    Image { source: ImageSource },

    #[serde(rename = "tool_use")]
    ToolUse {
        id: String,
        name: String,
        input: serde_json::Value,
    },

    #[serde(rename = "tool_result")]
    ToolResult {
        tool_use_id: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        content: Option<serde_json::Value>,
        #[serde(skip_serializing_if = "Option::is_none")]
        is_error: Option<bool>,
    },

    // Forward-compat: blocks this proxy does not know are carried as raw JSON
    // and rendered as text downstream.
    #[serde(untagged)]
    Unknown(serde_json::Value),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageSource {
    #[serde(rename = "type")]
    pub source_type: String,
    pub media_type: String,
    pub data: String,
}

/// A tool definition in the Anthropic dialect.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnthropicTool {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_schema: Option<serde_json::Value>,
}

/// Response body for the Anthropic Messages API.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnthropicResponse {
    pub id: String,
    #[serde(rename = "type")]
    pub response_type: String,
    pub role: String,
    pub content: Vec<ContentBlock>,
    pub model: String,
    pub stop_reason: Option<String>,
    pub stop_sequence: Option<String>,
    pub usage: Usage,
}

/// Token usage as reported to Anthropic clients.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct Usage {
    pub input_tokens: u32,
    pub output_tokens: u32,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn string_content_deserializes() {
        let msg: AnthropicMessage =
            serde_json::from_value(json!({"role": "user", "content": "Hi"})).unwrap();
        assert!(matches!(msg.content, MessageContent::String(ref s) if s == "Hi"));
    }

    #[test]
    fn tool_use_block_roundtrips() {
        let block: ContentBlock = serde_json::from_value(json!({
            "type": "tool_use",
            "id": "toolu_01ABCDEFGH",
            "name": "bash",
            "input": {"cmd": "ls"}
        }))
        .unwrap();
        assert!(matches!(block, ContentBlock::ToolUse { ref name, .. } if name == "bash"));
    }

    #[test]
    fn unknown_block_type_is_preserved() {
        let block: ContentBlock = serde_json::from_value(json!({
            "type": "server_tool_use",
            "id": "x",
            "name": "web_search"
        }))
        .unwrap();
        match block {
            ContentBlock::Unknown(v) => assert_eq!(v["type"], "server_tool_use"),
            other => panic!("expected Unknown, got {other:?}"),
        }
    }

    #[test]
    fn system_prompt_accepts_both_shapes() {
        let s: SystemPrompt = serde_json::from_value(json!("be brief")).unwrap();
        assert!(matches!(s, SystemPrompt::String(_)));

        let a: SystemPrompt =
            serde_json::from_value(json!([{"type": "text", "text": "be brief"}])).unwrap();
        assert!(matches!(a, SystemPrompt::Array(ref blocks) if blocks.len() == 1));
    }
}
