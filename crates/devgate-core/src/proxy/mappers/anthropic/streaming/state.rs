//! Anthropic SSE emission state.
//!
//! Bookkeeping for the event framing invariant: exactly one `message_start`
//! and one `message_stop` per stream, and balanced
//! `content_block_start`/`content_block_stop` pairs per index.

use bytes::Bytes;
use serde_json::json;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockType {
    None,
    Text,
    Tool,
}

pub struct StreamingState {
    block_type: BlockType,
    pub block_index: usize,
    pub message_start_sent: bool,
    pub message_stop_sent: bool,
    used_tool: bool,
    pub message_id: String,
    pub model: String,
    /// Precomputed estimate reported in message_start before the upstream
    /// says anything about usage.
    pub input_tokens_estimate: u32,
    /// Local text-delta counter; upstream completion counts are sometimes
    /// incomplete in streaming mode, so the final figure is the max of both.
    pub local_output_tokens: u32,
}

impl StreamingState {
    pub fn new(message_id: String, model: String, input_tokens_estimate: u32) -> Self {
        Self {
            block_type: BlockType::None,
            block_index: 0,
            message_start_sent: false,
            message_stop_sent: false,
            used_tool: false,
            message_id,
            model,
            input_tokens_estimate,
            local_output_tokens: 0,
        }
    }

    pub fn emit(&self, event_type: &str, data: serde_json::Value) -> Bytes {
        let sse = format!(
            "event: {}\ndata: {}\n\n",
            event_type,
            serde_json::to_string(&data).unwrap_or_default()
        );
        Bytes::from(sse)
    }

    pub fn emit_message_start(&mut self) -> Bytes {
        if self.message_start_sent {
            return Bytes::new();
        }

        let result = self.emit(
            "message_start",
            json!({
                "type": "message_start",
                "message": {
                    "id": self.message_id,
                    "type": "message",
                    "role": "assistant",
                    "content": [],
                    "model": self.model,
                    "stop_reason": null,
                    "stop_sequence": null,
                    "usage": {
                        "input_tokens": self.input_tokens_estimate,
                        "output_tokens": 0
                    }
                }
            }),
        );

        self.message_start_sent = true;
        result
    }

    pub fn start_block(
        &mut self,
        block_type: BlockType,
        content_block: serde_json::Value,
    ) -> Vec<Bytes> {
        let mut chunks = Vec::new();
        if self.block_type != BlockType::None {
            chunks.extend(self.end_block());
        }

        chunks.push(self.emit(
            "content_block_start",
            json!({
                "type": "content_block_start",
                "index": self.block_index,
                "content_block": content_block
            }),
        ));

        self.block_type = block_type;
        chunks
    }

    pub fn end_block(&mut self) -> Vec<Bytes> {
        if self.block_type == BlockType::None {
            return vec![];
        }

        let chunk = self.emit(
            "content_block_stop",
            json!({
                "type": "content_block_stop",
                "index": self.block_index
            }),
        );

        self.block_index += 1;
        self.block_type = BlockType::None;

        vec![chunk]
    }

    pub fn emit_delta(&self, delta_type: &str, delta_content: serde_json::Value) -> Bytes {
        let mut delta = json!({ "type": delta_type });
        if let serde_json::Value::Object(map) = delta_content {
            for (k, v) in map {
                delta[k] = v;
            }
        }

        self.emit(
            "content_block_delta",
            json!({
                "type": "content_block_delta",
                "index": self.block_index,
                "delta": delta
            }),
        )
    }

    /// Close any open block and emit `message_delta` + `message_stop`.
    /// A no-op once the stream has been terminated.
    pub fn emit_finish(
        &mut self,
        stop_reason: &str,
        input_tokens: u32,
        output_tokens: u32,
    ) -> Vec<Bytes> {
        if self.message_stop_sent {
            return vec![];
        }

        let mut chunks = Vec::new();
        chunks.extend(self.end_block());

        chunks.push(self.emit(
            "message_delta",
            json!({
                "type": "message_delta",
                "delta": { "stop_reason": stop_reason, "stop_sequence": null },
                "usage": { "input_tokens": input_tokens, "output_tokens": output_tokens }
            }),
        ));

        chunks.push(Bytes::from(
            "event: message_stop\ndata: {\"type\":\"message_stop\"}\n\n",
        ));
        self.message_stop_sent = true;

        chunks
    }

    pub fn mark_tool_used(&mut self) {
        self.used_tool = true;
    }

    pub fn tool_used(&self) -> bool {
        self.used_tool
    }

    pub fn current_block_type(&self) -> BlockType {
        self.block_type
    }

    pub fn current_block_index(&self) -> usize {
        self.block_index
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn as_text(chunks: &[Bytes]) -> String {
        chunks.iter().map(|b| String::from_utf8(b.to_vec()).unwrap()).collect()
    }

    #[test]
    fn emit_formats_sse_frame() {
        let state = StreamingState::new("msg_1".into(), "claude-3".into(), 0);
        let chunk = state.emit("test_event", json!({"foo": "bar"}));
        let s = String::from_utf8(chunk.to_vec()).unwrap();
        assert!(s.contains("event: test_event"));
        assert!(s.contains("\"foo\":\"bar\""));
        assert!(s.ends_with("\n\n"));
    }

    #[test]
    fn message_start_is_emitted_once() {
        let mut state = StreamingState::new("msg_1".into(), "claude-3".into(), 42);
        let first = state.emit_message_start();
        let second = state.emit_message_start();
        let s = String::from_utf8(first.to_vec()).unwrap();
        assert!(s.contains("\"input_tokens\":42"));
        assert!(second.is_empty());
    }

    #[test]
    fn blocks_are_balanced_and_indexed() {
        let mut state = StreamingState::new("msg_1".into(), "claude-3".into(), 0);

        let open = state.start_block(BlockType::Text, json!({"type": "text", "text": ""}));
        assert!(as_text(&open).contains("\"index\":0"));

        // Opening a second block closes the first.
        let reopen = state.start_block(
            BlockType::Tool,
            json!({"type": "tool_use", "id": "abc123XYZ", "name": "bash", "input": {}}),
        );
        let s = as_text(&reopen);
        assert!(s.contains("content_block_stop"));
        assert!(s.contains("\"index\":1"));
        assert_eq!(state.current_block_index(), 1);

        let close = state.end_block();
        assert!(as_text(&close).contains("\"index\":1"));
        assert_eq!(state.current_block_type(), BlockType::None);
    }

    #[test]
    fn finish_emits_delta_then_stop_once() {
        let mut state = StreamingState::new("msg_1".into(), "claude-3".into(), 0);
        state.start_block(BlockType::Text, json!({"type": "text", "text": ""}));

        let chunks = state.emit_finish("end_turn", 5, 7);
        let s = as_text(&chunks);
        assert!(s.contains("content_block_stop"));
        assert!(s.contains("\"stop_reason\":\"end_turn\""));
        assert!(s.contains("\"output_tokens\":7"));
        assert!(s.contains("message_stop"));

        // A second finish emits no message_stop.
        let again = state.emit_finish("end_turn", 5, 7);
        assert!(!as_text(&again).contains("message_stop"));
    }
}
