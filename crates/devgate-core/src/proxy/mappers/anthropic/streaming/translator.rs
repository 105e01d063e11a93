//! Incremental OpenAI SSE → Anthropic SSE translation.
//!
//! The translator is a pure state machine: `process_line` accepts one SSE
//! line from the upstream and returns the Anthropic frames it produces;
//! `finish` flushes the trailing frames when the upstream ends. All I/O
//! lives in the surrounding glue (`sse_stream`), which keeps this unit
//! testable with synthetic traces.

use super::state::{BlockType, StreamingState};
use crate::proxy::common::mistral::{is_mistral_model, parse_tool_calls, TOOL_CALLS_MARKER};
use crate::proxy::common::tool_id::{normalize_tool_id, synthesize_tool_id};
use crate::proxy::common::tool_name::sanitize_tool_name;
use crate::proxy::mappers::anthropic::response::map_finish_reason;
use crate::proxy::mappers::openai::models::{OpenAIStreamChunk, OpenAIUsage, ToolCallDelta};
use bytes::Bytes;
use serde_json::json;
use std::collections::HashMap;

/// Buffered text beyond this length is flushed (minus the marker-safe tail)
/// even when no marker has been seen.
const SAFE_WINDOW: usize = 20;

pub struct StreamTranslator {
    state: StreamingState,
    /// Mistral-family models may emit tool calls inline as text.
    mistral_mode: bool,
    /// Sliding text buffer used in mistral mode to detect the marker.
    text_buffer: String,
    /// Set once `[TOOL_CALLS]` has been observed in the buffer.
    mistral_inline: bool,
    /// Structured tool-call slots already opened (delta index → block index).
    open_slots: HashMap<u32, usize>,
    pending_stop_reason: Option<String>,
    finish_seen: bool,
    usage: Option<OpenAIUsage>,
}

impl StreamTranslator {
    /// `model` is the name declared back to the client; `backend_model` is
    /// what actually runs upstream and decides whether inline `[TOOL_CALLS]`
    /// detection is armed.
    pub fn new(
        message_id: String,
        model: String,
        backend_model: &str,
        input_tokens_estimate: u32,
    ) -> Self {
        let mistral_mode = is_mistral_model(backend_model) || is_mistral_model(&model);
        Self {
            state: StreamingState::new(message_id, model, input_tokens_estimate),
            mistral_mode,
            text_buffer: String::new(),
            mistral_inline: false,
            open_slots: HashMap::new(),
            pending_stop_reason: None,
            finish_seen: false,
            usage: None,
        }
    }

    /// Emit the opening `message_start` frame. Called before any upstream
    /// data is processed.
    pub fn begin(&mut self) -> Bytes {
        self.state.emit_message_start()
    }

    /// Process one upstream SSE line. Non-`data:` lines, the `[DONE]`
    /// sentinel, and malformed JSON all produce no output — parse errors are
    /// never fatal.
    pub fn process_line(&mut self, line: &str) -> Vec<Bytes> {
        let line = line.trim();
        let Some(data) = line.strip_prefix("data:") else {
            return vec![];
        };
        let data = data.trim();
        if data.is_empty() || data == "[DONE]" {
            return vec![];
        }

        let value: serde_json::Value = match serde_json::from_str(data) {
            Ok(v) => v,
            Err(e) => {
                let preview: String = data.chars().take(200).collect();
                tracing::warn!("SSE JSON parse error, skipping line: {} | data: {}", e, preview);
                return vec![];
            }
        };

        // An explicit upstream error frame is unrecoverable mid-stream.
        if let Some(error) = value.get("error") {
            let message =
                error.get("message").and_then(|m| m.as_str()).unwrap_or("upstream error");
            tracing::error!("Upstream error in SSE stream: {}", message);
            return vec![self.state.emit(
                "error",
                json!({
                    "type": "error",
                    "error": { "type": "api_error", "message": message }
                }),
            )];
        }

        match serde_json::from_value::<OpenAIStreamChunk>(value) {
            Ok(chunk) => self.process_chunk(&chunk),
            Err(e) => {
                tracing::warn!("Unrecognized stream chunk shape, skipping: {}", e);
                vec![]
            }
        }
    }

    /// Process one parsed upstream chunk.
    pub fn process_chunk(&mut self, chunk: &OpenAIStreamChunk) -> Vec<Bytes> {
        let mut frames = Vec::new();

        if let Some(usage) = chunk.usage {
            self.usage = Some(usage);
        }

        if let Some(choice) = chunk.choices.first() {
            if let Some(text) = choice.delta.content.as_deref() {
                frames.extend(self.handle_text(text));
            }

            if let Some(tool_calls) = &choice.delta.tool_calls {
                for tc in tool_calls {
                    frames.extend(self.handle_tool_delta(tc));
                }
            }

            if let Some(reason) = choice.finish_reason.as_deref() {
                frames.extend(self.handle_finish_reason(reason));
            }
        }

        // message_delta / message_stop wait for the usage-bearing chunk.
        if self.finish_seen && self.usage.is_some() {
            frames.extend(self.emit_trailing());
        }

        frames
    }

    /// Flush trailing frames at upstream end-of-stream. Guarantees the
    /// framing invariant even when the upstream never sent a finish_reason
    /// or usage chunk.
    pub fn finish(&mut self) -> Vec<Bytes> {
        let mut frames = Vec::new();
        if !self.finish_seen {
            frames.extend(self.handle_finish_reason("stop"));
        }
        frames.extend(self.emit_trailing());
        frames
    }

    fn handle_text(&mut self, text: &str) -> Vec<Bytes> {
        if text.is_empty() {
            return vec![];
        }
        self.state.local_output_tokens += 1;

        if !self.mistral_mode {
            return self.emit_text(text);
        }

        // Mistral inline mode: buffer until the marker is ruled out.
        self.text_buffer.push_str(text);

        if self.text_buffer.contains(TOOL_CALLS_MARKER) {
            self.mistral_inline = true;
            return vec![];
        }
        if self.mistral_inline {
            return vec![];
        }

        if self.text_buffer.len() > SAFE_WINDOW {
            let safe = marker_safe_len(&self.text_buffer);
            if safe > 0 {
                let emit: String = self.text_buffer.drain(..safe).collect();
                return self.emit_text(&emit);
            }
        }
        vec![]
    }

    fn emit_text(&mut self, text: &str) -> Vec<Bytes> {
        let mut frames = Vec::new();
        if self.state.current_block_type() != BlockType::Text {
            frames.extend(
                self.state.start_block(BlockType::Text, json!({ "type": "text", "text": "" })),
            );
        }
        frames.push(self.state.emit_delta("text_delta", json!({ "text": text })));
        frames
    }

    fn handle_tool_delta(&mut self, tc: &ToolCallDelta) -> Vec<Bytes> {
        let mut frames = Vec::new();
        let slot = tc.index.unwrap_or(0);

        if !self.open_slots.contains_key(&slot) {
            // Any buffered plain text belongs before the tool block.
            frames.extend(self.flush_text_buffer());

            let id = tc
                .id
                .as_deref()
                .map(normalize_tool_id)
                .unwrap_or_else(synthesize_tool_id);
            let name = tc
                .function
                .as_ref()
                .and_then(|f| f.name.as_deref())
                .map(sanitize_tool_name)
                .unwrap_or_else(|| "unknown_tool".to_string());

            self.state.mark_tool_used();
            frames.extend(self.state.start_block(
                BlockType::Tool,
                json!({ "type": "tool_use", "id": id, "name": name, "input": {} }),
            ));
            self.open_slots.insert(slot, self.state.current_block_index());
        }

        if let Some(args) = tc.function.as_ref().and_then(|f| f.arguments.as_deref()) {
            if !args.is_empty() {
                frames
                    .push(self.state.emit_delta("input_json_delta", json!({ "partial_json": args })));
            }
        }

        frames
    }

    fn handle_finish_reason(&mut self, reason: &str) -> Vec<Bytes> {
        if self.finish_seen {
            return vec![];
        }
        self.finish_seen = true;
        let mut frames = Vec::new();

        if self.mistral_inline {
            frames.extend(self.emit_inline_tool_calls());
        } else {
            frames.extend(self.flush_text_buffer());
        }

        frames.extend(self.state.end_block());

        let stop = if self.state.tool_used() {
            "tool_use".to_string()
        } else {
            map_finish_reason(Some(reason)).unwrap_or_else(|| "end_turn".to_string())
        };
        self.pending_stop_reason = Some(stop);

        frames
    }

    /// Recover structured tool calls from the buffered `[TOOL_CALLS]` text.
    fn emit_inline_tool_calls(&mut self) -> Vec<Bytes> {
        let buffer = std::mem::take(&mut self.text_buffer);
        self.mistral_inline = false;

        let calls = parse_tool_calls(&buffer);
        if calls.is_empty() {
            // Marker seen but nothing recoverable: degrade to plain text.
            return self.emit_text(&buffer);
        }

        let mut frames = Vec::new();

        let prefix = buffer.split(TOOL_CALLS_MARKER).next().unwrap_or("");
        if !prefix.trim().is_empty() {
            frames.extend(self.emit_text(prefix));
        }

        for call in calls {
            self.state.mark_tool_used();
            frames.extend(self.state.start_block(
                BlockType::Tool,
                json!({
                    "type": "tool_use",
                    "id": synthesize_tool_id(),
                    "name": call.name,
                    "input": {}
                }),
            ));
            let args = serde_json::to_string(&call.arguments).unwrap_or_else(|_| "{}".to_string());
            frames.push(self.state.emit_delta("input_json_delta", json!({ "partial_json": args })));
            frames.extend(self.state.end_block());
        }

        frames
    }

    fn flush_text_buffer(&mut self) -> Vec<Bytes> {
        if self.text_buffer.is_empty() {
            return vec![];
        }
        let buffered = std::mem::take(&mut self.text_buffer);
        self.emit_text(&buffered)
    }

    fn emit_trailing(&mut self) -> Vec<Bytes> {
        if self.state.message_stop_sent {
            return vec![];
        }

        let usage = self.usage.unwrap_or_default();
        let input_tokens = if usage.prompt_tokens > 0 {
            usage.prompt_tokens
        } else {
            self.state.input_tokens_estimate
        };
        let output_tokens = self.state.local_output_tokens.max(usage.completion_tokens);
        let stop =
            self.pending_stop_reason.take().unwrap_or_else(|| "end_turn".to_string());

        self.state.emit_finish(&stop, input_tokens, output_tokens)
    }
}

/// Length of the longest prefix of `buf` that is safe to emit as text: the
/// retained tail is any trailing run that could still grow into
/// `[TOOL_CALLS]`. Guarantees the marker is never emitted, whole or split.
fn marker_safe_len(buf: &str) -> usize {
    let bytes = buf.as_bytes();
    let max_check = TOOL_CALLS_MARKER.len().min(bytes.len());
    for k in (1..=max_check).rev() {
        if TOOL_CALLS_MARKER.as_bytes().starts_with(&bytes[bytes.len() - k..]) {
            return bytes.len() - k;
        }
    }
    bytes.len()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn collect(frames: Vec<Bytes>) -> String {
        frames.iter().map(|b| String::from_utf8(b.to_vec()).unwrap()).collect()
    }

    fn translator(model: &str) -> StreamTranslator {
        StreamTranslator::new("msg_test1".to_string(), model.to_string(), model, 12)
    }

    fn run_trace(model: &str, lines: &[&str]) -> String {
        let mut t = translator(model);
        let mut out = String::new();
        out.push_str(&String::from_utf8(t.begin().to_vec()).unwrap());
        for line in lines {
            out.push_str(&collect(t.process_line(line)));
        }
        out.push_str(&collect(t.finish()));
        out
    }

    fn count_occurrences(haystack: &str, needle: &str) -> usize {
        haystack.matches(needle).count()
    }

    #[test]
    fn plain_text_stream_is_well_formed() {
        let out = run_trace(
            "gpt-4o",
            &[
                r#"data: {"choices":[{"delta":{"role":"assistant","content":"Hel"},"finish_reason":null}]}"#,
                r#"data: {"choices":[{"delta":{"content":"lo"},"finish_reason":null}]}"#,
                r#"data: {"choices":[{"delta":{},"finish_reason":"stop"}]}"#,
                r#"data: {"choices":[],"usage":{"prompt_tokens":5,"completion_tokens":2,"total_tokens":7}}"#,
                "data: [DONE]",
            ],
        );

        assert_eq!(count_occurrences(&out, "message_start"), 2); // event line + type field
        assert_eq!(count_occurrences(&out, "\"type\":\"content_block_start\""), 1);
        assert_eq!(count_occurrences(&out, "\"type\":\"content_block_stop\""), 1);
        assert_eq!(count_occurrences(&out, "\"type\":\"message_delta\""), 1);
        assert_eq!(count_occurrences(&out, "\"type\":\"message_stop\""), 1);
        assert!(out.contains(r#""text":"Hel"#));
        assert!(out.contains("\"stop_reason\":\"end_turn\""));
        assert!(out.contains("\"input_tokens\":5"));
    }

    #[test]
    fn text_is_preserved_verbatim() {
        let out = run_trace(
            "gpt-4o",
            &[
                r#"data: {"choices":[{"delta":{"content":"foo "},"finish_reason":null}]}"#,
                r#"data: {"choices":[{"delta":{"content":"bar"},"finish_reason":null}]}"#,
                r#"data: {"choices":[{"delta":{},"finish_reason":"stop"}]}"#,
            ],
        );
        assert!(out.contains(r#""text":"foo ""#));
        assert!(out.contains(r#""text":"bar""#));
    }

    #[test]
    fn structured_tool_call_opens_its_own_block() {
        let out = run_trace(
            "gpt-4o",
            &[
                r#"data: {"choices":[{"delta":{"content":"Looking"},"finish_reason":null}]}"#,
                r#"data: {"choices":[{"delta":{"tool_calls":[{"index":0,"id":"call_abc","type":"function","function":{"name":"search","arguments":""}}]},"finish_reason":null}]}"#,
                r#"data: {"choices":[{"delta":{"tool_calls":[{"index":0,"function":{"arguments":"{\"q\":\"x\"}"}}]},"finish_reason":null}]}"#,
                r#"data: {"choices":[{"delta":{},"finish_reason":"tool_calls"}]}"#,
            ],
        );

        // Text block at 0 closes before the tool block at 1 opens.
        assert_eq!(count_occurrences(&out, "\"type\":\"content_block_start\""), 2);
        assert_eq!(count_occurrences(&out, "\"type\":\"content_block_stop\""), 2);
        assert!(out.contains("\"name\":\"search\""));
        assert!(out.contains(r#""partial_json":"{\"q\":\"x\"}""#));
        assert!(out.contains("\"stop_reason\":\"tool_use\""));
    }

    #[test]
    fn mistral_inline_tool_call_suppresses_text() {
        let out = run_trace(
            "devstral-small",
            &[
                r#"data: {"choices":[{"delta":{"content":"[TOOL_"},"finish_reason":null}]}"#,
                r#"data: {"choices":[{"delta":{"content":"CALLS]search"},"finish_reason":null}]}"#,
                r#"data: {"choices":[{"delta":{"content":"{\"q\":\"x\"}"},"finish_reason":null}]}"#,
                r#"data: {"choices":[{"delta":{},"finish_reason":"stop"}]}"#,
            ],
        );

        assert!(!out.contains("text_delta"));
        assert!(out.contains("\"type\":\"tool_use\""));
        assert!(out.contains("\"name\":\"search\""));
        assert!(out.contains("\"stop_reason\":\"tool_use\""));
        assert_eq!(count_occurrences(&out, "\"type\":\"message_stop\""), 1);
    }

    #[test]
    fn marker_is_never_emitted_even_when_split() {
        // The prefix "xxxx...[TOOL_CAL" exceeds the safe window while a
        // partial marker is pending.
        let out = run_trace(
            "devstral-small",
            &[
                r#"data: {"choices":[{"delta":{"content":"some interesting text [TOOL_CAL"},"finish_reason":null}]}"#,
                r#"data: {"choices":[{"delta":{"content":"LS]grep{\"p\":\"y\"}"},"finish_reason":null}]}"#,
                r#"data: {"choices":[{"delta":{},"finish_reason":"stop"}]}"#,
            ],
        );

        assert!(!out.contains("[TOOL_CALLS]"));
        assert!(out.contains("\"name\":\"grep\""));
        assert!(out.contains(r#""text":"some interesting text "#));
    }

    #[test]
    fn mistral_plain_text_is_flushed_on_finish() {
        let out = run_trace(
            "devstral-small",
            &[
                r#"data: {"choices":[{"delta":{"content":"short"},"finish_reason":null}]}"#,
                r#"data: {"choices":[{"delta":{},"finish_reason":"stop"}]}"#,
            ],
        );

        assert!(out.contains(r#""text":"short""#));
        assert!(out.contains("\"stop_reason\":\"end_turn\""));
    }

    #[test]
    fn length_maps_to_max_tokens() {
        let out = run_trace(
            "gpt-4o",
            &[
                r#"data: {"choices":[{"delta":{"content":"a"},"finish_reason":null}]}"#,
                r#"data: {"choices":[{"delta":{},"finish_reason":"length"}]}"#,
            ],
        );
        assert!(out.contains("\"stop_reason\":\"max_tokens\""));
    }

    #[test]
    fn output_tokens_use_max_of_local_and_upstream() {
        // Three text deltas, upstream claims only 1 completion token.
        let out = run_trace(
            "gpt-4o",
            &[
                r#"data: {"choices":[{"delta":{"content":"a"},"finish_reason":null}]}"#,
                r#"data: {"choices":[{"delta":{"content":"b"},"finish_reason":null}]}"#,
                r#"data: {"choices":[{"delta":{"content":"c"},"finish_reason":null}]}"#,
                r#"data: {"choices":[{"delta":{},"finish_reason":"stop"}]}"#,
                r#"data: {"choices":[],"usage":{"prompt_tokens":9,"completion_tokens":1,"total_tokens":10}}"#,
            ],
        );
        assert!(out.contains("\"output_tokens\":3"));
    }

    #[test]
    fn malformed_lines_are_skipped() {
        let out = run_trace(
            "gpt-4o",
            &[
                "data: {not json}",
                ": keepalive comment",
                "event: something",
                r#"data: {"choices":[{"delta":{"content":"ok"},"finish_reason":"stop"}]}"#,
            ],
        );
        assert!(out.contains(r#""text":"ok""#));
        assert_eq!(count_occurrences(&out, "\"type\":\"message_stop\""), 1);
    }

    #[test]
    fn upstream_error_frame_becomes_sse_error_event() {
        let mut t = translator("gpt-4o");
        t.begin();
        let frames =
            t.process_line(r#"data: {"error":{"message":"backend exploded","code":500}}"#);
        let out = collect(frames);
        assert!(out.contains("event: error"));
        assert!(out.contains("\"type\":\"api_error\""));
        assert!(out.contains("backend exploded"));
    }

    #[test]
    fn stream_without_finish_reason_still_terminates() {
        let out = run_trace(
            "gpt-4o",
            &[r#"data: {"choices":[{"delta":{"content":"partial"},"finish_reason":null}]}"#],
        );
        assert_eq!(count_occurrences(&out, "\"type\":\"message_stop\""), 1);
        assert_eq!(
            count_occurrences(&out, "\"type\":\"content_block_start\""),
            count_occurrences(&out, "\"type\":\"content_block_stop\"")
        );
    }

    #[test]
    fn marker_safe_len_retains_partial_marker() {
        assert_eq!(marker_safe_len("hello [TOOL_CAL"), "hello ".len());
        assert_eq!(marker_safe_len("hello ["), "hello ".len());
        assert_eq!(marker_safe_len("hello world"), "hello world".len());
        assert_eq!(marker_safe_len("["), 0);
    }

    #[test]
    fn two_sequential_tool_slots_balance() {
        let out = run_trace(
            "gpt-4o",
            &[
                r#"data: {"choices":[{"delta":{"tool_calls":[{"index":0,"id":"call_a","function":{"name":"read","arguments":"{}"}}]},"finish_reason":null}]}"#,
                r#"data: {"choices":[{"delta":{"tool_calls":[{"index":1,"id":"call_b","function":{"name":"write","arguments":"{}"}}]},"finish_reason":null}]}"#,
                r#"data: {"choices":[{"delta":{},"finish_reason":"tool_calls"}]}"#,
            ],
        );
        assert_eq!(count_occurrences(&out, "\"type\":\"content_block_start\""), 2);
        assert_eq!(count_occurrences(&out, "\"type\":\"content_block_stop\""), 2);
        assert!(out.contains("\"name\":\"read\""));
        assert!(out.contains("\"name\":\"write\""));
    }
}
