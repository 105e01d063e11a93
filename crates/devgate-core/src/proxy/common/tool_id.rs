//! Tool-call ID normalization.
//!
//! Mistral tokenizers reject tool_call IDs longer than 9 characters or
//! containing non-alphanumerics, while Anthropic clients emit IDs like
//! `toolu_01ABC...`. Rewriting must preserve referential integrity between a
//! `tool_use` and its matching `tool_result`, so normalization is a
//! deterministic pure function plus a request-scoped rewrite pass.

use crate::proxy::mappers::openai::models::{OpenAIMessage, OpenAIRequest};
use std::collections::HashMap;

/// Required ID length for Mistral-compatible tool calls.
pub const TOOL_ID_LEN: usize = 9;

const ALPHABET: &[u8; 62] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789";

/// Whether `id` already satisfies the 9-alphanumeric shape.
pub fn is_normalized_tool_id(id: &str) -> bool {
    id.len() == TOOL_ID_LEN && id.bytes().all(|b| b.is_ascii_alphanumeric())
}

/// Map an arbitrary ID to the 9-alphanumeric form.
///
/// Conforming IDs pass through verbatim, which makes the function idempotent:
/// `normalize_tool_id(normalize_tool_id(x)) == normalize_tool_id(x)`.
pub fn normalize_tool_id(id: &str) -> String {
    if is_normalized_tool_id(id) {
        return id.to_string();
    }

    // FNV-1a over the UTF-8 bytes, then nine base-62 projections.
    // 62^9 < 2^64, so the full hash feeds every position.
    let mut hash: u64 = 0xcbf29ce484222325;
    for b in id.as_bytes() {
        hash ^= u64::from(*b);
        hash = hash.wrapping_mul(0x100000001b3);
    }

    let mut out = String::with_capacity(TOOL_ID_LEN);
    let mut h = hash;
    for _ in 0..TOOL_ID_LEN {
        out.push(ALPHABET[(h % 62) as usize] as char);
        h /= 62;
    }
    out
}

/// Generate a fresh 9-alphanumeric ID for tool calls recovered from inline
/// `[TOOL_CALLS]` text, which carry no upstream ID at all.
pub fn synthesize_tool_id() -> String {
    use rand::Rng;
    rand::thread_rng()
        .sample_iter(&rand::distributions::Alphanumeric)
        .take(TOOL_ID_LEN)
        .map(char::from)
        .collect()
}

/// Collect every ID appearing on assistant `tool_calls` into `id -> id9`.
///
/// First sweep of the request-scoped pass. IDs seen only on a tool result
/// are deliberately absent: rewriting them would mask a broken reference
/// that the backend is the right party to reject.
pub fn collect_tool_call_ids(messages: &[OpenAIMessage]) -> HashMap<String, String> {
    let mut map = HashMap::new();
    for msg in messages {
        if msg.role != "assistant" {
            continue;
        }
        if let Some(calls) = &msg.tool_calls {
            for call in calls {
                map.entry(call.id.clone()).or_insert_with(|| normalize_tool_id(&call.id));
            }
        }
    }
    map
}

/// Second sweep: rewrite every occurrence of the collected IDs.
pub fn rewrite_tool_call_ids(
    messages: Vec<OpenAIMessage>,
    map: &HashMap<String, String>,
) -> Vec<OpenAIMessage> {
    messages
        .into_iter()
        .map(|mut msg| {
            if let Some(calls) = msg.tool_calls.as_mut() {
                for call in calls {
                    if let Some(id9) = map.get(&call.id) {
                        call.id = id9.clone();
                    }
                }
            }
            if let Some(id) = msg.tool_call_id.as_mut() {
                if let Some(id9) = map.get(id.as_str()) {
                    *id = id9.clone();
                }
            }
            msg
        })
        .collect()
}

/// Normalize every tool-call ID in an OpenAI request.
pub fn normalize_request_tool_ids(mut req: OpenAIRequest) -> OpenAIRequest {
    let map = collect_tool_call_ids(&req.messages);
    if map.is_empty() {
        return req;
    }
    req.messages = rewrite_tool_call_ids(req.messages, &map);
    req
}
