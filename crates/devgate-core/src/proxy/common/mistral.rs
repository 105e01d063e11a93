//! Mistral native tool-call recovery.
//!
//! Even with tool schemas supplied, Mistral models sometimes emit tool calls
//! inline as text: `[TOOL_CALLS]Name{"arg":"v"}[TOOL_CALLS]Other{...}`.
//! This module extracts the structured calls back out of such text.

use serde_json::Value;

/// The literal marker Mistral models prefix inline tool calls with.
pub const TOOL_CALLS_MARKER: &str = "[TOOL_CALLS]";

/// A tool call recovered from inline text.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedToolCall {
    pub name: String,
    pub arguments: Value,
}

/// Whether the named model belongs to the Mistral family and therefore may
/// emit the inline marker.
pub fn is_mistral_model(model: &str) -> bool {
    let lower = model.to_lowercase();
    lower.contains("mistral") || lower.contains("devstral") || lower.contains("codestral")
}

/// Parse every `[TOOL_CALLS]Name{json}` sequence out of `text`.
///
/// Malformed entries (bad JSON, name not followed by `{`) are skipped; an
/// unbalanced JSON object terminates the scan at that position. Returns an
/// empty vec when the marker never appears.
pub fn parse_tool_calls(text: &str) -> Vec<ParsedToolCall> {
    let mut calls = Vec::new();
    let mut rest = text;

    while let Some(pos) = rest.find(TOOL_CALLS_MARKER) {
        rest = &rest[pos + TOOL_CALLS_MARKER.len()..];

        let name_len =
            rest.bytes().take_while(|b| b.is_ascii_alphanumeric() || *b == b'_').count();
        if name_len == 0 {
            continue;
        }
        let name = &rest[..name_len];
        let after_name = &rest[name_len..];

        if !after_name.starts_with('{') {
            continue;
        }

        let Some(json_len) = balanced_object_len(after_name) else {
            // Unbalanced braces: nothing further can be recovered here.
            break;
        };

        if let Ok(arguments) = serde_json::from_str::<Value>(&after_name[..json_len]) {
            calls.push(ParsedToolCall { name: name.to_string(), arguments });
        }
        rest = &after_name[json_len..];
    }

    calls
}

/// Length of the balanced `{...}` object at the start of `s`, with proper
/// handling of string literals and escape sequences so that braces inside
/// strings are not counted. `None` if the object never closes.
fn balanced_object_len(s: &str) -> Option<usize> {
    let bytes = s.as_bytes();
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (i, &b) in bytes.iter().enumerate() {
        if in_string {
            if escaped {
                escaped = false;
            } else if b == b'\\' {
                escaped = true;
            } else if b == b'"' {
                in_string = false;
            }
            continue;
        }

        match b {
            b'"' => in_string = true,
            b'{' => depth += 1,
            b'}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(i + 1);
                }
            }
            _ => {}
        }
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn no_marker_yields_nothing() {
        assert!(parse_tool_calls("just some prose").is_empty());
    }

    #[test]
    fn single_call_is_parsed() {
        let calls = parse_tool_calls(r#"[TOOL_CALLS]search{"q":"x"}"#);
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].name, "search");
        assert_eq!(calls[0].arguments, json!({"q": "x"}));
    }

    #[test]
    fn multiple_calls_are_parsed_in_order() {
        let calls =
            parse_tool_calls(r#"[TOOL_CALLS]read{"path":"a"}[TOOL_CALLS]write{"path":"b"}"#);
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].name, "read");
        assert_eq!(calls[1].name, "write");
    }

    #[test]
    fn braces_inside_strings_are_not_counted() {
        let calls = parse_tool_calls(r#"[TOOL_CALLS]bash{"cmd":"echo {}}{"}"#);
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].arguments, json!({"cmd": "echo {}}{"}));
    }

    #[test]
    fn escaped_quotes_inside_strings_are_handled() {
        let calls = parse_tool_calls(r#"[TOOL_CALLS]say{"text":"she said \"hi\" {"}"#);
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].arguments, json!({"text": "she said \"hi\" {"}));
    }

    #[test]
    fn name_without_object_is_skipped() {
        let calls = parse_tool_calls(r#"[TOOL_CALLS]oops no json [TOOL_CALLS]ok{"a":1}"#);
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].name, "ok");
    }

    #[test]
    fn unbalanced_object_terminates_scan() {
        let calls = parse_tool_calls(r#"[TOOL_CALLS]broken{"a": [TOOL_CALLS]later{"b":2}"#);
        // The unbalanced object swallows the rest of the text.
        assert!(calls.is_empty());
    }

    #[test]
    fn nested_objects_balance() {
        let calls = parse_tool_calls(r#"[TOOL_CALLS]edit{"range":{"start":1,"end":2}}"#);
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].arguments["range"]["end"], 2);
    }

    #[test]
    fn model_family_detection() {
        assert!(is_mistral_model("devstral-small"));
        assert!(is_mistral_model("Codestral-22B"));
        assert!(is_mistral_model("mistral-large-latest"));
        assert!(!is_mistral_model("claude-3"));
        assert!(!is_mistral_model("gpt-4o"));
    }
}
