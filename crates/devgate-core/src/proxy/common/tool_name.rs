//! Tool-name sanitization for Mistral function declarations.

const MAX_NAME_LEN: usize = 64;

/// Rewrite a tool name into the `[a-zA-Z0-9_-]{1,64}` shape Mistral accepts.
///
/// Characters outside the class become `_`, surrounding whitespace and
/// underscores are trimmed, and an empty result falls back to `unknown_tool`.
pub fn sanitize_tool_name(name: &str) -> String {
    let cleaned: String = name
        .trim()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' || c == '-' { c } else { '_' })
        .collect();

    let trimmed = cleaned.trim_matches('_');
    let truncated: String = trimmed.chars().take(MAX_NAME_LEN).collect();

    if truncated.is_empty() {
        "unknown_tool".to_string()
    } else {
        truncated
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clean_name_passes_through() {
        assert_eq!(sanitize_tool_name("bash"), "bash");
        assert_eq!(sanitize_tool_name("mcp__server-tool"), "mcp__server-tool");
    }

    #[test]
    fn invalid_chars_become_underscores() {
        assert_eq!(sanitize_tool_name("my tool!"), "my_tool");
        assert_eq!(sanitize_tool_name("a.b.c"), "a_b_c");
    }

    #[test]
    fn surrounding_underscores_are_trimmed() {
        assert_eq!(sanitize_tool_name("__weird__"), "weird");
    }

    #[test]
    fn long_name_is_truncated() {
        let long = "a".repeat(100);
        assert_eq!(sanitize_tool_name(&long).len(), 64);
    }

    #[test]
    fn empty_result_falls_back() {
        assert_eq!(sanitize_tool_name("!!!"), "unknown_tool");
        assert_eq!(sanitize_tool_name(""), "unknown_tool");
    }
}
