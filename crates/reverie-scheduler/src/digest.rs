//! Morning digest: sanitizing and truncating task results the user hasn't
//! been notified about yet into one short multi-line message.

const MAX_DIGEST_LEN: usize = 200;
const STRIPPED_TAGS: &[&str] = &["thinking", "function_calls", "function_results", "tool_use"];

fn strip_tag_blocks(text: &str, tag: &str) -> String {
    let open = format!("<{tag}");
    let close = format!("</{tag}>");
    let mut result = text.to_string();
    loop {
        let Some(start) = result.find(&open) else { break };
        let Some(tag_end_rel) = result[start..].find('>') else { break };
        let search_from = start + tag_end_rel + 1;
        let Some(close_rel) = result[search_from..].find(&close) else {
            // Unterminated block — drop everything from the open tag on.
            result.truncate(start);
            break;
        };
        let end = search_from + close_rel + close.len();
        result.replace_range(start..end, "");
    }
    result
}

fn strip_error_lines(text: &str) -> String {
    text.lines()
        .filter(|line| !line.trim_start().starts_with("Error:"))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Strips internal function-call markup, thinking blocks, and `Error:`
/// prefixed lines from a raw task/nudge result before it's shown to a user.
pub fn sanitize_result_text(text: &str) -> String {
    let mut sanitized = text.to_string();
    for tag in STRIPPED_TAGS {
        sanitized = strip_tag_blocks(&sanitized, tag);
    }
    strip_error_lines(&sanitized).trim().to_string()
}

/// Truncates to at most `max_len` characters, appending an ellipsis when
/// truncation actually happened.
pub fn truncate_with_ellipsis(text: &str, max_len: usize) -> String {
    if text.chars().count() <= max_len {
        return text.to_string();
    }
    let truncated: String = text.chars().take(max_len.saturating_sub(1)).collect();
    format!("{truncated}…")
}

/// Sanitizes then truncates to the digest's fixed character budget.
pub fn render_digest_line(raw: &str) -> String {
    truncate_with_ellipsis(&sanitize_result_text(raw), MAX_DIGEST_LEN)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_thinking_block() {
        let text = "before<thinking>secret reasoning</thinking>after";
        assert_eq!(sanitize_result_text(text), "beforeafter");
    }

    #[test]
    fn strips_function_call_markup_with_attributes() {
        let text = "result: <function_calls attr=\"x\">call body</function_calls> done";
        assert_eq!(sanitize_result_text(text), "result:  done");
    }

    #[test]
    fn strips_error_prefixed_lines_only() {
        let text = "line one\nError: something broke\nline three";
        assert_eq!(sanitize_result_text(text), "line one\nline three");
    }

    #[test]
    fn truncates_long_text_with_ellipsis() {
        let long = "a".repeat(250);
        let rendered = render_digest_line(&long);
        assert_eq!(rendered.chars().count(), 200);
        assert!(rendered.ends_with('…'));
    }

    #[test]
    fn short_text_is_untouched() {
        assert_eq!(render_digest_line("all good"), "all good");
    }
}
