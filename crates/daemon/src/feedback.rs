//! Parsing of child agent activity events and tool-input summaries.
//!
//! The child is instructed to emit newline-delimited JSON events on stdout.
//! Recognised shapes are fixed; anything else is ignored but counted.

use serde_json::Value;

const SUMMARY_MAX_CHARS: usize = 120;

/// One parsed stdout line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParsedLine {
    Text(String),
    ToolUse { tool: String, summary: String },
    Turn,
    /// Valid JSON with an unrecognised shape.
    Other,
    /// Not a JSON event at all (plain stdout noise).
    NotAnEvent,
}

/// Parse one stdout line from the child agent.
pub fn parse_line(line: &str) -> ParsedLine {
    let trimmed = line.trim();
    if trimmed.is_empty() || !trimmed.starts_with('{') {
        return ParsedLine::NotAnEvent;
    }
    let Ok(value) = serde_json::from_str::<Value>(trimmed) else {
        return ParsedLine::NotAnEvent;
    };

    match value.get("type").and_then(Value::as_str) {
        Some("text") => match value.get("text").and_then(Value::as_str) {
            Some(text) => ParsedLine::Text(text.to_string()),
            None => ParsedLine::Other,
        },
        Some("tool_use") => match value.get("tool").and_then(Value::as_str) {
            Some(tool) => ParsedLine::ToolUse {
                tool: tool.to_string(),
                summary: summarize(tool, value.get("input").unwrap_or(&Value::Null)),
            },
            None => ParsedLine::Other,
        },
        Some("turn") => ParsedLine::Turn,
        _ => ParsedLine::Other,
    }
}

/// One-line summary of a tool input, keyed by tool name.
pub fn summarize(tool: &str, input: &Value) -> String {
    let summary = match tool {
        "Read" | "Write" | "Edit" | "NotebookEdit" => input
            .get("file_path")
            .or_else(|| input.get("file"))
            .or_else(|| input.get("path"))
            .and_then(Value::as_str)
            .map(str::to_string),
        "Bash" | "Shell" => input
            .get("command")
            .and_then(Value::as_str)
            .map(|c| c.lines().next().unwrap_or_default().to_string()),
        "Grep" | "Glob" | "Search" => input
            .get("pattern")
            .or_else(|| input.get("query"))
            .and_then(Value::as_str)
            .map(str::to_string),
        "WebFetch" | "WebSearch" => input
            .get("url")
            .or_else(|| input.get("query"))
            .and_then(Value::as_str)
            .map(str::to_string),
        _ => None,
    };

    let summary = summary.unwrap_or_else(|| generic_summary(tool, input));
    truncate(&summary, SUMMARY_MAX_CHARS)
}

fn generic_summary(tool: &str, input: &Value) -> String {
    match input {
        Value::Null => format!("{tool} call"),
        other => {
            let compact = other.to_string();
            if compact == "{}" || compact == "null" {
                format!("{tool} call")
            } else {
                compact
            }
        },
    }
}

fn truncate(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    let cut: String = text.chars().take(max.saturating_sub(1)).collect();
    format!("{cut}…")
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_text_event() {
        assert_eq!(
            parse_line(r#"{"type":"text","text":"done"}"#),
            ParsedLine::Text("done".into())
        );
    }

    #[test]
    fn test_parse_tool_use_with_file_summary() {
        let parsed = parse_line(r#"{"type":"tool_use","tool":"Read","input":{"file":"a.md"}}"#);
        assert_eq!(
            parsed,
            ParsedLine::ToolUse {
                tool: "Read".into(),
                summary: "a.md".into(),
            }
        );
    }

    #[test]
    fn test_parse_turn_and_unknown() {
        assert_eq!(parse_line(r#"{"type":"turn"}"#), ParsedLine::Turn);
        assert_eq!(parse_line(r#"{"type":"thinking","ms":12}"#), ParsedLine::Other);
        assert_eq!(parse_line("plain log line"), ParsedLine::NotAnEvent);
        assert_eq!(parse_line(""), ParsedLine::NotAnEvent);
        assert_eq!(parse_line("{not json"), ParsedLine::NotAnEvent);
    }

    #[test]
    fn test_summarize_shell_takes_first_line() {
        let input = serde_json::json!({ "command": "df -h\necho after" });
        assert_eq!(summarize("Bash", &input), "df -h");
    }

    #[test]
    fn test_summarize_search_pattern() {
        let input = serde_json::json!({ "pattern": "fn main" });
        assert_eq!(summarize("Grep", &input), "fn main");
    }

    #[test]
    fn test_summarize_unknown_tool_falls_back() {
        let input = serde_json::json!({ "x": 1 });
        assert_eq!(summarize("Mystery", &input), r#"{"x":1}"#);
        assert_eq!(summarize("Mystery", &Value::Null), "Mystery call");
    }

    #[test]
    fn test_summaries_are_bounded() {
        let long = "x".repeat(500);
        let input = serde_json::json!({ "pattern": long });
        let summary = summarize("Grep", &input);
        assert!(summary.chars().count() <= 120);
        assert!(summary.ends_with('…'));
    }
}
