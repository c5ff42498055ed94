//! Compresses raw tool results into compact, source-labeled text.
//!
//! Every tool message ends with a footer that restates how many tools have
//! been called and tells the model what to do next. The footer is composed
//! first and only the summary body is ever truncated.

use chatloom_core::tool::result_error;
use serde_json::Value;

use crate::budget::truncate_with_marker;

/// Marks the start of the footer inside a tool message.
pub const FOOTER_SENTINEL: &str = "[[tool-footer]]";

/// Arrays of hits are looked up under these keys.
const LIST_KEYS: [&str; 5] = ["results", "items", "articles", "data", "hits"];

/// Single-document results carry their text under one of these keys.
const BODY_KEYS: [&str; 3] = ["text", "content", "body"];

const MAX_ITEMS: usize = 10;
const SNIPPET_CHARS: usize = 400;
const ITEM_BODY_CHARS: usize = 8_000;

/// Summarize one tool result for the model.
pub fn summarize(tool_name: &str, raw: &Value, args: &Value) -> String {
    if let Some(message) = result_error(raw) {
        return format!("tool {tool_name} error: {message}");
    }

    let subject = describe_args(args);
    let header = match &subject {
        Some(s) => format!("{tool_name} ({s})"),
        None => tool_name.to_string(),
    };

    let list = match raw {
        Value::Array(items) => Some(items),
        Value::Object(obj) => LIST_KEYS.iter().find_map(|k| obj.get(*k)?.as_array()),
        _ => None,
    };

    if let Some(items) = list {
        if items.is_empty() {
            return format!("{header}: no results");
        }
        let mut lines = vec![format!("{header}: {} result(s)", items.len())];
        lines.extend(
            items
                .iter()
                .take(MAX_ITEMS)
                .map(|item| summarize_item(item, tool_name)),
        );
        if items.len() > MAX_ITEMS {
            lines.push(format!("({} more omitted)", items.len() - MAX_ITEMS));
        }
        return lines.join("\n");
    }

    match raw {
        Value::Object(obj) => match BODY_KEYS.iter().find_map(|k| obj.get(*k)?.as_str()) {
            Some(text) => format!("{header}:\n{}", text.trim()),
            None => format!("{header}: {raw}"),
        },
        Value::String(s) => format!("{header}: {}", s.trim()),
        Value::Null => format!("{header}: no output"),
        scalar => format!("{header}: {scalar}"),
    }
}

/// One `- title (url) [source]: snippet` line, plus the page body if any.
fn summarize_item(item: &Value, tool_name: &str) -> String {
    let Some(obj) = item.as_object() else {
        return match item {
            Value::String(s) => format!("- {}", collapse(s)),
            other => format!("- {other}"),
        };
    };

    let field = |keys: &[&str]| {
        keys.iter()
            .find_map(|k| obj.get(*k)?.as_str())
            .map(str::trim)
            .filter(|s| !s.is_empty())
    };

    let mut line = String::from("-");
    if let Some(title) = field(&["title", "name"]) {
        line.push(' ');
        line.push_str(&collapse(title));
    }
    if let Some(url) = field(&["url", "link"]) {
        line.push_str(&format!(" ({url})"));
    }
    line.push_str(&format!(" [{}]", field(&["source"]).unwrap_or(tool_name)));

    if let Some(snippet) = field(&["snippet", "description"]) {
        line.push_str(": ");
        line.push_str(&truncate_with_marker(&collapse(snippet), SNIPPET_CHARS));
    }
    if let Some(body) = field(&["text", "content"]) {
        line.push('\n');
        line.push_str(&truncate_with_marker(body, ITEM_BODY_CHARS));
    }
    line
}

/// A short description of what the tool was asked for.
fn describe_args(args: &Value) -> Option<String> {
    ["query", "queries", "q", "url", "urls"].iter().find_map(|k| {
        match args.get(*k)? {
            Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
            Value::Array(items) => {
                let parts: Vec<&str> = items.iter().filter_map(Value::as_str).collect();
                (!parts.is_empty()).then(|| parts.join(" | "))
            }
            _ => None,
        }
    })
}

fn collapse(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// The footer appended to every tool message.
pub fn tool_footer(tool_calls_made: usize) -> String {
    format!(
        "{FOOTER_SENTINEL} Tool calls so far: {tool_calls_made}. \
         Answer the user's request from these results if they are sufficient; \
         call another tool only if something essential is still missing."
    )
}

/// Join `summary` and `footer` within `cap` chars.
///
/// Room for the footer is reserved first. If the footer alone does not fit,
/// it is returned whole and the summary is dropped.
pub fn compose_tool_message(summary: &str, footer: &str, cap: usize) -> String {
    let footer_chars = footer.chars().count();
    if footer_chars + 1 >= cap {
        return footer.to_string();
    }

    let body = truncate_with_marker(summary.trim(), cap - footer_chars - 1);
    if body.is_empty() {
        footer.to_string()
    } else {
        format!("{body}\n{footer}")
    }
}
