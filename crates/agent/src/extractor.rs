//! Tool-call extraction: structured deltas first, textual fallbacks second.
//!
//! Endpoints that support native tool calling deliver calls as indexed
//! fragments ([`ToolAccumulator`]). Endpoints that don't (or requests whose
//! tool fields were stripped by the fallback ladder) get the call back as
//! text, in one of several dialects. Those are handled by a chain of pure
//! grammar functions tried in priority order:
//!
//! 1. tag-wrapped JSON: `<tool>{…}</tool>`, `<tool_call>`, `<toolcall>`,
//!    `<tool-call>`, or a ```` ```tool_call ```` fence
//! 2. a bare JSON object with a recognizable call shape
//! 3. a labeled `name: … arguments: {…}` pattern
//!
//! A grammar that is not confident returns `None`; callers never guess.

use std::collections::BTreeMap;
use std::sync::LazyLock;

use chatloom_core::message::MessageToolCall;
use chatloom_core::provider::ToolCallDelta;
use regex::Regex;
use serde_json::{Map, Value};
use tracing::{debug, warn};

/// Wrapper tags, paired with their closing form.
pub(crate) const TOOL_TAGS: [(&str, &str); 4] = [
    ("<tool>", "</tool>"),
    ("<tool_call>", "</tool_call>"),
    ("<toolcall>", "</toolcall>"),
    ("<tool-call>", "</tool-call>"),
];

/// Keys that name the tool in a JSON payload.
const NAME_KEYS: [&str; 3] = ["name", "tool", "tool_name"];

/// Keys that carry the argument object in a JSON payload.
const ARGUMENT_KEYS: [&str; 4] = ["arguments", "args", "parameters", "input"];

pub(crate) static TOOL_FENCE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)```\s*tool[_-]?call\s*\n(.*?)(?:```|$)").expect("TOOL_FENCE")
});

static CODE_FENCE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^\s*```[\w-]*\s*$").expect("CODE_FENCE"));

static NAME_LABEL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)\b(?:tool[_ ]?)?name\s*[:=]\s*["'`]?([A-Za-z][\w.-]*)"#).expect("NAME_LABEL")
});

static ARGUMENTS_LABEL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)\b(?:arguments|args|parameters|input)["'`]?\s*[:=]"#)
        .expect("ARGUMENTS_LABEL")
});

/// A tool call recovered from text.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedToolCall {
    pub name: String,
    pub arguments: Value,
}

impl ParsedToolCall {
    /// Convert into a call record with an engine-generated id.
    pub fn into_message_call(self) -> MessageToolCall {
        MessageToolCall::textual(self.name, &self.arguments)
    }
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum ExtractError {
    /// Tool markup was present but none of the grammars could read it.
    #[error("tool markup ({marker}) found but could not be parsed")]
    Ambiguous { marker: String },
}

// ── Textual grammars ──────────────────────────────────────────────────────

/// Find a tool call in assistant text.
///
/// `known` is the set of registered tool names, used to resolve aliases and
/// to decide whether an inline-argument JSON object is a call at all.
pub fn extract_textual(
    content: &str,
    known: &[&str],
) -> std::result::Result<Option<ParsedToolCall>, ExtractError> {
    let text = normalize_quotes(content);

    let grammars: [fn(&str, &[&str]) -> Option<ParsedToolCall>; 3] =
        [parse_tagged, parse_bare_json, parse_labeled];
    for grammar in grammars {
        if let Some(call) = grammar(&text, known) {
            debug!(tool = %call.name, "Recovered textual tool call");
            return Ok(Some(call));
        }
    }

    match high_confidence_marker(&text) {
        Some(marker) => Err(ExtractError::Ambiguous { marker }),
        None => Ok(None),
    }
}

/// Grammar 1: JSON wrapped in a tool tag or a `tool_call` code fence.
pub fn parse_tagged(text: &str, known: &[&str]) -> Option<ParsedToolCall> {
    let lower = text.to_ascii_lowercase();

    let tagged = TOOL_TAGS
        .iter()
        .filter_map(|(open, close)| lower.find(open).map(|at| (at, *open, *close)))
        .min_by_key(|(at, _, _)| *at);

    if let Some((at, open, close)) = tagged {
        let body_start = at + open.len();
        let body_end = lower[body_start..]
            .find(close)
            .map_or(text.len(), |end| body_start + end);
        if let Some(call) = call_from_body(&text[body_start..body_end], known) {
            return Some(call);
        }
    }

    TOOL_FENCE
        .captures(text)
        .and_then(|c| c.get(1))
        .and_then(|body| call_from_body(body.as_str(), known))
}

/// Grammar 2: a bare JSON object shaped like a tool call.
pub fn parse_bare_json(text: &str, known: &[&str]) -> Option<ParsedToolCall> {
    let text = strip_code_fences(text);
    json_objects(&text)
        .into_iter()
        .find_map(|value| call_from_value(&value, known, true))
}

/// Grammar 3: `name: search … arguments: {…}`.
pub fn parse_labeled(text: &str, known: &[&str]) -> Option<ParsedToolCall> {
    let name_match = NAME_LABEL.captures(text)?;
    let raw_name = name_match.get(1)?.as_str();
    let after_name = name_match.get(0)?.end();

    let label = ARGUMENTS_LABEL.find(&text[after_name..])?;
    let after_label = after_name + label.end();
    let brace = text[after_label..].find('{')? + after_label;
    let end = find_json_end(&text[brace..])? + brace;

    let arguments: Value = serde_json::from_str(&text[brace..end]).ok()?;
    if !arguments.is_object() {
        return None;
    }

    Some(ParsedToolCall {
        name: canonical_tool_name(raw_name, known).unwrap_or_else(|| raw_name.to_string()),
        arguments,
    })
}

/// Parse the inside of a wrapper tag or fence.
fn call_from_body(body: &str, known: &[&str]) -> Option<ParsedToolCall> {
    let body = strip_code_fences(body);
    json_objects(&body)
        .into_iter()
        .find_map(|value| call_from_value(&value, known, false))
}

/// Interpret one JSON value as a call.
///
/// With `strict` (bare JSON outside any wrapper), an object only counts when
/// its name resolves to a registered tool. Inside a wrapper any name is kept.
fn call_from_value(value: &Value, known: &[&str], strict: bool) -> Option<ParsedToolCall> {
    if let Some(items) = value.as_array() {
        return items.iter().find_map(|v| call_from_value(v, known, strict));
    }

    let obj = value.as_object()?;

    if let Some(calls) = obj.get("tool_calls").and_then(Value::as_array) {
        return calls.iter().find_map(|v| call_from_value(v, known, strict));
    }

    if let Some(function) = obj.get("function").and_then(Value::as_object) {
        let name = function.get("name").and_then(Value::as_str)?.trim();
        let arguments = arguments_from(function.get("arguments"))?;
        return resolve_call(name, arguments, known, strict);
    }

    let name = NAME_KEYS
        .iter()
        .find_map(|k| obj.get(*k).and_then(Value::as_str))
        .map(str::trim)
        .filter(|n| !n.is_empty())?;

    if let Some(raw) = ARGUMENT_KEYS.iter().find_map(|k| obj.get(*k)) {
        let arguments = arguments_from(Some(raw))?;
        return resolve_call(name, arguments, known, strict);
    }

    // Inline arguments: every field except the name and bookkeeping keys.
    let arguments: Map<String, Value> = obj
        .iter()
        .filter(|(k, _)| !NAME_KEYS.contains(&k.as_str()) && !matches!(k.as_str(), "type" | "id"))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();
    resolve_call(name, Value::Object(arguments), known, strict)
}

fn resolve_call(
    name: &str,
    arguments: Value,
    known: &[&str],
    require_known: bool,
) -> Option<ParsedToolCall> {
    let name = match canonical_tool_name(name, known) {
        Some(canonical) => canonical,
        None if require_known => return None,
        None => name.to_string(),
    };
    Some(ParsedToolCall { name, arguments })
}

/// Arguments may be an object, a JSON-encoded object string, or absent-but-null.
fn arguments_from(raw: Option<&Value>) -> Option<Value> {
    match raw {
        None | Some(Value::Null) => Some(Value::Object(Map::new())),
        Some(Value::Object(_)) => raw.cloned(),
        Some(Value::String(s)) if s.trim().is_empty() => Some(Value::Object(Map::new())),
        Some(Value::String(s)) => serde_json::from_str::<Value>(s).ok().filter(Value::is_object),
        Some(_) => None,
    }
}

/// The first high-confidence tool marker in the text, if any.
fn high_confidence_marker(text: &str) -> Option<String> {
    let lower = text.to_ascii_lowercase();
    if let Some((open, _)) = TOOL_TAGS.iter().find(|(open, _)| lower.contains(open)) {
        return Some((*open).to_string());
    }
    if TOOL_FENCE.is_match(text) {
        return Some("```tool_call".into());
    }
    let name = NAME_LABEL.find(text)?;
    ARGUMENTS_LABEL
        .is_match(&text[name.end()..])
        .then(|| "name/arguments label".to_string())
}

// ── Name aliases ──────────────────────────────────────────────────────────

/// Map a model-supplied tool name onto a registered one.
pub fn canonical_tool_name(raw: &str, known: &[&str]) -> Option<String> {
    let name = raw.trim();
    if known.contains(&name) {
        return Some(name.to_string());
    }

    let folded: String = name
        .to_ascii_lowercase()
        .chars()
        .map(|c| if c == '-' || c == ' ' || c == '.' { '_' } else { c })
        .collect();
    if let Some(exact) = known.iter().find(|k| k.eq_ignore_ascii_case(&folded)) {
        return Some((*exact).to_string());
    }

    let alias = if is_search_like(&folded) {
        "search"
    } else if is_reader_like(&folded) {
        "reader"
    } else {
        return None;
    };
    known.contains(&alias).then(|| alias.to_string())
}

fn is_search_like(name: &str) -> bool {
    name.contains("search")
        || matches!(
            name,
            "google" | "bing" | "duckduckgo" | "lookup" | "web_lookup" | "query" | "find" | "news"
        )
}

fn is_reader_like(name: &str) -> bool {
    ["read", "fetch", "browse", "open_url", "visit", "scrape", "crawl", "get_page", "open_page"]
        .iter()
        .any(|k| name.contains(k))
}

// ── Text helpers ──────────────────────────────────────────────────────────

/// Replace typographic quotes with their ASCII forms.
pub fn normalize_quotes(text: &str) -> String {
    text.chars()
        .map(|c| match c {
            '\u{201C}' | '\u{201D}' | '\u{201E}' | '\u{201F}' | '\u{2033}' => '"',
            '\u{2018}' | '\u{2019}' | '\u{201A}' | '\u{201B}' | '\u{2032}' => '\'',
            other => other,
        })
        .collect()
}

/// Drop code-fence delimiter lines, keeping their contents.
pub fn strip_code_fences(text: &str) -> String {
    CODE_FENCE.replace_all(text, "").into_owned()
}

/// Every top-level JSON object in `text`, found by balanced brace scanning.
fn json_objects(text: &str) -> Vec<Value> {
    let mut values = Vec::new();
    let mut cursor = 0;
    while let Some(offset) = text[cursor..].find('{') {
        let start = cursor + offset;
        match find_json_end(&text[start..]) {
            Some(len) => {
                if let Ok(value) = serde_json::from_str::<Value>(&text[start..start + len]) {
                    values.push(value);
                    cursor = start + len;
                    continue;
                }
                cursor = start + 1;
            }
            None => break,
        }
    }
    values
}

/// Byte length of the balanced `{…}` object at the start of `input`.
///
/// Braces inside string literals are ignored.
pub fn find_json_end(input: &str) -> Option<usize> {
    if !input.starts_with('{') {
        return None;
    }

    let mut depth = 0usize;
    let mut in_string = false;
    let mut escape_next = false;

    for (i, ch) in input.char_indices() {
        if escape_next {
            escape_next = false;
            continue;
        }
        match ch {
            '\\' if in_string => escape_next = true,
            '"' => in_string = !in_string,
            '{' if !in_string => depth += 1,
            '}' if !in_string => {
                depth -= 1;
                if depth == 0 {
                    return Some(i + ch.len_utf8());
                }
            }
            _ => {}
        }
    }
    None
}

// ── Structured accumulation ───────────────────────────────────────────────

#[derive(Debug, Default)]
struct Slot {
    id: String,
    name: String,
    args: String,
    fired: bool,
}

/// Assembles indexed tool-call fragments and fires each call exactly once,
/// as soon as its arguments form a complete JSON object.
#[derive(Debug, Default)]
pub struct ToolAccumulator {
    slots: BTreeMap<u32, Slot>,
}

impl ToolAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Absorb one fragment. Returns the call if this fragment completed it.
    pub fn push(&mut self, delta: &ToolCallDelta) -> Option<MessageToolCall> {
        let slot = self.slots.entry(delta.index).or_default();
        if slot.fired {
            return None;
        }

        if let Some(id) = delta.id.as_deref().filter(|id| !id.is_empty()) {
            slot.id = id.to_string();
        }
        if let Some(name) = delta.name.as_deref().filter(|n| !n.is_empty()) {
            slot.name.push_str(name);
        }
        if let Some(args) = &delta.arguments {
            slot.args.push_str(args);
        }

        if slot.name.is_empty() || slot.args.trim().is_empty() {
            return None;
        }
        match serde_json::from_str::<Value>(&slot.args) {
            Ok(Value::Object(_)) => Some(Self::fire(delta.index, slot)),
            _ => None,
        }
    }

    /// End of stream. A named call that never received arguments fires with
    /// `{}`; a call whose arguments never became valid JSON is dropped.
    pub fn finish(&mut self) -> Vec<MessageToolCall> {
        let mut calls = Vec::new();
        for (index, slot) in self.slots.iter_mut() {
            if slot.fired || slot.name.is_empty() {
                continue;
            }
            if slot.args.trim().is_empty() {
                slot.args = "{}".into();
                calls.push(Self::fire(*index, slot));
            } else {
                warn!(
                    index,
                    tool = %slot.name,
                    args = %slot.args,
                    "Ignoring tool call with incomplete arguments"
                );
            }
        }
        calls
    }

    /// Whether any call has fired in this stream.
    pub fn has_fired(&self) -> bool {
        self.slots.values().any(|s| s.fired)
    }

    fn fire(index: u32, slot: &mut Slot) -> MessageToolCall {
        let id = if slot.id.is_empty() {
            format!("call_{}", uuid::Uuid::new_v4().simple())
        } else {
            std::mem::take(&mut slot.id)
        };
        debug!(index, tool = %slot.name, "Structured tool call complete");
        let call = MessageToolCall {
            id,
            name: std::mem::take(&mut slot.name),
            arguments: std::mem::take(&mut slot.args),
        };
        slot.fired = true;
        call
    }
}
