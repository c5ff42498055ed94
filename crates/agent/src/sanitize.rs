//! Final-answer cleanup: reasoning spans and tool markup never reach the user.

use std::sync::LazyLock;

use regex::Regex;

use crate::extractor::{TOOL_FENCE, TOOL_TAGS};
use crate::segmenter::{Segment, THINK_CLOSE, THINK_OPEN, segment_all};

static EXTRA_NEWLINES: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\n{3,}").expect("EXTRA_NEWLINES"));

/// The user-facing part of a complete response, markup removed.
pub fn sanitize_answer(content: &str) -> String {
    let mut text = answer_text(content);
    for (open, close) in TOOL_TAGS {
        text = strip_block(&text, open, close);
    }
    let text = TOOL_FENCE.replace_all(&text, "");
    EXTRA_NEWLINES.replace_all(&text, "\n\n").trim().to_string()
}

/// Drop reasoning from a complete response.
///
/// Once a closing tag has been seen only answer spans remain. Without one,
/// everything from the first opening tag onward is reasoning.
pub fn answer_text(content: &str) -> String {
    if content.contains(THINK_CLOSE) {
        segment_all(content)
            .iter()
            .filter_map(|s| match s {
                Segment::Answer(text) => Some(text.as_str()),
                Segment::Thought(_) => None,
            })
            .collect()
    } else if let Some(at) = content.find(THINK_OPEN) {
        content[..at].to_string()
    } else {
        content.to_string()
    }
}

/// Remove every `open … close` block. An unterminated block runs to the end.
fn strip_block(text: &str, open: &str, close: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(start) = rest.find(open) {
        out.push_str(&rest[..start]);
        let after = &rest[start + open.len()..];
        match after.find(close) {
            Some(end) => rest = &after[end + close.len()..],
            None => {
                rest = "";
                break;
            }
        }
    }
    out.push_str(rest);
    out
}
