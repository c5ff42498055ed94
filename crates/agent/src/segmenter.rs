//! Tag-aware segmentation of streamed text into thought and answer spans.
//!
//! Models that reason out loud wrap the reasoning in `<think>…</think>`.
//! Deltas arrive in arbitrary pieces, so a tag may be split across chunks
//! (`"<thi"` + `"nk>"`). The segmenter holds back any trailing fragment that
//! could still become a tag and only emits it once it is disambiguated.
//!
//! Untagged text that arrives before the first closing tag is classified as
//! thought; after a closing tag has been seen, untagged text is answer.

use std::sync::LazyLock;

use regex::Regex;

pub const THINK_OPEN: &str = "<think>";
pub const THINK_CLOSE: &str = "</think>";

/// An unterminated prefix of either tag at the very end of the buffer.
static PARTIAL_TAG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"</?(?:t(?:h(?:i(?:n(?:k)?)?)?)?)?$").expect("PARTIAL_TAG"));

/// One classified run of text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    Thought(String),
    Answer(String),
}

impl Segment {
    pub fn text(&self) -> &str {
        match self {
            Self::Thought(t) | Self::Answer(t) => t,
        }
    }

    pub fn is_thought(&self) -> bool {
        matches!(self, Self::Thought(_))
    }
}

/// Per-stream segmentation state. Create one per turn-stream.
#[derive(Debug, Default)]
pub struct Segmenter {
    in_thought: bool,
    thought_flushed: bool,
    carry: String,
}

impl Segmenter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a closing tag has been seen in this stream.
    pub fn saw_close(&self) -> bool {
        self.thought_flushed
    }

    /// Text currently held back as a possible tag prefix.
    pub fn carry(&self) -> &str {
        &self.carry
    }

    /// Feed one delta and collect the spans it completes.
    pub fn push(&mut self, delta: &str) -> Vec<Segment> {
        let mut buffer = std::mem::take(&mut self.carry);
        buffer.push_str(delta);

        let mut out = Vec::new();
        let mut rest = buffer.as_str();

        while let Some((at, is_open)) = next_tag(rest) {
            self.emit(&rest[..at], &mut out);
            if is_open {
                self.in_thought = true;
                rest = &rest[at + THINK_OPEN.len()..];
            } else {
                self.in_thought = false;
                self.thought_flushed = true;
                rest = &rest[at + THINK_CLOSE.len()..];
            }
        }

        match PARTIAL_TAG.find(rest) {
            Some(partial) => {
                self.emit(&rest[..partial.start()], &mut out);
                self.carry = rest[partial.start()..].to_string();
            }
            None => self.emit(rest, &mut out),
        }

        out
    }

    /// End of stream: release whatever is still held back.
    pub fn finish(&mut self) -> Vec<Segment> {
        let mut out = Vec::new();
        let carry = std::mem::take(&mut self.carry);
        self.emit(&carry, &mut out);
        out
    }

    fn emit(&self, text: &str, out: &mut Vec<Segment>) {
        if text.is_empty() {
            return;
        }
        let thought = self.in_thought || !self.thought_flushed;
        match out.last_mut() {
            Some(Segment::Thought(prev)) if thought => prev.push_str(text),
            Some(Segment::Answer(prev)) if !thought => prev.push_str(text),
            _ if thought => out.push(Segment::Thought(text.to_string())),
            _ => out.push(Segment::Answer(text.to_string())),
        }
    }
}

/// Position of the earliest tag and whether it opens a thought.
fn next_tag(text: &str) -> Option<(usize, bool)> {
    let open = text.find(THINK_OPEN);
    let close = text.find(THINK_CLOSE);
    match (open, close) {
        (Some(o), Some(c)) if o < c => Some((o, true)),
        (_, Some(c)) => Some((c, false)),
        (Some(o), None) => Some((o, true)),
        (None, None) => None,
    }
}

/// Segment a complete response in one go.
pub fn segment_all(text: &str) -> Vec<Segment> {
    let mut segmenter = Segmenter::new();
    let mut out = segmenter.push(text);
    out.extend(segmenter.finish());
    out
}
