//! Context budget: keeps the message list under a character ceiling.
//!
//! Clamping happens in two passes. First every message is capped on its own
//! (tool messages at `max_tool_chars`, others at `max_message_chars`; system
//! prompts are never cut). Then whole messages are evicted, oldest first,
//! until the total fits or only protected messages remain.
//!
//! All sizes are counted in chars.

use std::collections::HashSet;

use chatloom_config::EngineConfig;
use chatloom_core::message::{Message, Role};
use tracing::{debug, warn};

use crate::summarizer::{FOOTER_SENTINEL, compose_tool_message};

pub const MAX_TOTAL_CHARS: usize = 250_000;
pub const MAX_MESSAGE_CHARS: usize = 100_000;
pub const MAX_TOOL_CHARS: usize = 24_000;

/// Appended to any content that was cut.
pub const TRUNCATION_MARKER: &str = "\n[truncated]";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContextBudget {
    pub max_total_chars: usize,
    pub max_message_chars: usize,
    pub max_tool_chars: usize,
}

impl Default for ContextBudget {
    fn default() -> Self {
        Self {
            max_total_chars: MAX_TOTAL_CHARS,
            max_message_chars: MAX_MESSAGE_CHARS,
            max_tool_chars: MAX_TOOL_CHARS,
        }
    }
}

impl ContextBudget {
    pub fn from_config(config: &EngineConfig) -> Self {
        Self {
            max_total_chars: config.max_total_chars,
            max_message_chars: config.max_message_chars,
            max_tool_chars: config.max_tool_chars,
        }
    }

    /// Cap every message, then evict until the total fits.
    pub fn clamp(&self, mut messages: Vec<Message>) -> Vec<Message> {
        for message in &mut messages {
            match message.role {
                Role::System => {}
                Role::Tool => {
                    message.content = clamp_tool_content(&message.content, self.max_tool_chars);
                }
                Role::User | Role::Assistant => {
                    if message.char_len() > self.max_message_chars {
                        message.content =
                            truncate_with_marker(&message.content, self.max_message_chars);
                    }
                }
            }
        }

        self.evict(&mut messages);
        messages
    }

    pub fn is_within_budget(&self, messages: &[Message]) -> bool {
        total_chars(messages) <= self.max_total_chars
    }

    fn evict(&self, messages: &mut Vec<Message>) {
        let mut total = total_chars(messages);
        while total > self.max_total_chars {
            let protected = protected_indices(messages);
            let victim = (0..messages.len())
                .map(|i| eviction_group(messages, i))
                .find(|group| group.iter().all(|i| !protected.contains(i)));

            let Some(mut group) = victim else {
                warn!(
                    total,
                    max = self.max_total_chars,
                    "Context over budget but only protected messages remain"
                );
                return;
            };

            group.sort_unstable_by(|a, b| b.cmp(a));
            for index in group {
                let removed = messages.remove(index);
                total -= removed.char_len();
                debug!(role = ?removed.role, chars = removed.char_len(), "Evicted message");
            }
        }
    }
}

/// Sum of content lengths, in chars.
pub fn total_chars(messages: &[Message]) -> usize {
    messages.iter().map(Message::char_len).sum()
}

/// Cut `text` to at most `cap` chars, ending with the truncation marker.
pub fn truncate_with_marker(text: &str, cap: usize) -> String {
    if text.chars().count() <= cap {
        return text.to_string();
    }
    let marker_chars = TRUNCATION_MARKER.chars().count();
    if cap <= marker_chars {
        return text.chars().take(cap).collect();
    }
    let mut out: String = text.chars().take(cap - marker_chars).collect();
    out.push_str(TRUNCATION_MARKER);
    out
}

/// Minify JSON content and cap it, keeping any footer intact.
fn clamp_tool_content(content: &str, cap: usize) -> String {
    match content.find(FOOTER_SENTINEL) {
        Some(at) => compose_tool_message(&minify_json(&content[..at]), &content[at..], cap),
        None => truncate_with_marker(&minify_json(content), cap),
    }
}

/// Re-serialize compactly if `text` is a JSON document; otherwise leave it.
fn minify_json(text: &str) -> String {
    let trimmed = text.trim();
    if trimmed.starts_with('{') || trimmed.starts_with('[') {
        if let Ok(value) = serde_json::from_str::<serde_json::Value>(trimmed) {
            return value.to_string();
        }
    }
    trimmed.to_string()
}

fn protected_indices(messages: &[Message]) -> HashSet<usize> {
    let mut protected = HashSet::new();
    if messages.first().is_some_and(|m| m.role == Role::System) {
        protected.insert(0);
    }
    if let Some(last_user) = messages.iter().rposition(|m| m.role == Role::User) {
        protected.insert(last_user);
    }
    protected.extend(messages.len().saturating_sub(2)..messages.len());
    protected
}

/// Indices that must leave together with message `index`.
///
/// An assistant message that requested tools goes with its tool replies,
/// and a tool reply goes with the request that produced it.
fn eviction_group(messages: &[Message], index: usize) -> Vec<usize> {
    let owner = match messages[index].role {
        Role::Tool => messages[index].tool_call_id.as_deref().and_then(|id| {
            messages[..index]
                .iter()
                .rposition(|m| m.tool_calls.iter().any(|c| c.id == id))
        }),
        Role::Assistant if !messages[index].tool_calls.is_empty() => Some(index),
        _ => None,
    };

    let Some(owner) = owner else {
        return vec![index];
    };

    let ids: HashSet<&str> = messages[owner]
        .tool_calls
        .iter()
        .map(|c| c.id.as_str())
        .collect();
    let mut group = vec![owner];
    group.extend(
        messages
            .iter()
            .enumerate()
            .skip(owner + 1)
            .filter(|(_, m)| {
                m.role == Role::Tool
                    && m.tool_call_id.as_deref().is_some_and(|id| ids.contains(id))
            })
            .map(|(i, _)| i),
    );
    group
}
