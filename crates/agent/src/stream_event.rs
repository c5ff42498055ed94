//! Agent-level streaming events.
//!
//! `StreamEvent` is what a streaming turn delivers to the caller: classified
//! text spans, tool activity, and exactly one terminal event.
//!
//! - `thought`     : reasoning text
//! - `answer`      : user-facing text
//! - `tool_call`   : the engine is invoking a tool
//! - `tool_result` : tool execution completed
//! - `done`        : stream is complete
//! - `error`       : the turn failed

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    Thought { text: String },

    Answer { text: String },

    /// The engine is calling a tool.
    ToolCall {
        id: String,
        name: String,
        arguments: serde_json::Value,
    },

    /// Tool execution completed. `result` is the summary the model sees;
    /// `blob` is the raw tool output.
    ToolResult {
        id: String,
        name: String,
        result: String,
        blob: serde_json::Value,
    },

    Error { message: String },

    /// The stream is complete.
    Done {
        iterations: usize,
        tool_calls_made: usize,
    },
}

impl StreamEvent {
    /// Wire name for this event type.
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::Thought { .. } => "thought",
            Self::Answer { .. } => "answer",
            Self::ToolCall { .. } => "tool_call",
            Self::ToolResult { .. } => "tool_result",
            Self::Error { .. } => "error",
            Self::Done { .. } => "done",
        }
    }

    /// Whether this event ends the stream.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done { .. } | Self::Error { .. })
    }
}
