//! The streaming completion engine: the heart of Chatloom.
//!
//! A turn follows a **Request → Inspect → Act** cycle:
//!
//! 1. **Clamp** the conversation to the context budget ([`budget`])
//! 2. **Send** it to the configured provider, streamed or whole
//! 3. **Segment** streamed text into thought and answer spans ([`segmenter`])
//! 4. **Extract** a tool call, structured or textual ([`extractor`])
//! 5. **If a tool call**: run it, summarize the result ([`summarizer`]),
//!    append it and loop back to step 1
//! 6. **If text**: sanitize it ([`sanitize`]) and return it as the answer
//!
//! The loop ends when the model answers without a tool call, or fails once
//! the loop guard is exceeded.

pub mod budget;
pub mod extractor;
pub mod loop_runner;
pub mod sanitize;
pub mod segmenter;
pub mod stream_event;
pub mod summarizer;

pub use budget::ContextBudget;
pub use extractor::{ExtractError, ParsedToolCall, ToolAccumulator, extract_textual};
pub use loop_runner::{AgentLoop, StreamSession};
pub use sanitize::sanitize_answer;
pub use segmenter::{Segment, Segmenter};
pub use stream_event::StreamEvent;
pub use summarizer::{compose_tool_message, summarize, tool_footer};
