//! Provider trait: the abstraction over chat-completion endpoints.
//!
//! A Provider knows how to send a conversation to an LLM and get a response
//! back, either as a complete message or as a stream of raw deltas. Deltas
//! are forwarded untouched: classifying text and assembling tool calls is the
//! agent's job, not the transport's.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::error::ProviderError;
use crate::message::Message;

/// Configuration for a provider request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderRequest {
    /// The model to use (e.g., "gpt-4o-mini")
    pub model: String,

    /// The conversation messages
    pub messages: Vec<Message>,

    /// Temperature (0.0 = deterministic, 1.0 = creative)
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Maximum tokens to generate
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,

    /// Available tools the model can call
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<ToolDefinition>,

    /// How the model may pick tools
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_choice: Option<ToolChoice>,

    /// Whether to stream the response
    #[serde(default)]
    pub stream: bool,

    /// Ask for a usage report at the end of a stream (`stream_options`)
    #[serde(default)]
    pub stream_usage: bool,
}

fn default_temperature() -> f32 {
    0.7
}

impl ProviderRequest {
    /// Whether any tool-related field will be sent.
    pub fn has_tool_fields(&self) -> bool {
        !self.tools.is_empty() || self.tool_choice.is_some()
    }

    /// Drop `tools` and `tool_choice` entirely.
    pub fn without_tools(mut self) -> Self {
        self.tools.clear();
        self.tool_choice = None;
        self
    }

    /// Whether any field beyond model, messages and sampling will be sent.
    pub fn has_optional_fields(&self) -> bool {
        self.has_tool_fields() || (self.stream && self.stream_usage)
    }

    /// The plainest request an endpoint could accept: tool fields and
    /// stream options removed.
    pub fn minimal(self) -> Self {
        let mut request = self.without_tools();
        request.stream_usage = false;
        request
    }
}

/// The `tool_choice` field of a chat-completion request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolChoice {
    Auto,
    None,
    Required,
}

/// A tool definition sent to the LLM so it knows what tools it can call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    /// The tool name
    pub name: String,

    /// Description of what the tool does
    pub description: String,

    /// JSON Schema describing the tool's parameters
    pub parameters: serde_json::Value,
}

/// A complete (non-streaming) response from a provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderResponse {
    /// The generated message
    pub message: Message,

    /// Token usage statistics
    pub usage: Option<Usage>,

    /// Which model actually responded (may differ from requested)
    pub model: String,
}

/// Token usage information.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

/// A fragment of a structured tool call, as delivered in one streaming delta.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ToolCallDelta {
    /// Positional index of the call within the response
    pub index: u32,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Next fragment of the JSON-encoded arguments
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arguments: Option<String>,
}

/// A single chunk in a streaming response.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StreamChunk {
    /// Partial content delta
    #[serde(default)]
    pub content: Option<String>,

    /// Partial tool call deltas
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCallDelta>,

    /// Whether this is the final chunk
    #[serde(default)]
    pub done: bool,

    /// Usage info (typically only in the final chunk)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
}

/// Receiving half of a streamed completion.
///
/// Dropping it tells the reader task to stop pulling from the network.
pub type ChunkReceiver = mpsc::Receiver<std::result::Result<StreamChunk, ProviderError>>;

/// The core Provider trait.
///
/// The agent loop calls `complete()` or `stream()` without knowing which
/// endpoint or which fallback wrapper is behind it.
#[async_trait]
pub trait Provider: Send + Sync {
    /// A human-readable name for this provider (e.g., "openai", "openrouter").
    fn name(&self) -> &str;

    /// Send a request and get a complete response.
    async fn complete(
        &self,
        request: ProviderRequest,
    ) -> std::result::Result<ProviderResponse, ProviderError>;

    /// Send a request and get a stream of response chunks.
    ///
    /// Default implementation calls `complete()` and replays the result as a
    /// content chunk, one delta per tool call, and a final done chunk.
    async fn stream(
        &self,
        request: ProviderRequest,
    ) -> std::result::Result<ChunkReceiver, ProviderError> {
        let response = self.complete(request).await?;
        let (tx, rx) = mpsc::channel(4);
        let tool_calls = response
            .message
            .tool_calls
            .into_iter()
            .enumerate()
            .map(|(index, tc)| ToolCallDelta {
                index: index as u32,
                id: Some(tc.id),
                name: Some(tc.name),
                arguments: Some(tc.arguments),
            })
            .collect();
        let _ = tx
            .send(Ok(StreamChunk {
                content: Some(response.message.content),
                tool_calls,
                done: false,
                usage: None,
            }))
            .await;
        let _ = tx
            .send(Ok(StreamChunk {
                done: true,
                usage: response.usage,
                ..StreamChunk::default()
            }))
            .await;
        Ok(rx)
    }

    /// List available models for this provider.
    async fn list_models(&self) -> std::result::Result<Vec<String>, ProviderError> {
        Ok(Vec::new())
    }
}

/// Picks a model identifier to retry with when the preferred one is rejected.
#[async_trait]
pub trait ModelResolver: Send + Sync {
    async fn resolve(&self, preferred: &str) -> std::result::Result<String, ProviderError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::MessageToolCall;

    struct CannedProvider;

    #[async_trait]
    impl Provider for CannedProvider {
        fn name(&self) -> &str {
            "canned"
        }

        async fn complete(
            &self,
            _request: ProviderRequest,
        ) -> std::result::Result<ProviderResponse, ProviderError> {
            Ok(ProviderResponse {
                message: Message::assistant_with_calls(
                    "checking",
                    vec![MessageToolCall {
                        id: "call_1".into(),
                        name: "search".into(),
                        arguments: r#"{"query":"rust"}"#.into(),
                    }],
                ),
                usage: None,
                model: "canned-model".into(),
            })
        }
    }

    fn request() -> ProviderRequest {
        ProviderRequest {
            model: "gpt-4o-mini".into(),
            messages: vec![],
            temperature: default_temperature(),
            max_tokens: None,
            tools: vec![ToolDefinition {
                name: "search".into(),
                description: "Search the web".into(),
                parameters: serde_json::json!({"type": "object"}),
            }],
            tool_choice: Some(ToolChoice::Auto),
            stream: false,
            stream_usage: false,
        }
    }

    #[test]
    fn provider_request_defaults() {
        let req = request();
        assert!((req.temperature - 0.7).abs() < f32::EPSILON);
        assert!(!req.stream);
        assert!(req.has_tool_fields());
    }

    #[test]
    fn without_tools_strips_every_tool_field() {
        let req = request().without_tools();
        assert!(req.tools.is_empty());
        assert!(req.tool_choice.is_none());
        assert!(!req.has_tool_fields());

        let json = serde_json::to_value(&req).unwrap();
        assert!(json.get("tools").is_none());
        assert!(json.get("tool_choice").is_none());
    }

    #[test]
    fn minimal_drops_stream_options_too() {
        let req = ProviderRequest {
            stream: true,
            stream_usage: true,
            ..request().without_tools()
        };
        assert!(!req.has_tool_fields());
        assert!(req.has_optional_fields());

        let req = req.minimal();
        assert!(!req.stream_usage);
        assert!(req.stream);
        assert!(!req.has_optional_fields());
    }

    #[test]
    fn tool_choice_serializes_lowercase() {
        let json = serde_json::to_string(&ToolChoice::Auto).unwrap();
        assert_eq!(json, r#""auto""#);
    }

    #[tokio::test]
    async fn default_stream_replays_complete_response() {
        let mut rx = CannedProvider.stream(request()).await.unwrap();

        let first = rx.recv().await.unwrap().unwrap();
        assert_eq!(first.content.as_deref(), Some("checking"));
        assert_eq!(first.tool_calls.len(), 1);
        assert_eq!(first.tool_calls[0].index, 0);
        assert_eq!(first.tool_calls[0].name.as_deref(), Some("search"));
        assert!(!first.done);

        let last = rx.recv().await.unwrap().unwrap();
        assert!(last.done);
        assert!(rx.recv().await.is_none());
    }
}
