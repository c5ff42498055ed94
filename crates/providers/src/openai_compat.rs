//! OpenAI-compatible transport adapter.
//!
//! Works with OpenAI, OpenRouter, Ollama, vLLM, and any other endpoint that
//! exposes `/v1/chat/completions`.
//!
//! Supports:
//! - Whole-response completions
//! - Streaming SSE, forwarded as raw deltas
//! - Tool definitions and `tool_choice`
//! - Model listing

use std::time::Duration;

use async_trait::async_trait;
use chatloom_config::AppConfig;
use chatloom_core::error::ProviderError;
use chatloom_core::message::{Message, MessageToolCall, Role, TEXTUAL_CALL_PREFIX};
use chatloom_core::provider::*;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, trace, warn};

/// Error bodies longer than this are cut before they are logged or returned.
const MAX_ERROR_BODY_CHARS: usize = 512;

/// Capacity of the chunk channel between the SSE reader task and the consumer.
const CHUNK_BUFFER: usize = 64;

/// An OpenAI-compatible chat-completion endpoint.
pub struct OpenAiCompatProvider {
    name: String,
    base_url: String,
    api_key: String,
    client: reqwest::Client,
}

impl OpenAiCompatProvider {
    /// Create a provider for `base_url` with a per-request timeout.
    pub fn new(
        name: impl Into<String>,
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        timeout: Duration,
    ) -> std::result::Result<Self, ProviderError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ProviderError::NotConfigured(format!("HTTP client: {e}")))?;

        Ok(Self {
            name: name.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            client,
        })
    }

    /// Build the provider described by the application config.
    pub fn from_config(config: &AppConfig) -> std::result::Result<Self, ProviderError> {
        let api_key = config.api_key.clone().ok_or_else(|| {
            ProviderError::NotConfigured(
                "no API key; set CHATLOOM_API_KEY or api_key in config.toml".into(),
            )
        })?;
        Self::new(
            "openai-compat",
            config.api_url.clone(),
            api_key,
            Duration::from_secs(config.request_timeout_secs),
        )
    }

    /// Create an OpenAI provider (convenience constructor).
    pub fn openai(api_key: impl Into<String>) -> std::result::Result<Self, ProviderError> {
        Self::new(
            "openai",
            "https://api.openai.com/v1",
            api_key,
            Duration::from_secs(120),
        )
    }

    /// Create an Ollama provider (convenience constructor).
    pub fn ollama(base_url: Option<&str>) -> std::result::Result<Self, ProviderError> {
        Self::new(
            "ollama",
            base_url.unwrap_or("http://localhost:11434/v1"),
            "ollama",
            Duration::from_secs(300),
        )
    }

    /// Map messages onto the wire format.
    ///
    /// Calls recovered from assistant text were never issued by the endpoint,
    /// so they stay in the assistant content only and their results go back
    /// as user turns.
    fn to_api_messages(messages: &[Message]) -> Vec<ApiMessage> {
        messages
            .iter()
            .map(|m| {
                let replies_to_textual = m.role == Role::Tool
                    && m.tool_call_id
                        .as_deref()
                        .is_some_and(|id| id.starts_with(TEXTUAL_CALL_PREFIX));
                if replies_to_textual {
                    return ApiMessage {
                        role: "user".into(),
                        content: Some(format!(
                            "Result of {}:\n{}",
                            m.name.as_deref().unwrap_or("tool"),
                            m.content
                        )),
                        tool_calls: None,
                        tool_call_id: None,
                    };
                }

                let calls: Vec<ApiToolCall> = m
                    .tool_calls
                    .iter()
                    .filter(|tc| !tc.is_textual())
                    .map(|tc| ApiToolCall {
                        id: tc.id.clone(),
                        r#type: "function".into(),
                        function: ApiFunction {
                            name: tc.name.clone(),
                            arguments: tc.arguments.clone(),
                        },
                    })
                    .collect();

                ApiMessage {
                    role: match m.role {
                        Role::User => "user".into(),
                        Role::Assistant => "assistant".into(),
                        Role::System => "system".into(),
                        Role::Tool => "tool".into(),
                    },
                    content: Some(m.content.clone()),
                    tool_calls: (!calls.is_empty()).then_some(calls),
                    tool_call_id: m.tool_call_id.clone(),
                }
            })
            .collect()
    }

    fn to_api_tools(tools: &[ToolDefinition]) -> Vec<ApiToolDefinition> {
        tools
            .iter()
            .map(|t| ApiToolDefinition {
                r#type: "function".into(),
                function: ApiToolFunction {
                    name: t.name.clone(),
                    description: t.description.clone(),
                    parameters: t.parameters.clone(),
                },
            })
            .collect()
    }

    /// Build the JSON payload. Tool fields are omitted entirely when absent.
    fn request_body(request: &ProviderRequest, stream: bool) -> serde_json::Value {
        let mut body = serde_json::json!({
            "model": request.model,
            "messages": Self::to_api_messages(&request.messages),
            "temperature": request.temperature,
            "stream": stream,
        });

        if stream && request.stream_usage {
            body["stream_options"] = serde_json::json!({ "include_usage": true });
        }

        if let Some(max_tokens) = request.max_tokens {
            body["max_tokens"] = serde_json::json!(max_tokens);
        }

        if !request.tools.is_empty() {
            body["tools"] = serde_json::json!(Self::to_api_tools(&request.tools));
        }

        if let Some(choice) = request.tool_choice {
            body["tool_choice"] = serde_json::json!(choice);
        }

        body
    }

    async fn post(
        &self,
        body: &serde_json::Value,
        stream: bool,
    ) -> std::result::Result<reqwest::Response, ProviderError> {
        let url = format!("{}/chat/completions", self.base_url);

        let mut builder = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json");
        if stream {
            builder = builder.header("Accept", "text/event-stream");
        }

        let response = builder.json(body).send().await.map_err(|e| {
            if e.is_timeout() {
                ProviderError::Timeout(e.to_string())
            } else {
                ProviderError::Network(e.to_string())
            }
        })?;

        let status = response.status().as_u16();
        if (200..300).contains(&status) {
            return Ok(response);
        }

        let error_body = response.text().await.unwrap_or_default();
        warn!(
            provider = %self.name,
            status,
            body = %truncate_body(&error_body),
            "Provider returned error"
        );
        Err(status_error(status, &error_body))
    }
}

/// Map a non-2xx status to the matching transport error.
fn status_error(status: u16, body: &str) -> ProviderError {
    match status {
        429 => ProviderError::RateLimited {
            retry_after_secs: 5,
        },
        401 | 403 => ProviderError::AuthenticationFailed(
            "Invalid API key or insufficient permissions".into(),
        ),
        _ => ProviderError::ApiError {
            status_code: status,
            message: truncate_body(body),
        },
    }
}

fn truncate_body(body: &str) -> String {
    if body.chars().count() <= MAX_ERROR_BODY_CHARS {
        return body.to_string();
    }
    let mut cut: String = body.chars().take(MAX_ERROR_BODY_CHARS).collect();
    cut.push_str("...");
    cut
}

/// Decode a whole-response payload into the assistant message it carries.
fn parse_completion(
    api_response: ApiResponse,
) -> std::result::Result<ProviderResponse, ProviderError> {
    let choice = api_response
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| ProviderError::Protocol("No choices in response".into()))?;

    let tool_calls: Vec<MessageToolCall> = choice
        .message
        .tool_calls
        .unwrap_or_default()
        .into_iter()
        .map(|tc| MessageToolCall {
            id: tc.id,
            name: tc.function.name,
            arguments: tc.function.arguments,
        })
        .collect();

    let message =
        Message::assistant_with_calls(choice.message.content.unwrap_or_default(), tool_calls);

    Ok(ProviderResponse {
        message,
        usage: api_response.usage.map(Usage::from),
        model: api_response.model.unwrap_or_default(),
    })
}

/// One classified SSE line.
#[derive(Debug)]
enum SseLine {
    /// Blank line, comment, or a non-`data:` field
    Skip,
    /// The `data: [DONE]` sentinel
    Done,
    Data(String),
}

/// Split one complete line off the front of `buffer`.
///
/// Lines are decoded only once their `\n` has arrived, so a multibyte
/// character split across network reads is never decoded in halves.
fn take_line(buffer: &mut Vec<u8>) -> Option<String> {
    let line_end = buffer.iter().position(|&b| b == b'\n')?;
    let line: Vec<u8> = buffer.drain(..=line_end).collect();
    Some(String::from_utf8_lossy(&line).into_owned())
}

fn classify_sse_line(line: &str) -> SseLine {
    let line = line.trim_end_matches('\r');
    if line.is_empty() || line.starts_with(':') {
        return SseLine::Skip;
    }
    let Some(data) = line.strip_prefix("data:") else {
        return SseLine::Skip;
    };
    let data = data.trim();
    if data == "[DONE]" {
        SseLine::Done
    } else if data.is_empty() {
        SseLine::Skip
    } else {
        SseLine::Data(data.to_string())
    }
}

/// Turn one decoded SSE payload into a chunk of raw deltas.
///
/// Returns `None` when the payload carries nothing worth forwarding.
fn delta_chunk(stream_resp: StreamResponse) -> Option<StreamChunk> {
    let mut chunk = StreamChunk::default();

    if let Some(choice) = stream_resp.choices.into_iter().next() {
        chunk.content = choice.delta.content.filter(|c| !c.is_empty());
        chunk.tool_calls = choice
            .delta
            .tool_calls
            .unwrap_or_default()
            .into_iter()
            .map(|tc| {
                let (name, arguments) = match tc.function {
                    Some(f) => (f.name, f.arguments),
                    None => (None, None),
                };
                ToolCallDelta {
                    index: tc.index,
                    id: tc.id,
                    name,
                    arguments,
                }
            })
            .collect();
    }
    chunk.usage = stream_resp.usage.map(Usage::from);

    if chunk.content.is_none() && chunk.tool_calls.is_empty() && chunk.usage.is_none() {
        None
    } else {
        Some(chunk)
    }
}

#[async_trait]
impl chatloom_core::Provider for OpenAiCompatProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn complete(
        &self,
        request: ProviderRequest,
    ) -> std::result::Result<ProviderResponse, ProviderError> {
        let body = Self::request_body(&request, false);
        debug!(
            provider = %self.name,
            model = %request.model,
            messages = request.messages.len(),
            tools = request.tools.len(),
            "Sending completion request"
        );

        let response = self.post(&body, false).await?;
        let text = response
            .text()
            .await
            .map_err(|e| ProviderError::Network(e.to_string()))?;

        let api_response: ApiResponse = serde_json::from_str(&text)
            .map_err(|e| ProviderError::Protocol(format!("Failed to parse response: {e}")))?;

        parse_completion(api_response)
    }

    async fn stream(
        &self,
        request: ProviderRequest,
    ) -> std::result::Result<ChunkReceiver, ProviderError> {
        let body = Self::request_body(&request, true);
        debug!(
            provider = %self.name,
            model = %request.model,
            messages = request.messages.len(),
            tools = request.tools.len(),
            "Sending streaming request"
        );

        let response = self.post(&body, true).await?;

        let (tx, rx) = mpsc::channel(CHUNK_BUFFER);
        let provider_name = self.name.clone();

        tokio::spawn(async move {
            let mut byte_stream = response.bytes_stream();
            let mut buffer: Vec<u8> = Vec::new();
            let mut usage = None;

            while let Some(chunk_result) = byte_stream.next().await {
                let bytes = match chunk_result {
                    Ok(b) => b,
                    Err(e) => {
                        let _ = tx
                            .send(Err(ProviderError::StreamInterrupted(e.to_string())))
                            .await;
                        return;
                    }
                };

                buffer.extend_from_slice(&bytes);

                while let Some(line) = take_line(&mut buffer) {
                    let data = match classify_sse_line(&line) {
                        SseLine::Skip => continue,
                        SseLine::Done => {
                            let _ = tx
                                .send(Ok(StreamChunk {
                                    done: true,
                                    usage,
                                    ..StreamChunk::default()
                                }))
                                .await;
                            return;
                        }
                        SseLine::Data(data) => data,
                    };

                    match serde_json::from_str::<StreamResponse>(&data) {
                        Ok(stream_resp) => {
                            let Some(mut chunk) = delta_chunk(stream_resp) else {
                                continue;
                            };
                            if chunk.usage.is_some() {
                                usage = chunk.usage.take();
                            }
                            if chunk.content.is_none() && chunk.tool_calls.is_empty() {
                                continue;
                            }
                            if tx.send(Ok(chunk)).await.is_err() {
                                debug!(
                                    provider = %provider_name,
                                    "Stream receiver dropped, aborting read"
                                );
                                return;
                            }
                        }
                        Err(e) => {
                            trace!(
                                provider = %provider_name,
                                data = %data,
                                error = %e,
                                "Ignoring unparseable SSE chunk"
                            );
                        }
                    }
                }
            }

            // Body ended without [DONE]
            let _ = tx
                .send(Ok(StreamChunk {
                    done: true,
                    usage,
                    ..StreamChunk::default()
                }))
                .await;
        });

        Ok(rx)
    }

    async fn list_models(&self) -> std::result::Result<Vec<String>, ProviderError> {
        let url = format!("{}/models", self.base_url);
        let response = self
            .client
            .get(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .send()
            .await
            .map_err(|e| ProviderError::Network(e.to_string()))?;

        if !response.status().is_success() {
            return Ok(Vec::new());
        }

        let body: serde_json::Value = response
            .json()
            .await
            .map_err(|e| ProviderError::Protocol(e.to_string()))?;

        Ok(parse_model_list(&body))
    }
}

fn parse_model_list(body: &serde_json::Value) -> Vec<String> {
    body["data"]
        .as_array()
        .map(|arr| {
            arr.iter()
                .filter_map(|m| m["id"].as_str().map(String::from))
                .collect()
        })
        .unwrap_or_default()
}

// --- OpenAI API types (internal) ---

#[derive(Debug, Serialize, Deserialize)]
struct ApiMessage {
    role: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<ApiToolCall>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct ApiToolCall {
    id: String,
    r#type: String,
    function: ApiFunction,
}

#[derive(Debug, Serialize, Deserialize)]
struct ApiFunction {
    name: String,
    #[serde(default)]
    arguments: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct ApiToolDefinition {
    r#type: String,
    function: ApiToolFunction,
}

#[derive(Debug, Serialize, Deserialize)]
struct ApiToolFunction {
    name: String,
    description: String,
    parameters: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    choices: Vec<ApiChoice>,
    #[serde(default)]
    usage: Option<ApiUsage>,
}

#[derive(Debug, Deserialize)]
struct ApiChoice {
    message: ApiMessage,
}

#[derive(Debug, Deserialize)]
struct ApiUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
    total_tokens: u32,
}

impl From<ApiUsage> for Usage {
    fn from(u: ApiUsage) -> Self {
        Usage {
            prompt_tokens: u.prompt_tokens,
            completion_tokens: u.completion_tokens,
            total_tokens: u.total_tokens,
        }
    }
}

// --- Streaming SSE types ---

/// A single SSE `data: {...}` payload from a streaming response.
#[derive(Debug, Deserialize)]
struct StreamResponse {
    #[serde(default)]
    choices: Vec<StreamChoice>,
    #[serde(default)]
    usage: Option<ApiUsage>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    delta: StreamDelta,
}

#[derive(Debug, Deserialize)]
struct StreamDelta {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<StreamToolCallDelta>>,
}

#[derive(Debug, Deserialize)]
struct StreamToolCallDelta {
    #[serde(default)]
    index: u32,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    function: Option<StreamFunctionDelta>,
}

#[derive(Debug, Deserialize)]
struct StreamFunctionDelta {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    arguments: Option<String>,
}
