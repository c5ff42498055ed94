//! The tool orchestration loop.
//!
//! One turn runs `Requesting → Inspecting → (ToolExecuting → Requesting) |
//! Answering | Failed`:
//!
//! 1. **Clamp** the history to the context budget and send it
//! 2. **Inspect** the response for a tool call (structured first, then textual)
//! 3. **If a tool is requested**: record the assistant message, run the tool,
//!    append its summarized result and a reminder, loop back to step 1
//! 4. **Otherwise**: sanitize the content and return it as the answer
//!
//! The loop guard counts responses that request a tool. The response that
//! pushes the count past the bound fails the turn without being executed.

use std::sync::Arc;

use chatloom_config::{AppConfig, EngineConfig};
use chatloom_core::error::EngineError;
use chatloom_core::message::{Conversation, Message, MessageToolCall, Role};
use chatloom_core::provider::{Provider, ProviderRequest, ToolChoice};
use chatloom_core::tool::ToolRegistry;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::budget::ContextBudget;
use crate::extractor::{ToolAccumulator, canonical_tool_name, extract_textual};
use crate::sanitize::{answer_text, sanitize_answer};
use crate::segmenter::{Segment, Segmenter};
use crate::stream_event::StreamEvent;
use crate::summarizer::{compose_tool_message, summarize, tool_footer};

/// Counters for one turn.
#[derive(Debug, Clone, Copy, Default)]
struct TurnStats {
    /// Provider requests made
    iterations: usize,
    tool_calls_made: usize,
    /// Responses that requested a tool (what the loop guard counts)
    tool_requests: u32,
}

/// Orchestrates provider calls and tool execution for one conversation turn.
#[derive(Clone)]
pub struct AgentLoop {
    /// The completion endpoint, usually wrapped in the fallback ladder
    provider: Arc<dyn Provider>,

    model: String,

    temperature: f32,

    max_tokens: Option<u32>,

    /// Tool registry
    tools: Arc<ToolRegistry>,

    /// Whether tool definitions are sent and textual calls are honored
    tools_enabled: bool,

    /// Inserted at index 0 when the conversation has no system message
    system_prompt: String,

    /// Loop guard: tool-requesting responses allowed per turn
    max_iterations: u32,

    budget: ContextBudget,

    /// Capacity of the event channel in streaming mode
    event_buffer: usize,
}

impl AgentLoop {
    /// Create a new agent loop.
    pub fn new(
        provider: Arc<dyn Provider>,
        model: impl Into<String>,
        tools: Arc<ToolRegistry>,
    ) -> Self {
        let defaults = EngineConfig::default();
        Self {
            provider,
            model: model.into(),
            temperature: 0.7,
            max_tokens: None,
            tools,
            tools_enabled: defaults.tools_enabled,
            system_prompt: defaults.system_prompt,
            max_iterations: defaults.max_tool_iterations,
            budget: ContextBudget::default(),
            event_buffer: defaults.event_buffer,
        }
    }

    /// Build a loop from loaded configuration.
    pub fn from_config(
        provider: Arc<dyn Provider>,
        tools: Arc<ToolRegistry>,
        config: &AppConfig,
    ) -> Self {
        Self::new(provider, config.default_model.clone(), tools)
            .with_temperature(config.default_temperature)
            .with_max_tokens(config.default_max_tokens)
            .with_max_iterations(config.engine.max_tool_iterations)
            .with_budget(ContextBudget::from_config(&config.engine))
            .with_system_prompt(config.engine.system_prompt.clone())
            .with_tools_enabled(config.engine.tools_enabled)
            .with_event_buffer(config.engine.event_buffer)
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    /// Set the default max tokens per LLM response.
    pub fn with_max_tokens(mut self, max: u32) -> Self {
        self.max_tokens = Some(max);
        self
    }

    /// Set the loop guard bound.
    pub fn with_max_iterations(mut self, max: u32) -> Self {
        self.max_iterations = max;
        self
    }

    pub fn with_budget(mut self, budget: ContextBudget) -> Self {
        self.budget = budget;
        self
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = prompt.into();
        self
    }

    pub fn with_tools_enabled(mut self, enabled: bool) -> Self {
        self.tools_enabled = enabled;
        self
    }

    pub fn with_event_buffer(mut self, capacity: usize) -> Self {
        self.event_buffer = capacity.max(1);
        self
    }

    /// Run one turn to completion and return the sanitized answer.
    ///
    /// Every tool call in a response is executed, in provider order.
    pub async fn process(&self, conversation: &mut Conversation) -> Result<String, EngineError> {
        info!(
            conversation_id = %conversation.id,
            messages = conversation.messages.len(),
            "Processing conversation"
        );

        self.ensure_system_prompt(conversation);
        let mut stats = TurnStats::default();

        loop {
            stats.iterations += 1;
            let request = self.request(conversation, false);
            debug!(
                conversation_id = %conversation.id,
                iteration = stats.iterations,
                messages = request.messages.len(),
                "Requesting completion"
            );

            let response = self
                .provider
                .complete(request)
                .await
                .map_err(EngineError::from_provider)?;
            let content = response.message.content;

            let calls = match self.inspect(&content, response.message.tool_calls) {
                Inspection::Calls(calls) => calls,
                Inspection::Answer => {
                    let answer = sanitize_answer(&content);
                    conversation.push(Message::assistant(answer.clone()));
                    info!(
                        conversation_id = %conversation.id,
                        iterations = stats.iterations,
                        tool_calls = stats.tool_calls_made,
                        "Turn complete"
                    );
                    return Ok(answer);
                }
                Inspection::Verbatim => {
                    conversation.push(Message::assistant(content.clone()));
                    return Ok(content);
                }
            };

            self.guard(&mut stats)?;
            debug!(tool_count = calls.len(), "Executing tool calls");
            conversation.push(Message::assistant_with_calls(content, calls.clone()));

            for call in &calls {
                self.run_tool(conversation, call, &mut stats).await;
            }
        }
    }

    /// Run one turn in a background task, streaming events as they happen.
    ///
    /// The first tool call to complete in a turn-stream is acted on at once;
    /// the rest of that response is abandoned. Dropping the session cancels
    /// the turn.
    pub fn process_stream(&self, conversation: Conversation) -> StreamSession {
        let (tx, rx) = mpsc::channel(self.event_buffer);
        let agent = self.clone();

        let handle = tokio::spawn(async move {
            let mut conversation = conversation;
            match agent.stream_turn(&mut conversation, &tx).await {
                Ok(stats) => {
                    let _ = tx
                        .send(StreamEvent::Done {
                            iterations: stats.iterations,
                            tool_calls_made: stats.tool_calls_made,
                        })
                        .await;
                    Ok(conversation)
                }
                Err(e) => {
                    warn!(conversation_id = %conversation.id, error = %e, "Streaming turn failed");
                    let _ = tx
                        .send(StreamEvent::Error {
                            message: e.to_string(),
                        })
                        .await;
                    Err(e)
                }
            }
        });

        StreamSession { events: rx, handle }
    }

    async fn stream_turn(
        &self,
        conversation: &mut Conversation,
        tx: &mpsc::Sender<StreamEvent>,
    ) -> Result<TurnStats, EngineError> {
        self.ensure_system_prompt(conversation);
        let mut stats = TurnStats::default();

        loop {
            stats.iterations += 1;
            let request = self.request(conversation, true);
            debug!(
                conversation_id = %conversation.id,
                iteration = stats.iterations,
                "Requesting streamed completion"
            );

            let mut chunks = self
                .provider
                .stream(request)
                .await
                .map_err(EngineError::from_provider)?;

            let mut segmenter = Segmenter::new();
            let mut accumulator = ToolAccumulator::new();
            let mut content = String::new();
            let mut fired: Option<MessageToolCall> = None;

            'read: while let Some(item) = chunks.recv().await {
                let chunk = item.map_err(EngineError::from_provider)?;

                if let Some(delta) = chunk.content.as_deref().filter(|d| !d.is_empty()) {
                    content.push_str(delta);
                    for segment in segmenter.push(delta) {
                        emit(tx, segment_event(segment)).await?;
                    }
                }

                for delta in &chunk.tool_calls {
                    if let Some(call) = accumulator.push(delta) {
                        fired = Some(call);
                        break 'read;
                    }
                }

                if chunk.done {
                    break;
                }
            }
            // stops the reader task and the underlying request
            drop(chunks);

            for segment in segmenter.finish() {
                emit(tx, segment_event(segment)).await?;
            }

            let structured = fired.into_iter().chain(accumulator.finish()).collect();
            let call = match self.inspect(&content, structured) {
                Inspection::Calls(calls) => calls.into_iter().next(),
                Inspection::Answer => {
                    conversation.push(Message::assistant(sanitize_answer(&content)));
                    None
                }
                Inspection::Verbatim => {
                    conversation.push(Message::assistant(content.clone()));
                    None
                }
            };

            let Some(call) = call else {
                info!(
                    conversation_id = %conversation.id,
                    iterations = stats.iterations,
                    tool_calls = stats.tool_calls_made,
                    "Streaming turn complete"
                );
                return Ok(stats);
            };

            self.guard(&mut stats)?;
            conversation.push(Message::assistant_with_calls(content, vec![call.clone()]));

            emit(
                tx,
                StreamEvent::ToolCall {
                    id: call.id.clone(),
                    name: call.name.clone(),
                    arguments: call.arguments_value().unwrap_or(Value::Null),
                },
            )
            .await?;

            let (summary, raw) = self.run_tool(conversation, &call, &mut stats).await;
            emit(
                tx,
                StreamEvent::ToolResult {
                    id: call.id,
                    name: call.name,
                    result: summary,
                    blob: raw,
                },
            )
            .await?;
        }
    }

    /// Decide what a finished response asks for.
    fn inspect(&self, content: &str, structured: Vec<MessageToolCall>) -> Inspection {
        if !self.tools_enabled {
            return Inspection::Answer;
        }

        let known = self.tools.names();
        if !structured.is_empty() {
            let calls = structured
                .into_iter()
                .map(|mut call| {
                    if let Some(name) = canonical_tool_name(&call.name, &known) {
                        call.name = name;
                    }
                    call
                })
                .collect();
            return Inspection::Calls(calls);
        }

        match extract_textual(&answer_text(content), &known) {
            Ok(Some(parsed)) => Inspection::Calls(vec![parsed.into_message_call()]),
            Ok(None) => Inspection::Answer,
            Err(e) => {
                warn!(error = %e, "Tool markup could not be parsed, returning content as-is");
                Inspection::Verbatim
            }
        }
    }

    /// Count a tool-requesting response against the loop guard.
    fn guard(&self, stats: &mut TurnStats) -> Result<(), EngineError> {
        stats.tool_requests += 1;
        if stats.tool_requests > self.max_iterations {
            warn!(
                limit = self.max_iterations,
                iterations = stats.iterations,
                "Tool loop guard tripped"
            );
            return Err(EngineError::LoopExceeded {
                limit: self.max_iterations,
            });
        }
        Ok(())
    }

    /// Execute one call and append its tool message and reminder.
    ///
    /// Failures of any kind become an error summary for the model.
    async fn run_tool(
        &self,
        conversation: &mut Conversation,
        call: &MessageToolCall,
        stats: &mut TurnStats,
    ) -> (String, Value) {
        let (args, raw) = match call.arguments_value() {
            Ok(args) => {
                let raw = match self.tools.resolve(&call.name) {
                    Ok(tool) => match tool.execute(args.clone()).await {
                        Ok(value) => value,
                        Err(e) => serde_json::json!({ "error": e.to_string() }),
                    },
                    Err(e) => serde_json::json!({ "error": e.to_string() }),
                };
                (args, raw)
            }
            Err(e) => (
                Value::Null,
                serde_json::json!({ "error": format!("invalid arguments: {e}") }),
            ),
        };

        if let Some(error) = chatloom_core::tool::result_error(&raw) {
            warn!(tool = %call.name, error, "Tool call failed, feeding error back");
        }

        stats.tool_calls_made += 1;
        let summary = summarize(&call.name, &raw, &args);
        let content = compose_tool_message(
            &summary,
            &tool_footer(stats.tool_calls_made),
            self.budget.max_tool_chars,
        );
        debug!(tool = %call.name, chars = content.chars().count(), "Tool result recorded");

        let reminder = reminder(
            conversation.last_user_content().unwrap_or_default(),
            stats.tool_calls_made,
        );
        conversation.push(Message::tool_result(&call.id, &call.name, content));
        conversation.push(Message::system(reminder));

        (summary, raw)
    }

    fn ensure_system_prompt(&self, conversation: &mut Conversation) {
        if conversation.messages.first().map(|m| m.role) != Some(Role::System) {
            conversation
                .messages
                .insert(0, Message::system(self.system_prompt.clone()));
        }
    }

    /// Clamp the history in place and build the next request from it.
    fn request(&self, conversation: &mut Conversation, stream: bool) -> ProviderRequest {
        conversation.messages = self.budget.clamp(std::mem::take(&mut conversation.messages));

        let tools = if self.tools_enabled {
            self.tools.definitions()
        } else {
            Vec::new()
        };
        let tool_choice = (!tools.is_empty()).then_some(ToolChoice::Auto);

        ProviderRequest {
            model: self.model.clone(),
            messages: conversation.messages.clone(),
            temperature: self.temperature,
            max_tokens: self.max_tokens,
            tools,
            tool_choice,
            stream,
            stream_usage: stream,
        }
    }
}

enum Inspection {
    Calls(Vec<MessageToolCall>),
    Answer,
    /// Unparsable tool markup: hand the content back untouched.
    Verbatim,
}

/// The system-role note appended after every tool message.
fn reminder(user_request: &str, tool_calls_made: usize) -> String {
    format!(
        "Reminder: the user's request is: \"{}\". Tools called so far: {tool_calls_made}. \
         If the results above are enough, answer now.",
        user_request.trim()
    )
}

fn segment_event(segment: Segment) -> StreamEvent {
    match segment {
        Segment::Thought(text) => StreamEvent::Thought { text },
        Segment::Answer(text) => StreamEvent::Answer { text },
    }
}

async fn emit(tx: &mpsc::Sender<StreamEvent>, event: StreamEvent) -> Result<(), EngineError> {
    tx.send(event)
        .await
        .map_err(|_| EngineError::Internal("stream receiver dropped".into()))
}

/// A streaming turn in progress.
///
/// Read `events` until it closes, then call [`StreamSession::finish`] for
/// the updated conversation.
pub struct StreamSession {
    pub events: mpsc::Receiver<StreamEvent>,
    handle: JoinHandle<Result<Conversation, EngineError>>,
}

impl StreamSession {
    /// Wait for the turn to end. Events not yet read are discarded.
    pub async fn finish(self) -> Result<Conversation, EngineError> {
        let Self { mut events, handle } = self;
        while events.recv().await.is_some() {}
        handle
            .await
            .map_err(|e| EngineError::Internal(format!("streaming task failed: {e}")))?
    }
}
