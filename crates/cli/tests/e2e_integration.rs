//! End-to-end tests for the Chatloom engine.
//!
//! These drive a full turn through the public surface: the fallback ladder
//! wrapping a scripted transport, the agent loop, tool execution, and the
//! streaming session.

use std::sync::{Arc, Mutex};

use chatloom_agent::{AgentLoop, ContextBudget, StreamEvent};
use chatloom_core::error::{EngineError, ProviderError, ToolError};
use chatloom_core::message::{Conversation, Message, MessageToolCall, Role};
use chatloom_core::provider::{Provider, ProviderRequest, ProviderResponse, Usage};
use chatloom_core::tool::{ToolProvider, ToolRegistry};
use chatloom_providers::{ShapeFallbackProvider, StaticModelResolver};
use serde_json::{Value, json};

// ── Mock Provider ────────────────────────────────────────────────────────

/// Replays scripted replies in order and records every request it sees.
/// When `reject_tools` is set, any request carrying tool fields gets a 400.
struct ScriptedProvider {
    replies: Mutex<Vec<ProviderResponse>>,
    repeat_last: bool,
    reject_tools: bool,
    requests: Mutex<Vec<ProviderRequest>>,
}

impl ScriptedProvider {
    fn new(replies: Vec<ProviderResponse>) -> Self {
        Self {
            replies: Mutex::new(replies),
            repeat_last: false,
            reject_tools: false,
            requests: Mutex::new(Vec::new()),
        }
    }

    fn rejecting_tools(mut self) -> Self {
        self.reject_tools = true;
        self
    }

    fn repeating(mut self) -> Self {
        self.repeat_last = true;
        self
    }

    fn requests(&self) -> Vec<ProviderRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl Provider for ScriptedProvider {
    fn name(&self) -> &str {
        "e2e_mock"
    }

    async fn complete(&self, request: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
        let has_tools = request.has_tool_fields();
        self.requests.lock().unwrap().push(request);
        if self.reject_tools && has_tools {
            return Err(ProviderError::ApiError {
                status_code: 400,
                message: "unsupported field: tools".into(),
            });
        }

        let mut replies = self.replies.lock().unwrap();
        match replies.len() {
            0 => panic!("ScriptedProvider exhausted"),
            1 if self.repeat_last => Ok(replies[0].clone()),
            _ => Ok(replies.remove(0)),
        }
    }
}

fn text_response(text: &str) -> ProviderResponse {
    ProviderResponse {
        message: Message::assistant(text),
        usage: Some(Usage {
            prompt_tokens: 10,
            completion_tokens: 5,
            total_tokens: 15,
        }),
        model: "e2e-model".into(),
    }
}

fn call_response(id: &str, name: &str, arguments: Value) -> ProviderResponse {
    ProviderResponse {
        message: Message::assistant_with_calls(
            "",
            vec![MessageToolCall {
                id: id.into(),
                name: name.into(),
                arguments: arguments.to_string(),
            }],
        ),
        usage: None,
        model: "e2e-model".into(),
    }
}

// ── Stub Tool ────────────────────────────────────────────────────────────

/// A `search` tool that answers from memory and records its arguments.
struct StubSearch {
    seen: Mutex<Vec<Value>>,
}

impl StubSearch {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            seen: Mutex::new(Vec::new()),
        })
    }

    fn calls(&self) -> Vec<Value> {
        self.seen.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl ToolProvider for StubSearch {
    fn name(&self) -> &str {
        "search"
    }

    fn description(&self) -> &str {
        "Search the web"
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": { "query": { "type": "string" } },
            "required": ["query"]
        })
    }

    async fn execute(&self, arguments: Value) -> Result<Value, ToolError> {
        self.seen.lock().unwrap().push(arguments.clone());
        Ok(json!({
            "results": [
                {
                    "title": "The Rust Programming Language",
                    "url": "https://www.rust-lang.org",
                    "snippet": "A language empowering everyone to build reliable software."
                }
            ]
        }))
    }
}

fn registry_with(tool: Arc<StubSearch>) -> Arc<ToolRegistry> {
    let mut registry = ToolRegistry::new();
    registry.register(tool);
    Arc::new(registry)
}

fn ask(text: &str) -> Conversation {
    let mut conversation = Conversation::new();
    conversation.push(Message::user(text));
    conversation
}

// ── Tests ────────────────────────────────────────────────────────────────

#[tokio::test]
async fn rejected_tool_fields_are_stripped_and_the_turn_completes() {
    let transport = Arc::new(
        ScriptedProvider::new(vec![text_response("Plain answer.")]).rejecting_tools(),
    );
    let provider = Arc::new(
        ShapeFallbackProvider::new(transport.clone())
            .with_resolver(Arc::new(StaticModelResolver::new("backup-model"))),
    );
    let agent = AgentLoop::new(provider, "e2e-model", registry_with(StubSearch::new()));

    let mut conversation = ask("Hello");
    let answer = agent.process(&mut conversation).await.unwrap();

    assert_eq!(answer, "Plain answer.");
    let requests = transport.requests();
    // original, identical retry, then the stripped shape
    assert_eq!(requests.len(), 3);
    assert!(requests[0].has_tool_fields());
    assert!(requests[1].has_tool_fields());
    assert!(!requests[2].has_tool_fields());
    assert_eq!(requests[2].model, "e2e-model");
}

#[tokio::test]
async fn textual_tool_call_runs_and_result_feeds_the_next_request() {
    let transport = Arc::new(ScriptedProvider::new(vec![
        text_response(
            "<think>I should look this up.</think><tool>{\"name\": \"search\", \"arguments\": {\"query\": \"rust\"}}</tool>",
        ),
        text_response("<think>Found it.</think>Rust is a systems language."),
    ]));
    let search = StubSearch::new();
    let agent = AgentLoop::new(
        Arc::new(ShapeFallbackProvider::new(transport.clone())),
        "e2e-model",
        registry_with(search.clone()),
    );

    let mut conversation = ask("What is Rust?");
    let answer = agent.process(&mut conversation).await.unwrap();

    assert_eq!(answer, "Rust is a systems language.");
    assert_eq!(search.calls(), vec![json!({"query": "rust"})]);

    let second = &transport.requests()[1];
    let tool_turn = second
        .messages
        .iter()
        .find(|m| m.content.contains("The Rust Programming Language"))
        .expect("tool result is sent back");
    assert!(tool_turn.content.contains("[[tool-footer]]"));
    assert!(tool_turn.content.contains("Tool calls so far: 1"));
}

#[tokio::test]
async fn streaming_session_reports_tool_activity_and_answer() {
    let transport = Arc::new(ScriptedProvider::new(vec![
        call_response("call_1", "search", json!({"query": "rust"})),
        text_response("<think>Enough.</think>Final answer."),
    ]));
    let search = StubSearch::new();
    let agent = AgentLoop::new(
        Arc::new(ShapeFallbackProvider::new(transport.clone())),
        "e2e-model",
        registry_with(search.clone()),
    );

    let mut session = agent.process_stream(ask("Tell me about Rust"));
    let mut events = Vec::new();
    while let Some(event) = session.events.recv().await {
        events.push(event);
    }
    let conversation = session.finish().await.unwrap();

    let answer: String = events
        .iter()
        .filter_map(|e| match e {
            StreamEvent::Answer { text } => Some(text.as_str()),
            _ => None,
        })
        .collect();
    assert_eq!(answer, "Final answer.");

    assert!(events.iter().any(|e| matches!(
        e,
        StreamEvent::ToolCall { name, .. } if name == "search"
    )));
    assert!(events.iter().any(|e| matches!(
        e,
        StreamEvent::ToolResult { result, .. } if result.contains("1 result")
    )));
    assert_eq!(
        events.last(),
        Some(&StreamEvent::Done {
            iterations: 2,
            tool_calls_made: 1
        })
    );
    assert_eq!(events.iter().filter(|e| e.is_terminal()).count(), 1);
    assert_eq!(search.calls().len(), 1);

    let last = conversation.messages.last().unwrap();
    assert_eq!(last.role, Role::Assistant);
}

#[tokio::test]
async fn oversized_history_is_clamped_before_sending() {
    let transport = Arc::new(ScriptedProvider::new(vec![text_response("ok")]));
    let budget = ContextBudget {
        max_total_chars: 3_000,
        max_message_chars: 1_200,
        max_tool_chars: 800,
    };
    let agent = AgentLoop::new(
        Arc::new(ShapeFallbackProvider::new(transport.clone())),
        "e2e-model",
        Arc::new(ToolRegistry::new()),
    )
    .with_system_prompt("Be brief.")
    .with_budget(budget);

    let mut conversation = Conversation::new();
    for i in 0..6 {
        conversation.push(Message::user(format!("question {i} {}", "q".repeat(900))));
        conversation.push(Message::assistant(format!("answer {i} {}", "a".repeat(2_000))));
    }
    conversation.push(Message::user("And finally?"));

    agent.process(&mut conversation).await.unwrap();

    let sent = &transport.requests()[0].messages;
    let total: usize = sent.iter().map(Message::char_len).sum();
    assert!(total <= 3_000, "sent {total} chars");
    assert!(sent.iter().all(|m| m.char_len() <= 1_200));
    assert_eq!(sent[0].role, Role::System);
    assert_eq!(sent[0].content, "Be brief.");
    assert_eq!(sent.last().unwrap().content, "And finally?");
}

#[tokio::test]
async fn endless_tool_requests_trip_the_loop_guard() {
    let transport = Arc::new(
        ScriptedProvider::new(vec![call_response("call_x", "search", json!({"query": "again"}))])
            .repeating(),
    );
    let search = StubSearch::new();
    let agent = AgentLoop::new(
        Arc::new(ShapeFallbackProvider::new(transport.clone())),
        "e2e-model",
        registry_with(search.clone()),
    );

    let mut conversation = ask("Loop forever");
    let err = agent.process(&mut conversation).await.unwrap_err();

    assert!(matches!(err, EngineError::LoopExceeded { limit: 6 }));
    assert_eq!(search.calls().len(), 6);
    assert_eq!(transport.requests().len(), 7);
}

#[test]
fn default_registry_offers_search_and_reader() {
    let registry = chatloom_tools::default_registry(&chatloom_config::ToolsConfig::default());
    assert_eq!(registry.names(), vec!["reader", "search"]);
}
