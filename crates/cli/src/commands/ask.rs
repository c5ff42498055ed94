//! `chatloom ask`: one message in, one answer out.

use std::io::Write;
use std::sync::Arc;

use chatloom_agent::{AgentLoop, StreamEvent, StreamSession};
use chatloom_config::AppConfig;
use chatloom_core::error::ProviderError;
use chatloom_core::message::{Conversation, Message, Role};
use chatloom_core::provider::ModelResolver;
use chatloom_providers::{
    ListedModelResolver, OpenAiCompatProvider, ShapeFallbackProvider, StaticModelResolver,
};
use tracing::debug;

pub struct AskOptions {
    pub message: String,
    pub model: Option<String>,
    pub stream: bool,
    pub show_thoughts: bool,
}

pub async fn run(options: AskOptions) -> Result<(), Box<dyn std::error::Error>> {
    let mut config = AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;
    if let Some(model) = options.model {
        config.default_model = model;
    }

    if !config.has_api_key() {
        eprintln!();
        eprintln!("  ERROR: No API key configured!");
        eprintln!();
        eprintln!("  Set one of these environment variables:");
        eprintln!("    CHATLOOM_API_KEY = 'sk-...'");
        eprintln!("    OPENAI_API_KEY   = 'sk-...'");
        eprintln!();
        eprintln!("  Or add it to your config file:");
        eprintln!("    {}", AppConfig::config_dir().join("config.toml").display());
        eprintln!();
        return Err("No API key found. See above for setup instructions.".into());
    }

    let agent = build_agent(&config)?;
    let mut conversation = Conversation::new();
    conversation.push(Message::user(options.message));

    if options.stream && config.stream {
        let session = agent.process_stream(conversation);
        let stdout = std::io::stdout();
        let stderr = std::io::stderr();
        render(
            session,
            &mut stdout.lock(),
            &mut stderr.lock(),
            options.show_thoughts,
        )
        .await?;
    } else {
        let answer = agent.process(&mut conversation).await?;
        println!("{answer}");
    }

    Ok(())
}

/// Wire the transport, fallback ladder, tools and loop together.
pub fn build_agent(config: &AppConfig) -> Result<AgentLoop, ProviderError> {
    let transport = Arc::new(OpenAiCompatProvider::from_config(config)?);

    let resolver: Arc<dyn ModelResolver> = match &config.fallback_model {
        Some(model) => Arc::new(StaticModelResolver::new(model.clone())),
        None => Arc::new(ListedModelResolver::new(
            transport.clone(),
            config.default_model.clone(),
        )),
    };
    let provider = Arc::new(ShapeFallbackProvider::new(transport).with_resolver(resolver));
    let tools = Arc::new(chatloom_tools::default_registry(&config.tools));

    Ok(AgentLoop::from_config(provider, tools, config))
}

/// Print a streaming turn: answer text to `out`, everything else to `err`.
///
/// A model that never closes a reasoning span produces no answer events;
/// the final answer is then taken from the finished conversation.
pub async fn render<O: Write, E: Write>(
    mut session: StreamSession,
    out: &mut O,
    err: &mut E,
    show_thoughts: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut answered = false;

    while let Some(event) = session.events.recv().await {
        match event {
            StreamEvent::Thought { text } => {
                if show_thoughts {
                    write!(err, "{text}")?;
                    err.flush()?;
                }
            }
            StreamEvent::Answer { text } => {
                answered = true;
                write!(out, "{text}")?;
                out.flush()?;
            }
            StreamEvent::ToolCall {
                name, arguments, ..
            } => {
                writeln!(err, "\n  [tool] {name} {arguments}")?;
            }
            StreamEvent::ToolResult { name, result, .. } => {
                writeln!(err, "  [tool] {name} returned {} line(s)", result.lines().count())?;
            }
            StreamEvent::Error { message } => {
                writeln!(err, "\n  [error] {message}")?;
            }
            StreamEvent::Done {
                iterations,
                tool_calls_made,
            } => {
                debug!(iterations, tool_calls_made, "Stream finished");
            }
        }
    }

    let conversation = session.finish().await?;
    if !answered {
        if let Some(last) = conversation
            .messages
            .last()
            .filter(|m| m.role == Role::Assistant)
        {
            write!(out, "{}", last.content)?;
        }
    }
    writeln!(out)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chatloom_core::provider::{Provider, ProviderRequest, ProviderResponse};
    use chatloom_core::tool::ToolRegistry;

    struct FixedProvider(&'static str);

    #[async_trait::async_trait]
    impl Provider for FixedProvider {
        fn name(&self) -> &str {
            "fixed"
        }

        async fn complete(
            &self,
            _request: ProviderRequest,
        ) -> Result<ProviderResponse, ProviderError> {
            Ok(ProviderResponse {
                message: Message::assistant(self.0),
                usage: None,
                model: "fixed".into(),
            })
        }
    }

    async fn rendered(reply: &'static str, show_thoughts: bool) -> (String, String) {
        let agent = AgentLoop::new(
            Arc::new(FixedProvider(reply)),
            "fixed",
            Arc::new(ToolRegistry::new()),
        );
        let mut conversation = Conversation::new();
        conversation.push(Message::user("hi"));

        let mut out = Vec::new();
        let mut err = Vec::new();
        render(agent.process_stream(conversation), &mut out, &mut err, show_thoughts)
            .await
            .unwrap();
        (
            String::from_utf8(out).unwrap(),
            String::from_utf8(err).unwrap(),
        )
    }

    #[tokio::test]
    async fn answer_goes_to_stdout_and_thoughts_are_hidden() {
        let (out, err) = rendered("<think>hmm</think>Hello there", false).await;
        assert_eq!(out, "Hello there\n");
        assert!(err.is_empty());
    }

    #[tokio::test]
    async fn thoughts_are_shown_on_request() {
        let (_, err) = rendered("<think>hmm</think>Hello there", true).await;
        assert_eq!(err, "hmm");
    }

    #[tokio::test]
    async fn untagged_reply_is_printed_from_conversation() {
        let (out, _) = rendered("plain reply", false).await;
        assert_eq!(out, "plain reply\n");
    }

    #[test]
    fn build_agent_requires_api_key() {
        let config = AppConfig::default();
        assert!(matches!(
            build_agent(&config),
            Err(ProviderError::NotConfigured(_))
        ));
    }
}
