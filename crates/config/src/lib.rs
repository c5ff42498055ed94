//! Configuration loading, validation, and management for Chatloom.
//!
//! Loads configuration from `~/.chatloom/config.toml` with environment
//! variable overrides. Validates all settings at startup.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Default ceiling on the summed size of every message, in chars.
pub const DEFAULT_MAX_TOTAL_CHARS: usize = 250_000;
/// Default ceiling on one non-system, non-tool message, in chars.
pub const DEFAULT_MAX_MESSAGE_CHARS: usize = 100_000;
/// Default ceiling on one tool message (footer included), in chars.
pub const DEFAULT_MAX_TOOL_CHARS: usize = 24_000;
/// Default bound on tool-requesting round trips per user turn.
pub const DEFAULT_MAX_TOOL_ITERATIONS: u32 = 6;

/// The root configuration structure.
///
/// Maps directly to `~/.chatloom/config.toml`.
#[derive(Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// API key for the completion endpoint
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Base URL of the OpenAI-compatible endpoint
    #[serde(default = "default_api_url")]
    pub api_url: String,

    /// Default model
    #[serde(default = "default_model")]
    pub default_model: String,

    /// Model to retry with when the endpoint rejects the default one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fallback_model: Option<String>,

    /// Default temperature
    #[serde(default = "default_temperature")]
    pub default_temperature: f32,

    /// Default max tokens per LLM response
    #[serde(default = "default_max_tokens")]
    pub default_max_tokens: u32,

    /// Per-request timeout for completion calls
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// Stream completions by default
    #[serde(default = "default_true")]
    pub stream: bool,

    /// Engine limits and prompt
    #[serde(default)]
    pub engine: EngineConfig,

    /// Built-in tool settings
    #[serde(default)]
    pub tools: ToolsConfig,
}

fn default_api_url() -> String {
    "https://api.openai.com/v1".into()
}
fn default_model() -> String {
    "gpt-4o-mini".into()
}
fn default_temperature() -> f32 {
    0.7
}
fn default_max_tokens() -> u32 {
    4096
}
fn default_request_timeout_secs() -> u64 {
    120
}
fn default_true() -> bool {
    true
}

/// Redact a secret for Debug output.
fn redact(s: &Option<String>) -> &'static str {
    match s {
        Some(_) => "[REDACTED]",
        None => "None",
    }
}

impl std::fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppConfig")
            .field("api_key", &redact(&self.api_key))
            .field("api_url", &self.api_url)
            .field("default_model", &self.default_model)
            .field("fallback_model", &self.fallback_model)
            .field("default_temperature", &self.default_temperature)
            .field("default_max_tokens", &self.default_max_tokens)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .field("stream", &self.stream)
            .field("engine", &self.engine)
            .field("tools", &self.tools)
            .finish()
    }
}

/// Limits enforced by the orchestration loop and context budget manager.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default = "default_max_total_chars")]
    pub max_total_chars: usize,

    #[serde(default = "default_max_message_chars")]
    pub max_message_chars: usize,

    #[serde(default = "default_max_tool_chars")]
    pub max_tool_chars: usize,

    #[serde(default = "default_max_tool_iterations")]
    pub max_tool_iterations: u32,

    /// Advertise tools to the model
    #[serde(default = "default_true")]
    pub tools_enabled: bool,

    /// Inserted as the first message when a conversation has none
    #[serde(default = "default_system_prompt")]
    pub system_prompt: String,

    /// Capacity of the streaming event channel
    #[serde(default = "default_event_buffer")]
    pub event_buffer: usize,
}

fn default_max_total_chars() -> usize {
    DEFAULT_MAX_TOTAL_CHARS
}
fn default_max_message_chars() -> usize {
    DEFAULT_MAX_MESSAGE_CHARS
}
fn default_max_tool_chars() -> usize {
    DEFAULT_MAX_TOOL_CHARS
}
fn default_max_tool_iterations() -> u32 {
    DEFAULT_MAX_TOOL_ITERATIONS
}
fn default_event_buffer() -> usize {
    16
}
fn default_system_prompt() -> String {
    "You are a helpful assistant. Reason inside <think>...</think> before answering. \
     When you need fresh information, call a tool; if native tool calls are unavailable, \
     reply with <tool>{\"name\": \"...\", \"arguments\": {...}}</tool> and nothing else."
        .into()
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_total_chars: default_max_total_chars(),
            max_message_chars: default_max_message_chars(),
            max_tool_chars: default_max_tool_chars(),
            max_tool_iterations: default_max_tool_iterations(),
            tools_enabled: true,
            system_prompt: default_system_prompt(),
            event_buffer: default_event_buffer(),
        }
    }
}

/// Settings for the built-in `search` and `reader` tools.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolsConfig {
    /// Timeout for each provider sub-request
    #[serde(default = "default_fetch_timeout_secs")]
    pub fetch_timeout_secs: u64,

    /// Max chars of page text the reader keeps per URL
    #[serde(default = "default_reader_max_chars")]
    pub reader_max_chars: usize,

    /// JSON search endpoints queried by the `search` tool
    #[serde(default)]
    pub search_endpoints: Vec<SearchEndpointConfig>,
}

fn default_fetch_timeout_secs() -> u64 {
    10
}
fn default_reader_max_chars() -> usize {
    12_000
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            fetch_timeout_secs: default_fetch_timeout_secs(),
            reader_max_chars: default_reader_max_chars(),
            search_endpoints: vec![],
        }
    }
}

/// One JSON search endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchEndpointConfig {
    /// Label shown as the source of each result line
    pub name: String,

    /// Base URL; the query is appended as a query-string parameter
    pub url: String,

    /// Name of the query-string parameter
    #[serde(default = "default_query_param")]
    pub query_param: String,

    /// JSON pointer to the result array (e.g. "/data/items")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub results_pointer: Option<String>,
}

fn default_query_param() -> String {
    "q".into()
}

impl AppConfig {
    /// Load configuration from the default path (~/.chatloom/config.toml).
    ///
    /// Environment overrides:
    /// - `CHATLOOM_API_KEY`, then `OPENAI_API_KEY` (only if no key is configured)
    /// - `CHATLOOM_API_URL`
    /// - `CHATLOOM_MODEL`
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_dir().join("config.toml");
        let mut config = Self::load_from(&config_path)?;
        config.apply_env(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!("No config file found at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Apply environment overrides through a lookup function.
    fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if self.api_key.is_none() {
            self.api_key = lookup("CHATLOOM_API_KEY").or_else(|| lookup("OPENAI_API_KEY"));
        }
        if let Some(url) = lookup("CHATLOOM_API_URL") {
            self.api_url = url;
        }
        if let Some(model) = lookup("CHATLOOM_MODEL") {
            self.default_model = model;
        }
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".chatloom")
    }

    /// Validate the configuration.
    fn validate(&self) -> Result<(), ConfigError> {
        if self.default_temperature < 0.0 || self.default_temperature > 2.0 {
            return Err(ConfigError::ValidationError(
                "default_temperature must be between 0.0 and 2.0".into(),
            ));
        }

        let engine = &self.engine;
        if engine.max_total_chars == 0
            || engine.max_message_chars == 0
            || engine.max_tool_chars == 0
        {
            return Err(ConfigError::ValidationError(
                "engine char budgets must be greater than 0".into(),
            ));
        }

        if engine.max_tool_chars > engine.max_total_chars {
            return Err(ConfigError::ValidationError(
                "engine.max_tool_chars must not exceed engine.max_total_chars".into(),
            ));
        }

        if engine.max_tool_iterations == 0 {
            return Err(ConfigError::ValidationError(
                "engine.max_tool_iterations must be at least 1".into(),
            ));
        }

        if engine.event_buffer == 0 {
            return Err(ConfigError::ValidationError(
                "engine.event_buffer must be at least 1".into(),
            ));
        }

        for endpoint in &self.tools.search_endpoints {
            if !endpoint.url.starts_with("http://") && !endpoint.url.starts_with("https://") {
                return Err(ConfigError::ValidationError(format!(
                    "search endpoint '{}' must use http:// or https://",
                    endpoint.name
                )));
            }
        }

        Ok(())
    }

    /// Check if an API key is available (from config or environment).
    pub fn has_api_key(&self) -> bool {
        self.api_key.is_some()
    }

    /// Generate a default config TOML string.
    pub fn default_toml() -> String {
        let config = Self::default();
        toml::to_string_pretty(&config).unwrap_or_default()
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            api_url: default_api_url(),
            default_model: default_model(),
            fallback_model: None,
            default_temperature: default_temperature(),
            default_max_tokens: default_max_tokens(),
            request_timeout_secs: default_request_timeout_secs(),
            stream: true,
            engine: EngineConfig::default(),
            tools: ToolsConfig::default(),
        }
    }
}

/// Get the user's home directory.
fn dirs_home() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var("USERPROFILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("C:\\Users\\Default"))
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/tmp"))
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {reason}")]
    ReadError { path: PathBuf, reason: String },

    #[error("Failed to parse config file at {path}: {reason}")]
    ParseError { path: PathBuf, reason: String },

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn default_config_is_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.engine.max_total_chars, 250_000);
        assert_eq!(config.engine.max_tool_iterations, 6);
        assert!(config.stream);
    }

    #[test]
    fn config_roundtrip_toml() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).unwrap();
        let parsed: AppConfig = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed.default_model, config.default_model);
        assert_eq!(parsed.engine.max_tool_chars, config.engine.max_tool_chars);
    }

    #[test]
    fn invalid_temperature_rejected() {
        let config = AppConfig {
            default_temperature: 5.0,
            ..AppConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn tool_budget_larger_than_total_rejected() {
        let mut config = AppConfig::default();
        config.engine.max_tool_chars = config.engine.max_total_chars + 1;
        assert!(config.validate().is_err());
    }

    #[test]
    fn zero_iterations_rejected() {
        let mut config = AppConfig::default();
        config.engine.max_tool_iterations = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn missing_config_file_returns_defaults() {
        let result = AppConfig::load_from(Path::new("/nonexistent/config.toml"));
        assert!(result.is_ok());
        let config = result.unwrap();
        assert_eq!(config.default_model, "gpt-4o-mini");
    }

    #[test]
    fn load_from_file_with_partial_sections() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
default_model = "llama-3.1-70b"
fallback_model = "llama-3.1-8b"
stream = false

[engine]
max_tool_iterations = 3

[[tools.search_endpoints]]
name = "wiki"
url = "https://search.example.org/api"
results_pointer = "/query/search"
"#
        )
        .unwrap();

        let config = AppConfig::load_from(file.path()).unwrap();
        assert_eq!(config.default_model, "llama-3.1-70b");
        assert_eq!(config.fallback_model.as_deref(), Some("llama-3.1-8b"));
        assert!(!config.stream);
        assert_eq!(config.engine.max_tool_iterations, 3);
        assert_eq!(config.engine.max_total_chars, DEFAULT_MAX_TOTAL_CHARS);
        assert_eq!(config.tools.search_endpoints.len(), 1);
        assert_eq!(config.tools.search_endpoints[0].query_param, "q");
    }

    #[test]
    fn invalid_endpoint_scheme_rejected() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
[[tools.search_endpoints]]
name = "local"
url = "file:///etc/passwd"
"#
        )
        .unwrap();

        let err = AppConfig::load_from(file.path()).unwrap_err();
        assert!(matches!(err, ConfigError::ValidationError(_)));
    }

    #[test]
    fn env_overrides_apply() {
        let mut config = AppConfig::default();
        config.apply_env(|key| match key {
            "OPENAI_API_KEY" => Some("sk-env".into()),
            "CHATLOOM_MODEL" => Some("gpt-4.1".into()),
            _ => None,
        });
        assert_eq!(config.api_key.as_deref(), Some("sk-env"));
        assert_eq!(config.default_model, "gpt-4.1");
        assert_eq!(config.api_url, default_api_url());
    }

    #[test]
    fn env_does_not_replace_configured_key() {
        let mut config = AppConfig {
            api_key: Some("sk-file".into()),
            ..AppConfig::default()
        };
        config.apply_env(|_| Some("sk-env".into()));
        assert_eq!(config.api_key.as_deref(), Some("sk-file"));
    }

    #[test]
    fn debug_redacts_api_key() {
        let config = AppConfig {
            api_key: Some("sk-secret-value".into()),
            ..AppConfig::default()
        };
        let debug = format!("{config:?}");
        assert!(!debug.contains("sk-secret-value"));
        assert!(debug.contains("[REDACTED]"));
    }

    #[test]
    fn default_toml_generation() {
        let toml_str = AppConfig::default_toml();
        assert!(toml_str.contains("gpt-4o-mini"));
        assert!(toml_str.contains("max_total_chars"));
    }
}
