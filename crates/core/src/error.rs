//! Error types for the Chatloom engine.
//!
//! Uses `thiserror` for ergonomic error definitions. Transport and tool
//! failures have their own enums; [`EngineError`] is what callers of the
//! orchestration loop observe.

use thiserror::Error;

/// The top-level error returned by a conversation turn.
///
/// Only fatal conditions appear here. Tool failures and unparsable tool
/// markup are recovered inside the loop and never reach the caller.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Non-2xx response after the fallback ladder, or a network failure.
    #[error("Transport error: {0}")]
    Transport(#[from] ProviderError),

    /// The endpoint answered 2xx but the payload was missing or malformed.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// The tool loop guard tripped.
    #[error("Tool loop exceeded {limit} iterations")]
    LoopExceeded { limit: u32 },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl EngineError {
    /// Lift a transport error, routing protocol violations to [`EngineError::Protocol`].
    pub fn from_provider(err: ProviderError) -> Self {
        match err {
            ProviderError::Protocol(message) => Self::Protocol(message),
            other => Self::Transport(other),
        }
    }
}

/// Result type alias using [`EngineError`].
pub type Result<T> = std::result::Result<T, EngineError>;

#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    #[error("API request failed: {message} (status: {status_code})")]
    ApiError { status_code: u16, message: String },

    #[error("Rate limited by provider, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Malformed response: {0}")]
    Protocol(String),

    #[error("Stream interrupted: {0}")]
    StreamInterrupted(String),

    #[error("Provider not configured: {0}")]
    NotConfigured(String),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Network error: {0}")]
    Network(String),
}

impl ProviderError {
    /// Whether the endpoint rejected the *shape* of the request.
    ///
    /// Auth failures, timeouts and rate limits are client errors too, but
    /// resending a reshaped payload cannot fix them.
    pub fn is_request_rejection(&self) -> bool {
        matches!(
            self,
            Self::ApiError { status_code, .. }
                if (400..500).contains(status_code) && !matches!(status_code, 401 | 403 | 408 | 429)
        )
    }
}

#[derive(Debug, Clone, Error)]
pub enum ToolError {
    #[error("Unknown tool: {0}")]
    UnknownTool(String),

    #[error("Tool execution failed: {tool_name}: {reason}")]
    ExecutionFailed { tool_name: String, reason: String },

    #[error("Tool timed out: {tool_name} after {timeout_secs}s")]
    Timeout { tool_name: String, timeout_secs: u64 },

    #[error("Invalid tool arguments: {0}")]
    InvalidArguments(String),
}
