//! Request-shape fallback: a bounded retry ladder for rejected requests.
//!
//! Some OpenAI-compatible endpoints reject fields they do not understand
//! (most often `tools`/`tool_choice`) or models they do not serve. When the
//! wrapped provider answers with a request rejection (a 4xx other than
//! 401/403/408/429) the request is resent in progressively simpler shapes:
//!
//! 1. the identical request
//! 2. the request with `tools`, `tool_choice` and `stream_options` removed
//! 3. the stripped request against an alternate model from a [`ModelResolver`]
//!
//! Each rung runs at most once. Any other failure is returned immediately.

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use chatloom_core::error::ProviderError;
use chatloom_core::provider::*;
use tracing::{debug, info, warn};

/// One rung of the ladder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FallbackRung {
    Retry,
    StripTools,
    AlternateModel,
}

impl FallbackRung {
    pub const LADDER: [FallbackRung; 3] = [Self::Retry, Self::StripTools, Self::AlternateModel];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Retry => "retry",
            Self::StripTools => "strip_tools",
            Self::AlternateModel => "alternate_model",
        }
    }
}

/// Wraps a provider with the request-shape fallback ladder.
pub struct ShapeFallbackProvider {
    name: String,
    inner: Arc<dyn chatloom_core::Provider>,
    resolver: Option<Arc<dyn ModelResolver>>,
}

impl ShapeFallbackProvider {
    pub fn new(inner: Arc<dyn chatloom_core::Provider>) -> Self {
        Self {
            name: format!("{}+fallback", inner.name()),
            inner,
            resolver: None,
        }
    }

    /// Enable the alternate-model rung.
    pub fn with_resolver(mut self, resolver: Arc<dyn ModelResolver>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    /// Build the request for `rung`, or `None` when the rung cannot change anything.
    async fn reshape(
        &self,
        rung: FallbackRung,
        original: &ProviderRequest,
    ) -> Option<ProviderRequest> {
        match rung {
            FallbackRung::Retry => Some(original.clone()),
            FallbackRung::StripTools => {
                if original.has_optional_fields() {
                    Some(original.clone().minimal())
                } else {
                    None
                }
            }
            FallbackRung::AlternateModel => {
                let resolver = self.resolver.as_ref()?;
                match resolver.resolve(&original.model).await {
                    Ok(model) if model != original.model => {
                        let mut request = original.clone().minimal();
                        request.model = model;
                        Some(request)
                    }
                    Ok(_) => None,
                    Err(e) => {
                        warn!(error = %e, "Fallback: model resolver failed");
                        None
                    }
                }
            }
        }
    }

    /// Run `op` against the original request, climbing the ladder on rejection.
    async fn climb<T, F, Fut>(
        &self,
        request: ProviderRequest,
        op: F,
    ) -> std::result::Result<T, ProviderError>
    where
        F: Fn(ProviderRequest) -> Fut,
        Fut: Future<Output = std::result::Result<T, ProviderError>>,
    {
        let mut last_error = match op(request.clone()).await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_request_rejection() => e,
            Err(e) => return Err(e),
        };

        for rung in FallbackRung::LADDER {
            let Some(reshaped) = self.reshape(rung, &request).await else {
                debug!(rung = rung.as_str(), "Fallback: rung not applicable, skipping");
                continue;
            };

            info!(
                provider = %self.inner.name(),
                rung = rung.as_str(),
                model = %reshaped.model,
                tools = reshaped.tools.len(),
                previous_error = %last_error,
                "Fallback: resending request"
            );

            match op(reshaped).await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_request_rejection() => {
                    warn!(rung = rung.as_str(), error = %e, "Fallback: rung rejected");
                    last_error = e;
                }
                Err(e) => return Err(e),
            }
        }

        Err(last_error)
    }
}

#[async_trait]
impl chatloom_core::Provider for ShapeFallbackProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn complete(
        &self,
        request: ProviderRequest,
    ) -> std::result::Result<ProviderResponse, ProviderError> {
        self.climb(request, |req| self.inner.complete(req)).await
    }

    async fn stream(
        &self,
        request: ProviderRequest,
    ) -> std::result::Result<ChunkReceiver, ProviderError> {
        self.climb(request, |req| self.inner.stream(req)).await
    }

    async fn list_models(&self) -> std::result::Result<Vec<String>, ProviderError> {
        self.inner.list_models().await
    }
}
