//! Model resolvers for the alternate-model fallback rung.

use std::sync::Arc;

use async_trait::async_trait;
use chatloom_core::error::ProviderError;
use chatloom_core::provider::ModelResolver;
use tracing::debug;

/// Always answers with one configured model.
#[derive(Debug, Clone)]
pub struct StaticModelResolver {
    model: String,
}

impl StaticModelResolver {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
        }
    }
}

#[async_trait]
impl ModelResolver for StaticModelResolver {
    async fn resolve(&self, _preferred: &str) -> std::result::Result<String, ProviderError> {
        Ok(self.model.clone())
    }
}

/// Asks the endpoint which models it serves and picks the first one that
/// differs from the rejected model. Falls back to a static default when the
/// listing is empty or fails.
pub struct ListedModelResolver {
    provider: Arc<dyn chatloom_core::Provider>,
    default_model: String,
}

impl ListedModelResolver {
    pub fn new(
        provider: Arc<dyn chatloom_core::Provider>,
        default_model: impl Into<String>,
    ) -> Self {
        Self {
            provider,
            default_model: default_model.into(),
        }
    }
}

#[async_trait]
impl ModelResolver for ListedModelResolver {
    async fn resolve(&self, preferred: &str) -> std::result::Result<String, ProviderError> {
        let models = match self.provider.list_models().await {
            Ok(models) => models,
            Err(e) => {
                debug!(error = %e, "Model listing failed, using default");
                Vec::new()
            }
        };

        Ok(models
            .into_iter()
            .find(|m| m != preferred)
            .unwrap_or_else(|| self.default_model.clone()))
    }
}
