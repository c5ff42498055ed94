//! Built-in tool providers for Chatloom.
//!
//! - `search`: queries the configured JSON search endpoints
//! - `reader`: fetches pages and returns their readable text
//!
//! Both build a fresh [`fetch::Fetcher`] per call, so responses are cached
//! for the duration of one tool call and slow endpoints degrade to empty
//! results instead of failing the call.

pub mod fetch;
pub mod reader;
pub mod search;

use std::sync::Arc;
use std::time::Duration;

use chatloom_config::ToolsConfig;
use chatloom_core::tool::ToolRegistry;

pub use fetch::{Fetcher, ResponseCache};
pub use reader::ReaderTool;
pub use search::{SearchHit, SearchTool};

/// Create a registry holding the built-in tools.
pub fn default_registry(config: &ToolsConfig) -> ToolRegistry {
    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(config.fetch_timeout_secs.saturating_mul(2).max(1)))
        .build()
        .unwrap_or_default();

    let mut registry = ToolRegistry::new();
    registry.register(Arc::new(SearchTool::new(client.clone(), config)));
    registry.register(Arc::new(ReaderTool::new(client, config)));
    registry
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_registry_has_search_and_reader() {
        let registry = default_registry(&ToolsConfig::default());
        assert_eq!(registry.names(), vec!["reader", "search"]);
        let defs = registry.definitions();
        assert!(defs.iter().all(|d| d.parameters["type"] == "object"));
    }
}
