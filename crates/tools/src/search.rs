//! `search`: queries every configured JSON search endpoint and merges the hits.
//!
//! Endpoints are plain HTTP GET APIs described in config. Each endpoint gets
//! the query as one query-string parameter; the result array is found through
//! `results_pointer`, or by probing the common array keys.

use std::time::Duration;

use async_trait::async_trait;
use chatloom_config::{SearchEndpointConfig, ToolsConfig};
use chatloom_core::error::ToolError;
use chatloom_core::tool::ToolProvider;
use futures::future::join_all;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, warn};

use crate::fetch::{Fetcher, ResponseCache};

/// Result arrays are looked up under these keys when no pointer is configured.
const RESULT_KEYS: [&str; 6] = ["results", "items", "articles", "data", "hits", "search"];

const DEFAULT_MAX_RESULTS: usize = 8;
const MAX_QUERIES: usize = 4;

pub struct SearchTool {
    client: reqwest::Client,
    endpoints: Vec<SearchEndpointConfig>,
    timeout: Duration,
}

impl SearchTool {
    pub fn new(client: reqwest::Client, config: &ToolsConfig) -> Self {
        Self {
            client,
            endpoints: config.search_endpoints.clone(),
            timeout: Duration::from_secs(config.fetch_timeout_secs),
        }
    }

    async fn query_endpoint(
        fetcher: &Fetcher,
        endpoint: &SearchEndpointConfig,
        query: &str,
    ) -> Vec<SearchHit> {
        let url = match endpoint_url(endpoint, query) {
            Ok(url) => url,
            Err(e) => {
                warn!(endpoint = %endpoint.name, error = %e, "Invalid search endpoint URL");
                return Vec::new();
            }
        };

        let Some(body) = fetcher.get_json(&url).await else {
            return Vec::new();
        };

        let hits = parse_hits(&body, endpoint);
        debug!(endpoint = %endpoint.name, query, hits = hits.len(), "Search endpoint answered");
        hits
    }
}

#[async_trait]
impl ToolProvider for SearchTool {
    fn name(&self) -> &str {
        "search"
    }

    fn description(&self) -> &str {
        "Search the web for current information. Returns titled results with URLs and snippets."
    }

    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "query": {
                    "type": "string",
                    "description": "The search query"
                },
                "queries": {
                    "type": "array",
                    "items": { "type": "string" },
                    "description": "Several related queries, searched together"
                },
                "max_results": {
                    "type": "integer",
                    "description": "Maximum number of results (default 8)"
                }
            }
        })
    }

    async fn execute(&self, arguments: Value) -> std::result::Result<Value, ToolError> {
        let queries = collect_queries(&arguments);
        if queries.is_empty() {
            return Err(ToolError::InvalidArguments(
                "expected 'query' or 'queries'".into(),
            ));
        }

        if self.endpoints.is_empty() {
            return Ok(serde_json::json!({ "error": "no search endpoints configured" }));
        }

        let max_results = arguments["max_results"]
            .as_u64()
            .map(|n| n.clamp(1, 25) as usize)
            .unwrap_or(DEFAULT_MAX_RESULTS);

        let fetcher = Fetcher::new(self.client.clone(), self.timeout, ResponseCache::new());
        let fetcher = &fetcher;

        let requests = queries.iter().flat_map(|query| {
            self.endpoints
                .iter()
                .map(move |endpoint| Self::query_endpoint(fetcher, endpoint, query))
        });
        let batches = join_all(requests).await;

        let mut results: Vec<SearchHit> = Vec::new();
        for hit in batches.into_iter().flatten() {
            if results.len() >= max_results {
                break;
            }
            if !hit.url.is_empty() && results.iter().any(|r| r.url == hit.url) {
                continue;
            }
            results.push(hit);
        }

        Ok(serde_json::json!({
            "query": queries.join(" | "),
            "results": results,
        }))
    }
}

/// One normalized search hit.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchHit {
    pub title: String,
    pub url: String,
    pub snippet: String,
    pub source: String,
}

/// Accept `query`, `q`, `queries`, or `keywords` (string or array).
fn collect_queries(arguments: &Value) -> Vec<String> {
    let mut queries = Vec::new();
    for key in ["queries", "query", "q", "keywords"] {
        match &arguments[key] {
            Value::String(s) => queries.push(s.clone()),
            Value::Array(items) => {
                queries.extend(items.iter().filter_map(|v| v.as_str()).map(String::from))
            }
            _ => {}
        }
    }
    queries.retain(|q| !q.trim().is_empty());
    queries.dedup();
    queries.truncate(MAX_QUERIES);
    queries
}

fn endpoint_url(
    endpoint: &SearchEndpointConfig,
    query: &str,
) -> std::result::Result<String, String> {
    reqwest::Url::parse_with_params(&endpoint.url, &[(endpoint.query_param.as_str(), query)])
        .map(|url| url.to_string())
        .map_err(|e| e.to_string())
}

fn parse_hits(body: &Value, endpoint: &SearchEndpointConfig) -> Vec<SearchHit> {
    let items = match &endpoint.results_pointer {
        Some(pointer) => body.pointer(pointer),
        None if body.is_array() => Some(body),
        None => RESULT_KEYS.iter().find_map(|k| body.get(*k).filter(|v| v.is_array())),
    };

    items
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(|item| normalize_hit(item, &endpoint.name))
                .collect()
        })
        .unwrap_or_default()
}

fn first_str<'a>(item: &'a Value, keys: &[&str]) -> Option<&'a str> {
    keys.iter()
        .find_map(|k| item.get(*k).and_then(Value::as_str))
        .filter(|s| !s.trim().is_empty())
}

fn normalize_hit(item: &Value, endpoint_name: &str) -> Option<SearchHit> {
    let title = first_str(item, &["title", "name", "headline"]);
    let url = first_str(item, &["url", "link", "href"]);
    if title.is_none() && url.is_none() {
        return None;
    }

    Some(SearchHit {
        title: title.unwrap_or_default().trim().to_string(),
        url: url.unwrap_or_default().trim().to_string(),
        snippet: first_str(item, &["snippet", "description", "summary", "text", "content"])
            .unwrap_or_default()
            .trim()
            .to_string(),
        source: first_str(item, &["source", "site", "domain"])
            .unwrap_or(endpoint_name)
            .to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch::tests::serve;

    fn endpoint(url: &str, pointer: Option<&str>) -> SearchEndpointConfig {
        SearchEndpointConfig {
            name: "test".into(),
            url: url.into(),
            query_param: "q".into(),
            results_pointer: pointer.map(String::from),
        }
    }

    fn tool(endpoints: Vec<SearchEndpointConfig>) -> SearchTool {
        let config = ToolsConfig {
            fetch_timeout_secs: 5,
            search_endpoints: endpoints,
            ..ToolsConfig::default()
        };
        SearchTool::new(reqwest::Client::new(), &config)
    }

    #[test]
    fn queries_from_every_argument_shape() {
        assert_eq!(collect_queries(&serde_json::json!({"query": "rust"})), vec!["rust"]);
        assert_eq!(
            collect_queries(&serde_json::json!({"queries": ["a", "b", ""]})),
            vec!["a", "b"]
        );
        assert_eq!(collect_queries(&serde_json::json!({"q": "x"})), vec!["x"]);
        assert!(collect_queries(&serde_json::json!({"limit": 3})).is_empty());
    }

    #[test]
    fn query_is_url_encoded() {
        let api = endpoint("https://search.example.org/api?format=json", None);
        let url = endpoint_url(&api, "rust & tokio").unwrap();
        assert!(url.starts_with("https://search.example.org/api?format=json&q="));
        assert!(url.contains("rust+%26+tokio"));
        assert!(endpoint_url(&endpoint("not a url", None), "x").is_err());
    }

    #[test]
    fn hits_found_by_pointer_or_common_key() {
        let body = serde_json::json!({"query": {"search": [{"title": "Rust", "url": "https://rust-lang.org"}]}});
        let hits = parse_hits(&body, &endpoint("https://x", Some("/query/search")));
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].source, "test");

        let body = serde_json::json!({"items": [
            {"name": "Tokio", "link": "https://tokio.rs", "description": "async runtime", "source": "docs"},
            {"irrelevant": true}
        ]});
        let hits = parse_hits(&body, &endpoint("https://x", None));
        assert_eq!(
            hits,
            vec![SearchHit {
                title: "Tokio".into(),
                url: "https://tokio.rs".into(),
                snippet: "async runtime".into(),
                source: "docs".into(),
            }]
        );
    }

    #[tokio::test]
    async fn missing_query_is_invalid_arguments() {
        let err = tool(vec![]).execute(serde_json::json!({})).await.unwrap_err();
        assert!(matches!(err, ToolError::InvalidArguments(_)));
    }

    #[tokio::test]
    async fn no_endpoints_is_reported_in_result() {
        let result = tool(vec![]).execute(serde_json::json!({"query": "x"})).await.unwrap();
        assert!(result["error"].as_str().unwrap().contains("no search endpoints"));
    }

    #[tokio::test]
    async fn merges_and_dedups_hits_across_queries() {
        let body = serde_json::json!({"results": [
            {"title": "One", "url": "https://one.example", "snippet": "first"},
            {"title": "Two", "url": "https://two.example", "snippet": "second"}
        ]})
        .to_string();
        let (base, hits) = serve("200 OK", "application/json", body, Duration::ZERO).await;

        let result = tool(vec![endpoint(&format!("{base}/search"), None)])
            .execute(serde_json::json!({"queries": ["alpha", "beta"]}))
            .await
            .unwrap();

        let results = result["results"].as_array().unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0]["title"], "One");
        // one request per distinct URL
        assert_eq!(hits.load(std::sync::atomic::Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn unreachable_endpoint_yields_empty_results() {
        let (base, _) = serve(
            "503 Service Unavailable",
            "text/plain",
            "down".into(),
            Duration::ZERO,
        )
        .await;
        let result = tool(vec![endpoint(&base, None)])
            .execute(serde_json::json!({"query": "x"}))
            .await
            .unwrap();
        assert!(result["results"].as_array().unwrap().is_empty());
        assert!(result.get("error").is_none());
    }
}
