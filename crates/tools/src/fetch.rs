//! Timeout-bounded HTTP fetching with a per-call response cache.
//!
//! Every tool invocation builds its own [`Fetcher`], so the cache lives
//! exactly as long as one tool call and is never shared across
//! conversations. A sub-request that times out, fails, or answers non-2xx
//! degrades to `None` instead of failing the whole tool call.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tracing::{debug, warn};

/// Response bodies keyed by URL. A cached `None` records a failed fetch.
#[derive(Debug, Clone, Default)]
pub struct ResponseCache {
    entries: Arc<Mutex<HashMap<String, Option<String>>>>,
}

impl ResponseCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// `Some(outcome)` when `url` was already fetched during this call.
    pub fn get(&self, url: &str) -> Option<Option<String>> {
        self.entries.lock().ok()?.get(url).cloned()
    }

    pub fn insert(&self, url: impl Into<String>, body: Option<String>) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.insert(url.into(), body);
        }
    }

    pub fn len(&self) -> usize {
        self.entries.lock().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// An HTTP GET client bound to one tool call.
#[derive(Debug, Clone)]
pub struct Fetcher {
    client: reqwest::Client,
    timeout: Duration,
    cache: ResponseCache,
}

impl Fetcher {
    pub fn new(client: reqwest::Client, timeout: Duration, cache: ResponseCache) -> Self {
        Self {
            client,
            timeout,
            cache,
        }
    }

    pub fn cache(&self) -> &ResponseCache {
        &self.cache
    }

    /// GET `url` and return the body text, or `None` on any failure.
    pub async fn get_text(&self, url: &str) -> Option<String> {
        if let Some(cached) = self.cache.get(url) {
            debug!(url, "Fetch cache hit");
            return cached;
        }

        let body = self.fetch_uncached(url).await;
        self.cache.insert(url, body.clone());
        body
    }

    /// GET `url` and decode the body as JSON.
    pub async fn get_json(&self, url: &str) -> Option<serde_json::Value> {
        let text = self.get_text(url).await?;
        match serde_json::from_str(&text) {
            Ok(value) => Some(value),
            Err(e) => {
                warn!(url, error = %e, "Fetched body is not JSON");
                None
            }
        }
    }

    async fn fetch_uncached(&self, url: &str) -> Option<String> {
        let request = async {
            let response = self
                .client
                .get(url)
                .header("User-Agent", concat!("chatloom/", env!("CARGO_PKG_VERSION")))
                .send()
                .await?;
            let status = response.status();
            let text = response.text().await?;
            Ok::<_, reqwest::Error>((status, text))
        };

        match tokio::time::timeout(self.timeout, request).await {
            Ok(Ok((status, text))) if status.is_success() => Some(text),
            Ok(Ok((status, _))) => {
                warn!(url, status = status.as_u16(), "Fetch returned non-success status");
                None
            }
            Ok(Err(e)) => {
                warn!(url, error = %e, "Fetch failed");
                None
            }
            Err(_) => {
                warn!(
                    url,
                    timeout_secs = self.timeout.as_secs_f32(),
                    "Fetch timed out, continuing without it"
                );
                None
            }
        }
    }
}
