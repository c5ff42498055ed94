//! `reader`: fetches pages and returns their readable text.

use std::sync::LazyLock;
use std::time::Duration;

use async_trait::async_trait;
use chatloom_config::ToolsConfig;
use chatloom_core::error::ToolError;
use chatloom_core::tool::ToolProvider;
use futures::future::join_all;
use regex::Regex;
use serde_json::Value;
use tracing::debug;

use crate::fetch::{Fetcher, ResponseCache};

const MAX_URLS: usize = 3;

static TITLE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<title[^>]*>(.*?)</title>").expect("valid regex"));
static INVISIBLE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?is)<(script|style|noscript|svg|head)[^>]*>.*?</(script|style|noscript|svg|head)>",
    )
    .expect("valid regex")
});
static COMMENT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)<!--.*?-->").expect("valid regex"));
static BLOCK_END: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)</(p|div|li|h[1-6]|tr|section|article)>|<br\s*/?>").expect("valid regex")
});
static TAG: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?s)<[^>]+>").expect("valid regex"));
static SPACES: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[ \t\r\f]+").expect("valid regex"));
static BLANK_LINES: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\n\s*\n+").expect("valid regex"));

pub struct ReaderTool {
    client: reqwest::Client,
    timeout: Duration,
    max_chars: usize,
}

impl ReaderTool {
    pub fn new(client: reqwest::Client, config: &ToolsConfig) -> Self {
        Self {
            client,
            timeout: Duration::from_secs(config.fetch_timeout_secs),
            max_chars: config.reader_max_chars,
        }
    }

    async fn read_one(&self, fetcher: &Fetcher, url: &str) -> Option<Value> {
        let body = fetcher.get_text(url).await?;
        let (title, text) = if looks_like_html(&body) {
            (extract_title(&body), html_to_text(&body))
        } else {
            (None, body.trim().to_string())
        };
        if text.is_empty() {
            debug!(url, "Fetched page has no readable text");
            return None;
        }

        Some(serde_json::json!({
            "title": title.unwrap_or_else(|| url.to_string()),
            "url": url,
            "content": truncate_chars(&text, self.max_chars),
            "source": "reader",
        }))
    }
}

#[async_trait]
impl ToolProvider for ReaderTool {
    fn name(&self) -> &str {
        "reader"
    }

    fn description(&self) -> &str {
        "Fetch one or more web pages and return their readable text."
    }

    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "url": {
                    "type": "string",
                    "description": "The page URL (http or https)"
                },
                "urls": {
                    "type": "array",
                    "items": { "type": "string" },
                    "description": "Up to three page URLs"
                }
            }
        })
    }

    async fn execute(&self, arguments: Value) -> std::result::Result<Value, ToolError> {
        let urls = collect_urls(&arguments);
        if urls.is_empty() {
            return Err(ToolError::InvalidArguments("expected 'url' or 'urls'".into()));
        }
        if let Some(bad) = urls
            .iter()
            .find(|u| !u.starts_with("http://") && !u.starts_with("https://"))
        {
            return Err(ToolError::InvalidArguments(format!(
                "URL must start with http:// or https://: {bad}"
            )));
        }

        let fetcher = Fetcher::new(self.client.clone(), self.timeout, ResponseCache::new());
        let pages: Vec<Value> = join_all(urls.iter().map(|url| self.read_one(&fetcher, url)))
            .await
            .into_iter()
            .flatten()
            .collect();

        if pages.is_empty() {
            return Ok(serde_json::json!({
                "error": format!("could not read {}", urls.join(", "))
            }));
        }

        Ok(serde_json::json!({ "results": pages }))
    }
}

fn collect_urls(arguments: &Value) -> Vec<String> {
    let mut urls = Vec::new();
    for key in ["urls", "url", "link", "links"] {
        match &arguments[key] {
            Value::String(s) => urls.push(s.trim().to_string()),
            Value::Array(items) => urls.extend(
                items
                    .iter()
                    .filter_map(|v| v.as_str())
                    .map(|s| s.trim().to_string()),
            ),
            _ => {}
        }
    }
    urls.retain(|u| !u.is_empty());
    urls.dedup();
    urls.truncate(MAX_URLS);
    urls
}

fn looks_like_html(body: &str) -> bool {
    let head: String = body.chars().take(512).collect::<String>().to_lowercase();
    ["<html", "<!doctype", "<body", "<div"]
        .iter()
        .any(|marker| head.contains(marker))
}

fn extract_title(html: &str) -> Option<String> {
    TITLE
        .captures(html)
        .and_then(|c| c.get(1))
        .map(|m| decode_entities(m.as_str().trim()))
        .filter(|t| !t.is_empty())
}

/// Reduce an HTML document to paragraphs of plain text.
pub fn html_to_text(html: &str) -> String {
    let text = INVISIBLE.replace_all(html, " ");
    let text = COMMENT.replace_all(&text, " ");
    let text = BLOCK_END.replace_all(&text, "\n");
    let text = TAG.replace_all(&text, " ");
    let text = decode_entities(&text);
    let text = SPACES.replace_all(&text, " ");
    let text = BLANK_LINES.replace_all(&text, "\n");
    text.lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

fn decode_entities(text: &str) -> String {
    text.replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}

fn truncate_chars(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        text.to_string()
    } else {
        text.chars().take(max).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch::tests::serve;

    const PAGE: &str = r#"<!DOCTYPE html>
<html><head><title>Tokio &amp; Friends</title><style>body { color: red; }</style></head>
<body>
<script>var tracking = 1;</script>
<h1>Async Rust</h1>
<p>Tokio is a runtime for <b>asynchronous</b> applications.</p>
<!-- hidden -->
<div>It provides I/O &lt;and&gt; timers.</div>
</body></html>"#;

    fn tool(max_chars: usize) -> ReaderTool {
        let config = ToolsConfig {
            fetch_timeout_secs: 5,
            reader_max_chars: max_chars,
            ..ToolsConfig::default()
        };
        ReaderTool::new(reqwest::Client::new(), &config)
    }

    #[test]
    fn html_is_reduced_to_visible_text() {
        let text = html_to_text(PAGE);
        assert!(text.contains("Async Rust"));
        assert!(text.contains("Tokio is a runtime for asynchronous applications."));
        assert!(text.contains("It provides I/O <and> timers."));
        assert!(!text.contains("tracking"));
        assert!(!text.contains("color: red"));
        assert!(!text.contains("hidden"));
        assert!(!text.contains("Tokio & Friends"));
    }

    #[test]
    fn title_is_extracted_and_decoded() {
        assert_eq!(extract_title(PAGE).as_deref(), Some("Tokio & Friends"));
        assert!(extract_title("<p>no title</p>").is_none());
    }

    #[test]
    fn url_arguments() {
        assert_eq!(
            collect_urls(&serde_json::json!({"url": " https://a.example "})),
            vec!["https://a.example"]
        );
        let many = collect_urls(&serde_json::json!({
            "urls": ["https://1", "https://2", "https://3", "https://4"]
        }));
        assert_eq!(many.len(), MAX_URLS);
    }

    #[tokio::test]
    async fn rejects_non_http_urls() {
        let err = tool(100)
            .execute(serde_json::json!({"url": "file:///etc/hosts"}))
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::InvalidArguments(_)));
    }

    #[tokio::test]
    async fn reads_and_truncates_page() {
        let (base, _) = serve("200 OK", "text/html", PAGE.into(), Duration::ZERO).await;
        let result = tool(20)
            .execute(serde_json::json!({"url": format!("{base}/page")}))
            .await
            .unwrap();

        let page = &result["results"][0];
        assert_eq!(page["title"], "Tokio & Friends");
        assert_eq!(page["source"], "reader");
        assert_eq!(page["content"].as_str().unwrap().chars().count(), 20);
    }

    #[tokio::test]
    async fn unreadable_pages_become_error_field() {
        let (base, _) = serve("404 Not Found", "text/html", "gone".into(), Duration::ZERO).await;
        let result = tool(100)
            .execute(serde_json::json!({"url": base.clone()}))
            .await
            .unwrap();
        assert!(result["error"].as_str().unwrap().contains(&base));
    }
}
