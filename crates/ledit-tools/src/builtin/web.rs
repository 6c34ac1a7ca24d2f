// SPDX-License-Identifier: Apache-2.0
use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

use crate::tool::{Tool, ToolCall, ToolCategory, ToolErrorKind, ToolOutput};

const DEFAULT_FETCH_MAX_CHARS: usize = 50_000;

/// Web search via the Brave Search API.
pub struct WebSearchTool {
    pub api_key: Option<String>,
    pub client: reqwest::Client,
}

impl WebSearchTool {
    pub fn new(api_key: Option<String>) -> Self {
        Self {
            api_key,
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl Tool for WebSearchTool {
    fn name(&self) -> &str {
        "web_search"
    }

    fn description(&self) -> &str {
        "Search the web and return titles, URLs, and snippets.\n\
         Use for current information that is not in the workspace; follow up\n\
         with fetch_url to read a full page."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "query": { "type": "string", "description": "Search query" },
                "count": { "type": "integer", "description": "Max results (default 5)" }
            },
            "required": ["query"],
            "additionalProperties": false
        })
    }

    fn category(&self) -> ToolCategory {
        ToolCategory::Web
    }

    fn is_available(&self) -> bool {
        self.api_key.is_some()
    }

    async fn execute(&self, call: &ToolCall) -> ToolOutput {
        let query = match call.str_arg(&["query", "q"]) {
            Some(q) => q,
            None => {
                return ToolOutput::err_kind(
                    &call.id,
                    ToolErrorKind::InvalidArgs,
                    "missing required parameter 'query'",
                )
            }
        };
        let Some(key) = &self.api_key else {
            return ToolOutput::err_kind(
                &call.id,
                ToolErrorKind::NetworkError,
                "web_search is not configured (no search API key)",
            );
        };
        let count = call.u64_arg(&["count"]).unwrap_or(5).min(20);

        debug!(query = %query, "web_search");

        let resp = self
            .client
            .get("https://api.search.brave.com/res/v1/web/search")
            .header("X-Subscription-Token", key)
            .query(&[("q", query.as_str()), ("count", &count.to_string())])
            .send()
            .await;

        let resp = match resp {
            Ok(r) => r,
            Err(e) => {
                return ToolOutput::err_kind(
                    &call.id,
                    ToolErrorKind::NetworkError,
                    format!("search request failed: {e}"),
                )
            }
        };
        if !resp.status().is_success() {
            return ToolOutput::err_kind(
                &call.id,
                ToolErrorKind::NetworkError,
                format!("search API returned {}", resp.status()),
            );
        }
        let body: Value = match resp.json().await {
            Ok(b) => b,
            Err(e) => {
                return ToolOutput::err_kind(
                    &call.id,
                    ToolErrorKind::NetworkError,
                    format!("bad search response: {e}"),
                )
            }
        };

        let mut lines = Vec::new();
        if let Some(results) = body["web"]["results"].as_array() {
            for r in results.iter().take(count as usize) {
                let title = r["title"].as_str().unwrap_or("(untitled)");
                let url = r["url"].as_str().unwrap_or("");
                let desc = r["description"].as_str().unwrap_or("");
                lines.push(format!("{title}\n  {url}\n  {desc}"));
            }
        }
        if lines.is_empty() {
            return ToolOutput::ok(&call.id, "(no results)");
        }
        ToolOutput::ok(&call.id, lines.join("\n\n"))
    }
}

/// Fetch a URL and convert HTML to readable text.
pub struct FetchUrlTool {
    pub max_chars: usize,
    pub client: reqwest::Client,
}

impl FetchUrlTool {
    pub fn new(max_chars: usize) -> Self {
        Self {
            max_chars: if max_chars == 0 {
                DEFAULT_FETCH_MAX_CHARS
            } else {
                max_chars
            },
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl Tool for FetchUrlTool {
    fn name(&self) -> &str {
        "fetch_url"
    }

    fn description(&self) -> &str {
        "Fetch an http(s) URL and return its content as readable text.\n\
         HTML is converted to plain text; output is capped (default 50,000\n\
         chars, configurable via max_chars).  Read-only; no authentication."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "url": { "type": "string", "description": "The URL to fetch" },
                "max_chars": { "type": "integer", "description": "Output cap (optional)" }
            },
            "required": ["url"],
            "additionalProperties": false
        })
    }

    fn category(&self) -> ToolCategory {
        ToolCategory::Web
    }

    async fn execute(&self, call: &ToolCall) -> ToolOutput {
        let url = match call.str_arg(&["url"]) {
            Some(u) => u,
            None => {
                return ToolOutput::err_kind(
                    &call.id,
                    ToolErrorKind::InvalidArgs,
                    "missing required parameter 'url'",
                )
            }
        };
        if !url.starts_with("http://") && !url.starts_with("https://") {
            return ToolOutput::err_kind(
                &call.id,
                ToolErrorKind::InvalidArgs,
                "url must start with http:// or https://",
            );
        }
        let max_chars = call
            .u64_arg(&["max_chars"])
            .map(|n| n as usize)
            .unwrap_or(self.max_chars);

        debug!(url = %url, "fetch_url");

        let resp = match self.client.get(&url).send().await {
            Ok(r) => r,
            Err(e) => {
                return ToolOutput::err_kind(
                    &call.id,
                    ToolErrorKind::NetworkError,
                    format!("fetch failed: {e}"),
                )
            }
        };
        if !resp.status().is_success() {
            return ToolOutput::err_kind(
                &call.id,
                ToolErrorKind::NetworkError,
                format!("{url} returned {}", resp.status()),
            );
        }
        let is_html = resp
            .headers()
            .get("content-type")
            .and_then(|v| v.to_str().ok())
            .map(|ct| ct.contains("text/html"))
            .unwrap_or(false);
        let body = match resp.text().await {
            Ok(b) => b,
            Err(e) => {
                return ToolOutput::err_kind(
                    &call.id,
                    ToolErrorKind::NetworkError,
                    format!("failed to read body: {e}"),
                )
            }
        };

        let mut text = if is_html || body.trim_start().starts_with('<') {
            html2text::from_read(body.as_bytes(), 100)
        } else {
            body
        };
        if text.len() > max_chars {
            let mut cut = max_chars;
            while !text.is_char_boundary(cut) {
                cut -= 1;
            }
            text.truncate(cut);
            text.push_str("\n...[truncated]");
        }
        ToolOutput::ok(&call.id, text)
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn web_search_unavailable_without_key() {
        let t = WebSearchTool::new(None);
        assert!(!t.is_available());
        let t = WebSearchTool::new(Some("key".into()));
        assert!(t.is_available());
    }

    #[tokio::test]
    async fn web_search_without_key_errors_cleanly() {
        let t = WebSearchTool::new(None);
        let out = t
            .execute(&ToolCall {
                id: "s".into(),
                name: "web_search".into(),
                args: json!({"query": "rust"}),
            })
            .await;
        assert!(out.is_error);
        assert!(out.content.contains("not configured"));
    }

    #[tokio::test]
    async fn fetch_rejects_non_http_schemes() {
        let t = FetchUrlTool::new(1000);
        let out = t
            .execute(&ToolCall {
                id: "f".into(),
                name: "fetch_url".into(),
                args: json!({"url": "file:///etc/passwd"}),
            })
            .await;
        assert!(out.is_error);
        assert_eq!(out.error_kind, Some(ToolErrorKind::InvalidArgs));
    }

    #[tokio::test]
    async fn fetch_requires_url() {
        let t = FetchUrlTool::new(1000);
        let out = t
            .execute(&ToolCall {
                id: "f".into(),
                name: "fetch_url".into(),
                args: json!({}),
            })
            .await;
        assert_eq!(out.error_kind, Some(ToolErrorKind::InvalidArgs));
    }
}
