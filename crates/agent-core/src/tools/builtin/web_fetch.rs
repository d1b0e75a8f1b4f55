//! Web fetch tool - HTTP GET with timeout and size cap

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use url::Url;

use super::parse_args;
use crate::tools::{Tool, ToolInvocation, ToolKind, ToolResult};

const DEFAULT_TIMEOUT_SECS: u64 = 30;
const MAX_TIMEOUT_SECS: u64 = 120;
const MAX_BODY_BYTES: usize = 200_000;

pub struct WebFetchTool {
    http: reqwest::Client,
}

#[derive(Deserialize)]
struct Params {
    url: String,
    #[serde(default)]
    timeout: Option<u64>,
}

impl WebFetchTool {
    pub fn new() -> Self {
        Self {
            http: reqwest::Client::new(),
        }
    }
}

impl Default for WebFetchTool {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Tool for WebFetchTool {
    fn name(&self) -> &str {
        "web_fetch"
    }

    fn description(&self) -> &str {
        "Fetch a URL over HTTP(S) and return the response body as text, truncated to a size cap."
    }

    fn kind(&self) -> ToolKind {
        ToolKind::Network
    }

    fn schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "url": {
                    "type": "string",
                    "description": "The http(s) URL to fetch"
                },
                "timeout": {
                    "type": "integer",
                    "description": "Timeout in seconds (default 30, max 120)"
                }
            },
            "required": ["url"],
            "additionalProperties": false
        })
    }

    async fn execute(&self, invocation: ToolInvocation) -> ToolResult {
        let params = match parse_args::<Params>(&invocation.arguments) {
            Ok(p) => p,
            Err(e) => return e,
        };

        let url = match Url::parse(&params.url) {
            Ok(url) if matches!(url.scheme(), "http" | "https") => url,
            Ok(url) => {
                return ToolResult::error(format!("Unsupported URL scheme: {}", url.scheme()))
            }
            Err(e) => return ToolResult::error(format!("Invalid URL: {}", e)),
        };

        let timeout_secs = params
            .timeout
            .unwrap_or(DEFAULT_TIMEOUT_SECS)
            .min(MAX_TIMEOUT_SECS);

        let response = match self
            .http
            .get(url.clone())
            .timeout(Duration::from_secs(timeout_secs))
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) if e.is_timeout() => {
                return ToolResult::error(format!(
                    "Request timed out after {} seconds",
                    timeout_secs
                ))
            }
            Err(e) => return ToolResult::error(format!("Request failed: {}", e)),
        };

        let status = response.status();
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("unknown")
            .to_string();

        let body = match response.text().await {
            Ok(body) => body,
            Err(e) => return ToolResult::error(format!("Failed to read body: {}", e)),
        };

        let (body, truncated) = if body.len() > MAX_BODY_BYTES {
            let mut end = MAX_BODY_BYTES;
            while end > 0 && !body.is_char_boundary(end) {
                end -= 1;
            }
            (format!("{}\n[... body truncated ...]", &body[..end]), true)
        } else {
            (body, false)
        };

        let mut result = if status.is_success() {
            ToolResult::success(body)
        } else {
            ToolResult::error_with_output(format!("HTTP {}", status), body)
        };
        result.truncated = truncated;
        result
            .with_metadata("status", json!(status.as_u16()))
            .with_metadata("content_type", json!(content_type))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn invoke(url: &str) -> ToolInvocation {
        ToolInvocation::new(json!({"url": url}), PathBuf::from("/tmp"))
    }

    #[tokio::test]
    async fn rejects_non_http_schemes() {
        let result = WebFetchTool::new()
            .execute(invoke("file:///etc/passwd"))
            .await;
        assert!(!result.success);
        assert!(result.error.unwrap().contains("Unsupported URL scheme"));
    }

    #[tokio::test]
    async fn rejects_malformed_urls() {
        let result = WebFetchTool::new().execute(invoke("not a url")).await;
        assert!(!result.success);
        assert!(result.error.unwrap().contains("Invalid URL"));
    }

    #[test]
    fn network_kind_is_mutating() {
        assert!(WebFetchTool::new().is_mutating(&json!({})));
    }
}
