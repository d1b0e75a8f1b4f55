//! Web search tool - placeholder
//!
//! No search backend is wired up; the tool exists so the model gets a clear
//! error instead of hallucinating one.

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::tools::{Tool, ToolInvocation, ToolKind, ToolResult};

pub struct WebSearchTool;

#[async_trait]
impl Tool for WebSearchTool {
    fn name(&self) -> &str {
        "web_search"
    }

    fn description(&self) -> &str {
        "Search the web. Currently unavailable; use web_fetch with a known URL instead."
    }

    fn kind(&self) -> ToolKind {
        ToolKind::Network
    }

    fn schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "query": {
                    "type": "string",
                    "description": "Search query"
                }
            },
            "required": ["query"],
            "additionalProperties": false
        })
    }

    async fn execute(&self, _invocation: ToolInvocation) -> ToolResult {
        ToolResult::error(
            "Web search is not configured. Use web_fetch with a specific URL instead.",
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[tokio::test]
    async fn always_errors() {
        let invocation = ToolInvocation::new(json!({"query": "rust"}), PathBuf::from("/tmp"));
        let result = WebSearchTool.execute(invocation).await;
        assert!(!result.success);
    }
}
