//! MCP tool adapter
//!
//! Wraps one advertised MCP tool as a registry `Tool`, namespaced
//! `<server>__<tool>` so providers cannot shadow built-ins or each other.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::tools::{Tool, ToolInvocation, ToolKind, ToolResult};

use super::client::McpClient;
use super::protocol::McpToolDef;

pub struct McpTool {
    namespaced_name: String,
    description: String,
    def: McpToolDef,
    client: Arc<McpClient>,
}

impl McpTool {
    pub fn new(server: &str, def: McpToolDef, client: Arc<McpClient>) -> Self {
        Self {
            namespaced_name: format!("{}__{}", server, def.name),
            description: def
                .description
                .clone()
                .unwrap_or_else(|| format!("MCP tool '{}' from server '{}'", def.name, server)),
            def,
            client,
        }
    }
}

#[async_trait]
impl Tool for McpTool {
    fn name(&self) -> &str {
        &self.namespaced_name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn kind(&self) -> ToolKind {
        ToolKind::Mcp
    }

    fn schema(&self) -> Value {
        self.def.input_schema.clone()
    }

    async fn execute(&self, invocation: ToolInvocation) -> ToolResult {
        match self
            .client
            .call_tool(&self.def.name, invocation.arguments)
            .await
        {
            Ok(result) if result.is_error => ToolResult::error(result.flatten()),
            Ok(result) => ToolResult::success(result.flatten()),
            Err(e) => ToolResult::error(format!("MCP call failed: {}", e)),
        }
    }
}
