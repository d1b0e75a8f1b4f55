//! Built-in tools
//!
//! Compact implementations of the standard tool set, all honoring the
//! `Tool` contract. Session-scoped state (todos, plan) lives inside the
//! tool instance; the memory tool writes through the persistent store.

pub mod glob_tool;
pub mod grep;
pub mod memory_tool;
pub mod plan;
pub mod read;
pub mod shell;
pub mod todos;
pub mod web_fetch;
pub mod web_search;
pub mod write;

use std::sync::Arc;

use serde_json::Value;

use crate::config::ShellEnvironmentConfig;
use crate::memory::UserMemoryStore;
use crate::tools::{ToolRegistry, ToolResult};

/// Parse an argument object into a typed params struct, mapping failures to
/// the standard invalid-parameters error result.
pub(crate) fn parse_args<T: serde::de::DeserializeOwned>(args: &Value) -> Result<T, ToolResult> {
    serde_json::from_value(args.clone())
        .map_err(|e| ToolResult::error(format!("Invalid parameters: {}", e)))
}

/// Register the full built-in tool set.
pub async fn register_builtin_tools(
    registry: &ToolRegistry,
    shell_env: ShellEnvironmentConfig,
    memory: Arc<std::sync::Mutex<UserMemoryStore>>,
) {
    registry.register(Arc::new(read::ReadFileTool)).await;
    registry.register(Arc::new(write::WriteFileTool)).await;
    registry.register(Arc::new(grep::GrepTool)).await;
    registry.register(Arc::new(glob_tool::GlobTool)).await;
    registry
        .register(Arc::new(shell::ShellTool::new(shell_env)))
        .await;
    registry.register(Arc::new(web_fetch::WebFetchTool::new())).await;
    registry.register(Arc::new(web_search::WebSearchTool)).await;
    registry.register(Arc::new(todos::TodosTool::new())).await;
    registry
        .register(Arc::new(memory_tool::MemoryTool::new(memory)))
        .await;
    registry.register(Arc::new(plan::PlanTool::new())).await;
}
