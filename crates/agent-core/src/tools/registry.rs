//! Tool registry and invocation pipeline
//!
//! Stores built-in, discovered, and MCP-sourced tools behind one lookup and
//! runs every invocation through the same pipeline: lookup, validation,
//! before-hook, approval gating, execution, after-hook.
//!
//! Pipeline guarantee: `before_tool` fires iff lookup and validation
//! succeeded; `after_tool` fires for every call, success or failure.

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::RwLock;

use crate::ai::types::AiTool;
use crate::approval::{ApprovalContext, ApprovalDecision, ApprovalManager};
use crate::hooks::HookSystem;

use super::{Tool, ToolInvocation, ToolResult};

/// Registry for all invokable tools.
#[derive(Default)]
pub struct ToolRegistry {
    /// Built-in and discovered tools.
    tools: RwLock<HashMap<String, Arc<dyn Tool>>>,
    /// MCP-sourced tools, keyed by their namespaced `<server>__<tool>` name.
    mcp_tools: RwLock<HashMap<String, Arc<dyn Tool>>>,
    /// Names registered by discovery, tracked separately for hot-reload.
    discovered: RwLock<HashSet<String>>,
    /// Optional allow-list from configuration; filters what the model sees.
    allowed_tools: RwLock<Option<Vec<String>>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn set_allowed_tools(&self, allowed: Option<Vec<String>>) {
        *self.allowed_tools.write().await = allowed;
    }

    /// Register a built-in tool.
    pub async fn register(&self, tool: Arc<dyn Tool>) {
        let name = tool.name().to_string();
        self.tools.write().await.insert(name, tool);
    }

    /// Register a tool found by discovery; tracked so `reload` can drop it.
    pub async fn register_discovered(&self, tool: Arc<dyn Tool>) {
        let name = tool.name().to_string();
        self.discovered.write().await.insert(name.clone());
        self.tools.write().await.insert(name, tool);
    }

    /// Drop every discovered tool (before re-running discovery).
    pub async fn clear_discovered(&self) {
        let names: Vec<String> = self.discovered.write().await.drain().collect();
        let mut tools = self.tools.write().await;
        for name in names {
            tools.remove(&name);
            tracing::debug!(tool = %name, "Unregistered discovered tool");
        }
    }

    /// Register an MCP-sourced tool under its namespaced name.
    pub async fn register_mcp(&self, tool: Arc<dyn Tool>) {
        let name = tool.name().to_string();
        self.mcp_tools.write().await.insert(name, tool);
    }

    /// Drop all tools advertised by one MCP server.
    pub async fn unregister_mcp_server(&self, server: &str) {
        let prefix = format!("{}__", server);
        let mut tools = self.mcp_tools.write().await;
        tools.retain(|name, _| !name.starts_with(&prefix));
    }

    /// Look up a tool: built-in and discovered first, then MCP.
    pub async fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        if let Some(tool) = self.tools.read().await.get(name) {
            return Some(tool.clone());
        }
        self.mcp_tools.read().await.get(name).cloned()
    }

    /// All registered tools, honoring the configured allow-list.
    pub async fn get_tools(&self) -> Vec<Arc<dyn Tool>> {
        let allowed = self.allowed_tools.read().await.clone();
        let mut result: Vec<Arc<dyn Tool>> = Vec::new();
        for tool in self.tools.read().await.values() {
            result.push(tool.clone());
        }
        for tool in self.mcp_tools.read().await.values() {
            result.push(tool.clone());
        }
        if let Some(allowed) = allowed {
            result.retain(|t| allowed.iter().any(|name| name == t.name()));
        }
        result.sort_by(|a, b| a.name().cmp(b.name()));
        result
    }

    /// Tool definitions for the model.
    pub async fn schemas(&self) -> Vec<AiTool> {
        self.get_tools()
            .await
            .iter()
            .map(|t| AiTool {
                name: t.name().to_string(),
                description: t.description().to_string(),
                input_schema: t.schema(),
            })
            .collect()
    }

    /// Invoke a tool through the full pipeline.
    pub async fn invoke(
        &self,
        name: &str,
        args: Value,
        cwd: &Path,
        hooks: &HookSystem,
        approval: Option<&ApprovalManager>,
    ) -> ToolResult {
        // 1. Lookup.
        let Some(tool) = self.get(name).await else {
            let result = ToolResult::error(format!("Unknown tool: {}", name));
            hooks.after_tool(name, &args, &result.to_model_output()).await;
            return result;
        };

        // 2. Schema validation.
        let validation_errors = tool.validate(&args);
        if !validation_errors.is_empty() {
            let result = ToolResult::error(format!(
                "Invalid parameters: {}",
                validation_errors.join("; ")
            ));
            hooks.after_tool(name, &args, &result.to_model_output()).await;
            return result;
        }

        // 3. Before-hook: only after lookup and validation succeed.
        hooks.before_tool(name, &args).await;

        // 4. Confirmation data.
        let invocation = ToolInvocation::new(args.clone(), cwd.to_path_buf());
        let confirmation = tool.confirmation(&invocation);

        // 5. Approval gating.
        if let (Some(confirmation), Some(approval)) = (confirmation, approval) {
            let ctx = ApprovalContext {
                tool_name: name.to_string(),
                arguments: args.clone(),
                is_mutating: tool.is_mutating(&args),
                affected_paths: confirmation.affected_paths.clone(),
                command: confirmation.command.clone(),
                is_dangerous: confirmation.dangerous,
                working_dir: cwd.to_path_buf(),
            };

            match approval.check_approval(&ctx) {
                ApprovalDecision::Approved => {}
                ApprovalDecision::Rejected => {
                    let result = ToolResult::error("Operation rejected by safety policy");
                    hooks.after_tool(name, &args, &result.to_model_output()).await;
                    return result;
                }
                ApprovalDecision::NeedsConfirmation => {
                    // No registered callback means headless automation:
                    // proceed. A registered callback saying no rejects.
                    match approval.request_user_confirmation(confirmation).await {
                        None | Some(true) => {}
                        Some(false) => {
                            let result = ToolResult::error("User rejected the operation");
                            hooks
                                .after_tool(name, &args, &result.to_model_output())
                                .await;
                            return result;
                        }
                    }
                }
            }
        }

        // 6. Execute, isolating panics from the turn loop.
        let result = match tokio::spawn(async move { tool.execute(invocation).await }).await {
            Ok(result) => result,
            Err(e) => ToolResult::error(format!("Internal error: {}", e)),
        };

        // 7. After-hook, always.
        hooks.after_tool(name, &args, &result.to_model_output()).await;
        result
    }
}
