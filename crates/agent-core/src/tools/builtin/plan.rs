//! Plan tool - session-scoped working plan

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Mutex;

use super::parse_args;
use crate::tools::{Tool, ToolInvocation, ToolKind, ToolResult};

/// Holds the current plan text for the session. Ephemeral.
pub struct PlanTool {
    plan: Mutex<Option<String>>,
}

#[derive(Deserialize)]
struct Params {
    action: String,
    #[serde(default)]
    plan: Option<String>,
}

impl PlanTool {
    pub fn new() -> Self {
        Self {
            plan: Mutex::new(None),
        }
    }
}

impl Default for PlanTool {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Tool for PlanTool {
    fn name(&self) -> &str {
        "plan"
    }

    fn description(&self) -> &str {
        "Record or review the working plan for this session. Actions: set (with plan), get, clear."
    }

    fn kind(&self) -> ToolKind {
        ToolKind::Memory
    }

    fn schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "action": {
                    "type": "string",
                    "description": "One of: set, get, clear"
                },
                "plan": {
                    "type": "string",
                    "description": "Plan text (for set)"
                }
            },
            "required": ["action"],
            "additionalProperties": false
        })
    }

    async fn execute(&self, invocation: ToolInvocation) -> ToolResult {
        let params = match parse_args::<Params>(&invocation.arguments) {
            Ok(p) => p,
            Err(e) => return e,
        };
        let mut plan = self.plan.lock().expect("plan lock");

        match params.action.as_str() {
            "set" => {
                let Some(text) = params.plan.filter(|p| !p.is_empty()) else {
                    return ToolResult::error("set requires a non-empty plan");
                };
                *plan = Some(text);
                ToolResult::success("Plan updated")
            }
            "get" => match plan.as_deref() {
                Some(text) => ToolResult::success(text),
                None => ToolResult::success("No plan set"),
            },
            "clear" => {
                *plan = None;
                ToolResult::success("Plan cleared")
            }
            other => ToolResult::error(format!("Unknown action: {}", other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn invoke(args: Value) -> ToolInvocation {
        ToolInvocation::new(args, PathBuf::from("/tmp"))
    }

    #[tokio::test]
    async fn set_get_clear_flow() {
        let tool = PlanTool::new();

        let result = tool
            .execute(invoke(json!({"action": "set", "plan": "1. read\n2. fix"})))
            .await;
        assert!(result.success);

        let result = tool.execute(invoke(json!({"action": "get"}))).await;
        assert_eq!(result.output, "1. read\n2. fix");

        tool.execute(invoke(json!({"action": "clear"}))).await;
        let result = tool.execute(invoke(json!({"action": "get"}))).await;
        assert_eq!(result.output, "No plan set");
    }
}
