//! Memory tool - persistent user preferences

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::{Arc, Mutex};

use super::parse_args;
use crate::memory::UserMemoryStore;
use crate::tools::{Tool, ToolInvocation, ToolKind, ToolResult};

/// Writes through the process-wide store; survives across sessions and is
/// injected into the next session's system prompt.
pub struct MemoryTool {
    store: Arc<Mutex<UserMemoryStore>>,
}

#[derive(Deserialize)]
struct Params {
    action: String,
    #[serde(default)]
    key: Option<String>,
    #[serde(default)]
    value: Option<String>,
}

impl MemoryTool {
    pub fn new(store: Arc<Mutex<UserMemoryStore>>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Tool for MemoryTool {
    fn name(&self) -> &str {
        "memory"
    }

    fn description(&self) -> &str {
        "Remember facts about the user across sessions. Actions: set (key + value), get (key), delete (key), list."
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
                    "description": "One of: set, get, delete, list"
                },
                "key": {
                    "type": "string",
                    "description": "Memory key"
                },
                "value": {
                    "type": "string",
                    "description": "Memory value (for set)"
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
        let mut store = self.store.lock().expect("memory lock");

        match params.action.as_str() {
            "set" => {
                let (Some(key), Some(value)) = (params.key, params.value) else {
                    return ToolResult::error("set requires key and value");
                };
                match store.set(key.clone(), value) {
                    Ok(()) => ToolResult::success(format!("Remembered '{}'", key)),
                    Err(e) => ToolResult::error(format!("Failed to save memory: {}", e)),
                }
            }
            "get" => {
                let Some(key) = params.key else {
                    return ToolResult::error("get requires a key");
                };
                match store.get(&key) {
                    Some(value) => ToolResult::success(value),
                    None => ToolResult::error(format!("No memory for '{}'", key)),
                }
            }
            "delete" => {
                let Some(key) = params.key else {
                    return ToolResult::error("delete requires a key");
                };
                match store.remove(&key) {
                    Ok(true) => ToolResult::success(format!("Forgot '{}'", key)),
                    Ok(false) => ToolResult::error(format!("No memory for '{}'", key)),
                    Err(e) => ToolResult::error(format!("Failed to save memory: {}", e)),
                }
            }
            "list" => {
                let entries = store.entries();
                if entries.is_empty() {
                    ToolResult::success("No memories stored")
                } else {
                    ToolResult::success(
                        entries
                            .iter()
                            .map(|(k, v)| format!("{}: {}", k, v))
                            .collect::<Vec<_>>()
                            .join("\n"),
                    )
                }
            }
            other => ToolResult::error(format!("Unknown action: {}", other)),
        }
    }
}
