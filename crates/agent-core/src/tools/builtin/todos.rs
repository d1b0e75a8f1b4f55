//! Todos tool - session-scoped task list

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Mutex;

use super::parse_args;
use crate::tools::{Tool, ToolInvocation, ToolKind, ToolResult};

#[derive(Debug, Clone)]
struct TodoItem {
    text: String,
    done: bool,
}

/// Ephemeral to the session; a fresh session starts with an empty list.
pub struct TodosTool {
    items: Mutex<Vec<TodoItem>>,
}

#[derive(Deserialize)]
struct Params {
    action: String,
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    index: Option<usize>,
}

impl TodosTool {
    pub fn new() -> Self {
        Self {
            items: Mutex::new(Vec::new()),
        }
    }

    fn render(items: &[TodoItem]) -> String {
        if items.is_empty() {
            return "No todos".to_string();
        }
        items
            .iter()
            .enumerate()
            .map(|(i, item)| {
                format!("{}. [{}] {}", i + 1, if item.done { "x" } else { " " }, item.text)
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

impl Default for TodosTool {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Tool for TodosTool {
    fn name(&self) -> &str {
        "todos"
    }

    fn description(&self) -> &str {
        "Track a session task list. Actions: add (with text), complete (with 1-based index), list."
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
                    "description": "One of: add, complete, list"
                },
                "text": {
                    "type": "string",
                    "description": "Todo text (for add)"
                },
                "index": {
                    "type": "integer",
                    "description": "1-based todo index (for complete)"
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
        let mut items = self.items.lock().expect("todos lock");

        match params.action.as_str() {
            "add" => {
                let Some(text) = params.text.filter(|t| !t.is_empty()) else {
                    return ToolResult::error("add requires non-empty text");
                };
                items.push(TodoItem { text, done: false });
                ToolResult::success(Self::render(&items))
            }
            "complete" => {
                let Some(index) = params.index.and_then(|i| i.checked_sub(1)) else {
                    return ToolResult::error("complete requires a 1-based index");
                };
                match items.get_mut(index) {
                    Some(item) => {
                        item.done = true;
                        ToolResult::success(Self::render(&items))
                    }
                    None => ToolResult::error(format!("No todo at index {}", index + 1)),
                }
            }
            "list" => ToolResult::success(Self::render(&items)),
            other => ToolResult::error(format!("Unknown action: {}", other)),
        }
    }
}
