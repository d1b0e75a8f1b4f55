//! Glob tool - find files by pattern

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

use super::parse_args;
use crate::tools::{Tool, ToolInvocation, ToolKind, ToolResult};

const MAX_RESULTS: usize = 500;

pub struct GlobTool;

#[derive(Deserialize)]
struct Params {
    pattern: String,
    #[serde(default)]
    path: Option<String>,
}

#[async_trait]
impl Tool for GlobTool {
    fn name(&self) -> &str {
        "glob"
    }

    fn description(&self) -> &str {
        "Find files matching a glob pattern like **/*.rs, sorted by path."
    }

    fn kind(&self) -> ToolKind {
        ToolKind::Read
    }

    fn schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "pattern": {
                    "type": "string",
                    "description": "Glob pattern, e.g. **/*.rs or src/*.toml"
                },
                "path": {
                    "type": "string",
                    "description": "Directory to search from (default: working directory)"
                }
            },
            "required": ["pattern"],
            "additionalProperties": false
        })
    }

    async fn execute(&self, invocation: ToolInvocation) -> ToolResult {
        let params = match parse_args::<Params>(&invocation.arguments) {
            Ok(p) => p,
            Err(e) => return e,
        };

        let root = invocation.resolve_path(params.path.as_deref().unwrap_or("."));
        let full_pattern = format!("{}/{}", root.display(), params.pattern);

        let entries = match glob::glob(&full_pattern) {
            Ok(entries) => entries,
            Err(e) => return ToolResult::error(format!("Invalid glob pattern: {}", e)),
        };

        let mut paths: Vec<String> = Vec::new();
        let mut hit_cap = false;
        for entry in entries.flatten() {
            if !entry.is_file() {
                continue;
            }
            paths.push(
                entry
                    .strip_prefix(&root)
                    .unwrap_or(&entry)
                    .display()
                    .to_string(),
            );
            if paths.len() >= MAX_RESULTS {
                hit_cap = true;
                break;
            }
        }
        paths.sort();

        if paths.is_empty() {
            return ToolResult::success("No files matched");
        }
        let mut result = ToolResult::success(paths.join("\n"))
            .with_metadata("file_count", json!(paths.len()));
        result.truncated = hit_cap;
        result
    }
}
