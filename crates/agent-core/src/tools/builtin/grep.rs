//! Grep tool - regex search across files

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

use super::parse_args;
use crate::tools::{Tool, ToolInvocation, ToolKind, ToolResult};

const MAX_MATCHES: usize = 200;
const MAX_FILE_SIZE: u64 = 2 * 1024 * 1024;

pub struct GrepTool;

#[derive(Deserialize)]
struct Params {
    pattern: String,
    #[serde(default)]
    path: Option<String>,
    #[serde(default)]
    glob: Option<String>,
}

#[async_trait]
impl Tool for GrepTool {
    fn name(&self) -> &str {
        "grep"
    }

    fn description(&self) -> &str {
        "Search file contents with a regular expression. Returns matching lines as path:line:text."
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
                    "description": "Regular expression to search for"
                },
                "path": {
                    "type": "string",
                    "description": "Directory to search, relative to the working directory (default: working directory)"
                },
                "glob": {
                    "type": "string",
                    "description": "Filename glob filter, e.g. **/*.rs (default: all files)"
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

        let regex = match regex::Regex::new(&params.pattern) {
            Ok(r) => r,
            Err(e) => return ToolResult::error(format!("Invalid pattern: {}", e)),
        };

        let root = invocation.resolve_path(params.path.as_deref().unwrap_or("."));
        if !root.is_dir() {
            return ToolResult::error(format!("Not a directory: {}", root.display()));
        }

        let file_glob = params.glob.as_deref().unwrap_or("**/*");
        let full_pattern = format!("{}/{}", root.display(), file_glob);
        let entries = match glob::glob(&full_pattern) {
            Ok(entries) => entries,
            Err(e) => return ToolResult::error(format!("Invalid glob: {}", e)),
        };

        let mut matches = Vec::new();
        let mut hit_cap = false;

        'files: for entry in entries.flatten() {
            if !entry.is_file() {
                continue;
            }
            if let Ok(metadata) = entry.metadata() {
                if metadata.len() > MAX_FILE_SIZE {
                    continue;
                }
            }
            let Ok(content) = std::fs::read_to_string(&entry) else {
                continue; // binary or unreadable
            };
            let display = entry
                .strip_prefix(&root)
                .unwrap_or(&entry)
                .display()
                .to_string();
            for (line_no, line) in content.lines().enumerate() {
                if regex.is_match(line) {
                    matches.push(format!("{}:{}:{}", display, line_no + 1, line.trim_end()));
                    if matches.len() >= MAX_MATCHES {
                        hit_cap = true;
                        break 'files;
                    }
                }
            }
        }

        if matches.is_empty() {
            return ToolResult::success("No matches found");
        }
        let mut result = ToolResult::success(matches.join("\n"))
            .with_metadata("match_count", json!(matches.len()));
        result.truncated = hit_cap;
        result
    }
}
