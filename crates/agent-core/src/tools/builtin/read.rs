//! Read tool - file contents with optional line windows

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::fs;

use super::parse_args;
use crate::tools::{Tool, ToolInvocation, ToolKind, ToolResult};

/// Maximum file size to read into memory (10 MB).
const MAX_FILE_SIZE: u64 = 10 * 1024 * 1024;
const DEFAULT_LINE_LIMIT: usize = 2000;

pub struct ReadFileTool;

#[derive(Deserialize)]
struct Params {
    path: String,
    #[serde(default)]
    offset: Option<usize>,
    #[serde(default)]
    limit: Option<usize>,
}

#[async_trait]
impl Tool for ReadFileTool {
    fn name(&self) -> &str {
        "read_file"
    }

    fn description(&self) -> &str {
        "Read file contents. Supports a 1-indexed line offset and limit for large files; detects binary files."
    }

    fn kind(&self) -> ToolKind {
        ToolKind::Read
    }

    fn schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "Path to the file, absolute or relative to the working directory"
                },
                "offset": {
                    "type": "integer",
                    "description": "Line number to start reading from (1-indexed)"
                },
                "limit": {
                    "type": "integer",
                    "description": "Number of lines to read"
                }
            },
            "required": ["path"],
            "additionalProperties": false
        })
    }

    async fn execute(&self, invocation: ToolInvocation) -> ToolResult {
        let params = match parse_args::<Params>(&invocation.arguments) {
            Ok(p) => p,
            Err(e) => return e,
        };
        let path = invocation.resolve_path(&params.path);

        if !path.is_file() {
            return ToolResult::error(format!("File not found: {}", path.display()));
        }

        let metadata = match fs::metadata(&path).await {
            Ok(m) => m,
            Err(e) => return ToolResult::error(format!("Failed to read metadata: {}", e)),
        };
        if metadata.len() > MAX_FILE_SIZE {
            return ToolResult::error(format!(
                "File too large: {} bytes (max {} MB). Use offset/limit to read portions.",
                metadata.len(),
                MAX_FILE_SIZE / (1024 * 1024)
            ));
        }

        let bytes = match fs::read(&path).await {
            Ok(b) => b,
            Err(e) => return ToolResult::error(format!("Failed to read file: {}", e)),
        };

        let check_len = bytes.len().min(8192);
        if bytes[..check_len].contains(&0) {
            return ToolResult::success(format!(
                "Binary file: {} ({} bytes)",
                path.display(),
                bytes.len()
            ));
        }

        let content = String::from_utf8_lossy(&bytes);
        let lines: Vec<&str> = content.lines().collect();
        let total = lines.len();

        let start = params.offset.unwrap_or(1).saturating_sub(1);
        if start >= total && total > 0 {
            return ToolResult::error(format!(
                "Start line {} is beyond file length ({})",
                start + 1,
                total
            ));
        }
        let limit = params.limit.unwrap_or(DEFAULT_LINE_LIMIT);
        let end = (start + limit).min(total);
        let truncated = end < total || start > 0;

        let mut result = ToolResult::success(lines[start..end].join("\n"))
            .with_metadata("total_lines", json!(total))
            .with_metadata("start_line", json!(start + 1));
        result.truncated = truncated;
        result
    }
}
