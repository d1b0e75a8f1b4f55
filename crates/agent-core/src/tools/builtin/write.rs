//! Write tool - create or overwrite files

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::fs;

use super::parse_args;
use crate::tools::{FileDiff, Tool, ToolConfirmation, ToolInvocation, ToolKind, ToolResult};

pub struct WriteFileTool;

#[derive(Deserialize)]
struct Params {
    path: String,
    content: String,
}

#[async_trait]
impl Tool for WriteFileTool {
    fn name(&self) -> &str {
        "write_file"
    }

    fn description(&self) -> &str {
        "Create or overwrite a file. Creates parent directories if needed."
    }

    fn kind(&self) -> ToolKind {
        ToolKind::Write
    }

    fn schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "Path to the file, absolute or relative to the working directory"
                },
                "content": {
                    "type": "string",
                    "description": "The full file content to write"
                }
            },
            "required": ["path", "content"],
            "additionalProperties": false
        })
    }

    fn confirmation(&self, invocation: &ToolInvocation) -> Option<ToolConfirmation> {
        let path_arg = invocation.arg_str("path")?;
        let path = invocation.resolve_path(path_arg);
        let new_content = invocation.arg_str("content").unwrap_or_default().to_string();
        let old_content = std::fs::read_to_string(&path).unwrap_or_default();
        let is_new = !path.exists();

        let mut confirmation = ToolConfirmation::new(
            self.name(),
            invocation.arguments.clone(),
            format!(
                "{} {}",
                if is_new { "Create" } else { "Overwrite" },
                path.display()
            ),
        );
        confirmation.diff = Some(FileDiff {
            path: path.clone(),
            old_content,
            new_content,
            is_new,
            is_deletion: false,
        });
        confirmation.affected_paths = vec![path];
        Some(confirmation)
    }

    async fn execute(&self, invocation: ToolInvocation) -> ToolResult {
        let params = match parse_args::<Params>(&invocation.arguments) {
            Ok(p) => p,
            Err(e) => return e,
        };
        let path = invocation.resolve_path(&params.path);

        let old_content = fs::read_to_string(&path).await.unwrap_or_default();
        let is_new = !path.exists();

        if let Some(parent) = path.parent().filter(|p| !p.exists()) {
            if let Err(e) = fs::create_dir_all(parent).await {
                return ToolResult::error(format!("Failed to create directory: {}", e));
            }
        }

        match fs::write(&path, &params.content).await {
            Ok(()) => ToolResult::success(format!(
                "Wrote {} lines ({} bytes) to {}",
                params.content.lines().count(),
                params.content.len(),
                path.display()
            ))
            .with_diff(FileDiff {
                path,
                old_content,
                new_content: params.content,
                is_new,
                is_deletion: false,
            }),
            Err(e) => ToolResult::error(format!("Failed to write file: {}", e)),
        }
    }
}
