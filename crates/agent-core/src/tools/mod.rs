//! Tool contract and built-in tool implementations
//!
//! Every tool — built-in, discovered, MCP-sourced, or sub-agent — presents
//! the same surface: a name, a kind, a declarative parameter schema,
//! mutability, optional confirmation data, and an async execute.

pub mod builtin;
pub mod discovery;
pub mod registry;
pub mod schema;

use std::collections::HashMap;
use std::path::PathBuf;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub use registry::ToolRegistry;

/// Tool category; drives the default mutability policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolKind {
    Read,
    Write,
    Shell,
    Network,
    Memory,
    Mcp,
}

impl ToolKind {
    /// Default mutability: anything that can change state outside the
    /// conversation.
    pub fn mutating_by_default(&self) -> bool {
        matches!(
            self,
            ToolKind::Write | ToolKind::Shell | ToolKind::Network | ToolKind::Memory
        )
    }
}

/// A recorded file edit, renderable as a unified diff.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileDiff {
    pub path: PathBuf,
    pub old_content: String,
    pub new_content: String,
    pub is_new: bool,
    pub is_deletion: bool,
}

impl FileDiff {
    pub fn to_unified_diff(&self) -> String {
        let path = self.path.display().to_string();
        let header_old = if self.is_new { "/dev/null" } else { path.as_str() };
        let header_new = if self.is_deletion { "/dev/null" } else { path.as_str() };
        let diff = similar::TextDiff::from_lines(&self.old_content, &self.new_content);
        format!(
            "--- {}\n+++ {}\n{}",
            header_old,
            header_new,
            diff.unified_diff().context_radius(3)
        )
    }
}

/// The outcome of one tool execution. A success carries only output; a
/// failure must carry error text and may carry partial output.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ToolResult {
    pub success: bool,
    pub output: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, Value>,
    #[serde(default)]
    pub truncated: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub diff: Option<FileDiff>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
}

impl ToolResult {
    pub fn success(output: impl Into<String>) -> Self {
        Self {
            success: true,
            output: output.into(),
            ..Default::default()
        }
    }

    pub fn error(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
            ..Default::default()
        }
    }

    pub fn error_with_output(error: impl Into<String>, output: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
            output: output.into(),
            ..Default::default()
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    pub fn with_diff(mut self, diff: FileDiff) -> Self {
        self.diff = Some(diff);
        self
    }

    pub fn with_exit_code(mut self, code: i32) -> Self {
        self.exit_code = Some(code);
        self
    }

    /// What the model sees as the tool message content.
    pub fn to_model_output(&self) -> String {
        if self.success {
            self.output.clone()
        } else {
            format!(
                "Error: {}\n\nOutput:\n{}",
                self.error.as_deref().unwrap_or("unknown error"),
                self.output
            )
        }
    }
}

/// One invocation of a tool: the argument object plus the working directory.
#[derive(Debug, Clone)]
pub struct ToolInvocation {
    pub arguments: Value,
    pub working_dir: PathBuf,
}

impl ToolInvocation {
    pub fn new(arguments: Value, working_dir: PathBuf) -> Self {
        Self {
            arguments,
            working_dir,
        }
    }

    pub fn arg_str(&self, key: &str) -> Option<&str> {
        self.arguments.get(key).and_then(|v| v.as_str())
    }

    /// Resolve a path argument against the working directory.
    pub fn resolve_path(&self, path: &str) -> PathBuf {
        let p = PathBuf::from(path);
        if p.is_absolute() {
            p
        } else {
            self.working_dir.join(p)
        }
    }
}

/// Data shown to the user (or the approval engine) before a mutating
/// invocation proceeds.
#[derive(Debug, Clone)]
pub struct ToolConfirmation {
    pub tool_name: String,
    pub arguments: Value,
    pub description: String,
    pub diff: Option<FileDiff>,
    pub affected_paths: Vec<PathBuf>,
    pub command: Option<String>,
    pub dangerous: bool,
}

impl ToolConfirmation {
    pub fn new(tool_name: impl Into<String>, arguments: Value, description: impl Into<String>) -> Self {
        Self {
            tool_name: tool_name.into(),
            arguments,
            description: description.into(),
            diff: None,
            affected_paths: Vec::new(),
            command: None,
            dangerous: false,
        }
    }
}

/// The uniform tool contract.
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    fn kind(&self) -> ToolKind;

    /// JSON schema for the argument object.
    fn schema(&self) -> Value;

    /// Whether this invocation can change state. Defaults to the kind
    /// policy.
    fn is_mutating(&self, _args: &Value) -> bool {
        self.kind().mutating_by_default()
    }

    /// Validate arguments against the schema; empty means valid.
    fn validate(&self, args: &Value) -> Vec<String> {
        schema::validate(&self.schema(), args)
    }

    /// Confirmation data for mutating invocations; non-mutating invocations
    /// return `None`.
    fn confirmation(&self, invocation: &ToolInvocation) -> Option<ToolConfirmation> {
        if !self.is_mutating(&invocation.arguments) {
            return None;
        }
        Some(ToolConfirmation::new(
            self.name(),
            invocation.arguments.clone(),
            format!("Run tool '{}'", self.name()),
        ))
    }

    async fn execute(&self, invocation: ToolInvocation) -> ToolResult;
}
