//! Tool discovery
//!
//! Loads user-supplied tools from well-known plug-in directories. Each tool
//! is described by a TOML descriptor pointing at an out-of-process command;
//! the command receives the argument object as JSON on stdin and prints its
//! output on stdout. Descriptor files starting with `__` are skipped.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use super::{Tool, ToolInvocation, ToolKind, ToolRegistry, ToolResult};

const DESCRIPTOR_SUFFIX: &str = "toml";
const DEFAULT_PLUGIN_TIMEOUT_SECS: u64 = 120;

/// Where a discovery failure happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscoveryErrorKind {
    /// Reading the directory or descriptor file failed.
    Load,
    /// The descriptor was not valid TOML.
    Parse,
    /// The descriptor parsed but could not be turned into a tool.
    Instantiate,
}

/// One failed descriptor, kept for `/tools` style reporting.
#[derive(Debug, Clone)]
pub struct DiscoveryError {
    pub kind: DiscoveryErrorKind,
    pub file: PathBuf,
    pub message: String,
}

/// Raw descriptor file contents.
#[derive(Debug, Deserialize)]
struct ToolDescriptor {
    name: String,
    description: String,
    #[serde(default)]
    kind: Option<ToolKind>,
    command: String,
    #[serde(default)]
    args: Vec<String>,
    /// JSON schema for the argument object; defaults to an open object.
    #[serde(default)]
    schema: Option<Value>,
    #[serde(default)]
    timeout_seconds: Option<u64>,
}

/// A tool backed by an external command from a descriptor.
struct DescriptorTool {
    name: String,
    description: String,
    kind: ToolKind,
    command: String,
    args: Vec<String>,
    schema: Value,
    timeout: Duration,
}

#[async_trait]
impl Tool for DescriptorTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn kind(&self) -> ToolKind {
        self.kind
    }

    fn schema(&self) -> Value {
        self.schema.clone()
    }

    async fn execute(&self, invocation: ToolInvocation) -> ToolResult {
        let mut cmd = Command::new(&self.command);
        cmd.args(&self.args)
            .current_dir(&invocation.working_dir)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => {
                return ToolResult::error(format!(
                    "Failed to spawn plug-in command '{}': {}",
                    self.command, e
                ))
            }
        };

        if let Some(mut stdin) = child.stdin.take() {
            let payload = invocation.arguments.to_string();
            if let Err(e) = stdin.write_all(payload.as_bytes()).await {
                tracing::warn!(tool = %self.name, "Failed to write plug-in stdin: {}", e);
            }
        }

        let output = match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => return ToolResult::error(format!("Plug-in failed: {}", e)),
            Err(_) => {
                return ToolResult::error(format!(
                    "Plug-in timed out after {} seconds",
                    self.timeout.as_secs()
                ))
            }
        };

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        let exit_code = output.status.code().unwrap_or(-1);
        if output.status.success() {
            ToolResult::success(stdout).with_exit_code(exit_code)
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
            ToolResult::error_with_output(
                format!("Plug-in exited with code {}: {}", exit_code, stderr.trim()),
                stdout,
            )
            .with_exit_code(exit_code)
        }
    }
}

/// Scans plug-in directories and registers the tools they describe.
pub struct DiscoveryManager {
    dirs: Vec<PathBuf>,
    errors: Vec<DiscoveryError>,
    debug: bool,
}

impl DiscoveryManager {
    pub fn new(dirs: Vec<PathBuf>, debug: bool) -> Self {
        Self {
            dirs,
            errors: Vec::new(),
            debug,
        }
    }

    /// For a working directory, the standard project + system plug-in dirs.
    pub fn for_working_dir(cwd: &Path, debug: bool) -> Self {
        Self::new(crate::paths::tool_plugin_dirs(cwd), debug)
    }

    pub fn errors(&self) -> &[DiscoveryError] {
        &self.errors
    }

    /// Scan every directory and register what loads. Prior errors are
    /// cleared; individual failures are recorded and never abort the scan.
    pub async fn discover_all(&mut self, registry: &ToolRegistry) -> usize {
        self.errors.clear();
        let mut registered = 0usize;

        for dir in self.dirs.clone() {
            if !dir.is_dir() {
                continue;
            }
            let entries = match std::fs::read_dir(&dir) {
                Ok(entries) => entries,
                Err(e) => {
                    self.errors.push(DiscoveryError {
                        kind: DiscoveryErrorKind::Load,
                        file: dir.clone(),
                        message: e.to_string(),
                    });
                    continue;
                }
            };

            for entry in entries.flatten() {
                let path = entry.path();
                if !is_descriptor(&path) {
                    continue;
                }
                if self.debug {
                    tracing::debug!(file = %path.display(), "Loading tool descriptor");
                }
                match self.load_descriptor(&path) {
                    Ok(tool) => {
                        tracing::info!(tool = %tool.name(), file = %path.display(), "Discovered tool");
                        registry.register_discovered(tool).await;
                        registered += 1;
                    }
                    Err(error) => {
                        tracing::warn!(
                            file = %error.file.display(),
                            "Tool discovery failed: {}",
                            error.message
                        );
                        self.errors.push(error);
                    }
                }
            }
        }

        registered
    }

    /// Drop previously discovered tools and rescan.
    pub async fn reload(&mut self, registry: &ToolRegistry) -> usize {
        registry.clear_discovered().await;
        self.discover_all(registry).await
    }

    fn load_descriptor(&self, path: &Path) -> Result<Arc<dyn Tool>, DiscoveryError> {
        let content = std::fs::read_to_string(path).map_err(|e| DiscoveryError {
            kind: DiscoveryErrorKind::Load,
            file: path.to_path_buf(),
            message: e.to_string(),
        })?;

        let descriptor: ToolDescriptor =
            toml::from_str(&content).map_err(|e| DiscoveryError {
                kind: DiscoveryErrorKind::Parse,
                file: path.to_path_buf(),
                message: e.to_string(),
            })?;

        if descriptor.name.is_empty() || descriptor.command.is_empty() {
            return Err(DiscoveryError {
                kind: DiscoveryErrorKind::Instantiate,
                file: path.to_path_buf(),
                message: "descriptor needs a non-empty name and command".to_string(),
            });
        }

        let schema = match descriptor.schema {
            Some(schema) if schema.is_object() => schema,
            Some(_) => {
                return Err(DiscoveryError {
                    kind: DiscoveryErrorKind::Instantiate,
                    file: path.to_path_buf(),
                    message: "schema must be a table".to_string(),
                })
            }
            None => json!({"type": "object", "properties": {}}),
        };

        Ok(Arc::new(DescriptorTool {
            name: descriptor.name,
            description: descriptor.description,
            kind: descriptor.kind.unwrap_or(ToolKind::Shell),
            command: descriptor.command,
            args: descriptor.args,
            schema,
            timeout: Duration::from_secs(
                descriptor
                    .timeout_seconds
                    .unwrap_or(DEFAULT_PLUGIN_TIMEOUT_SECS),
            ),
        }))
    }
}

fn is_descriptor(path: &Path) -> bool {
    if path.extension().and_then(|e| e.to_str()) != Some(DESCRIPTOR_SUFFIX) {
        return false;
    }
    !path
        .file_name()
        .and_then(|n| n.to_str())
        .map(|n| n.starts_with("__"))
        .unwrap_or(true)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_descriptor(dir: &Path, file: &str, content: &str) {
        std::fs::write(dir.join(file), content).unwrap();
    }

    #[tokio::test]
    async fn discovers_and_registers_descriptor_tools() {
        let dir = tempfile::tempdir().unwrap();
        write_descriptor(
            dir.path(),
            "hello.toml",
            r#"
                name = "hello"
                description = "Says hello"
                kind = "read"
                command = "cat"
            "#,
        );

        let registry = ToolRegistry::new();
        let mut manager = DiscoveryManager::new(vec![dir.path().to_path_buf()], false);
        let count = manager.discover_all(&registry).await;

        assert_eq!(count, 1);
        assert!(manager.errors().is_empty());
        let tool = registry.get("hello").await.unwrap();
        assert_eq!(tool.kind(), ToolKind::Read);
    }

    #[tokio::test]
    async fn descriptor_tool_round_trips_stdin() {
        let dir = tempfile::tempdir().unwrap();
        write_descriptor(
            dir.path(),
            "echo.toml",
            r#"
                name = "cat_args"
                description = "Echoes arguments"
                command = "cat"
            "#,
        );

        let registry = ToolRegistry::new();
        let mut manager = DiscoveryManager::new(vec![dir.path().to_path_buf()], false);
        manager.discover_all(&registry).await;

        let tool = registry.get("cat_args").await.unwrap();
        let result = tool
            .execute(ToolInvocation::new(
                json!({"x": 1}),
                dir.path().to_path_buf(),
            ))
            .await;
        assert!(result.success);
        assert_eq!(result.output, r#"{"x":1}"#);
    }

    #[tokio::test]
    async fn parse_errors_are_categorised() {
        let dir = tempfile::tempdir().unwrap();
        write_descriptor(dir.path(), "broken.toml", "not [valid toml");
        write_descriptor(
            dir.path(),
            "incomplete.toml",
            r#"
                name = ""
                description = "missing command"
                command = ""
            "#,
        );
        write_descriptor(dir.path(), "__skipped.toml", "ignored = true");

        let registry = ToolRegistry::new();
        let mut manager = DiscoveryManager::new(vec![dir.path().to_path_buf()], false);
        let count = manager.discover_all(&registry).await;

        assert_eq!(count, 0);
        let kinds: Vec<_> = manager.errors().iter().map(|e| e.kind).collect();
        assert!(kinds.contains(&DiscoveryErrorKind::Parse));
        assert!(kinds.contains(&DiscoveryErrorKind::Instantiate));
        assert_eq!(kinds.len(), 2);
    }

    #[tokio::test]
    async fn reload_replaces_discovered_tools() {
        let dir = tempfile::tempdir().unwrap();
        write_descriptor(
            dir.path(),
            "a.toml",
            r#"
                name = "tool_a"
                description = "A"
                command = "true"
            "#,
        );

        let registry = ToolRegistry::new();
        let mut manager = DiscoveryManager::new(vec![dir.path().to_path_buf()], false);
        manager.discover_all(&registry).await;
        assert!(registry.get("tool_a").await.is_some());

        std::fs::remove_file(dir.path().join("a.toml")).unwrap();
        write_descriptor(
            dir.path(),
            "b.toml",
            r#"
                name = "tool_b"
                description = "B"
                command = "true"
            "#,
        );
        manager.reload(&registry).await;
        assert!(registry.get("tool_a").await.is_none());
        assert!(registry.get("tool_b").await.is_some());
    }
}
