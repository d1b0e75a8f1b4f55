//! Shell tool - execute commands with a sanitised environment
//!
//! Commands run through `sh -c` in the working directory under a hard
//! wall-clock timeout. The child environment is scrubbed of
//! credential-shaped variables unless configured otherwise. Lexically
//! dangerous commands are blocked here as a last line of defense, distinct
//! from policy rejection (which never reaches execute).

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::process::Command;

use super::parse_args;
use crate::approval::command_is_dangerous;
use crate::config::ShellEnvironmentConfig;
use crate::tools::{Tool, ToolConfirmation, ToolInvocation, ToolKind, ToolResult};

const DEFAULT_TIMEOUT_SECS: u64 = 120;
const MAX_TIMEOUT_SECS: u64 = 600;
const MAX_OUTPUT_BYTES: usize = 50_000;

/// Credential-shaped variable name patterns stripped by default.
const DEFAULT_EXCLUDE_PATTERNS: &[&str] = &[
    "*KEY*", "*SECRET*", "*TOKEN*", "*PASSWORD*", "*CREDENTIAL*", "AWS_*", "GOOGLE_*",
];

pub struct ShellTool {
    env_config: ShellEnvironmentConfig,
}

#[derive(Deserialize)]
struct Params {
    command: String,
    #[serde(default)]
    timeout: Option<u64>,
}

impl ShellTool {
    pub fn new(env_config: ShellEnvironmentConfig) -> Self {
        Self { env_config }
    }

    /// Decide whether a variable survives into the child environment.
    fn env_allowed(&self, name: &str) -> bool {
        if !self.env_config.ignore_default_excludes {
            for pattern in DEFAULT_EXCLUDE_PATTERNS {
                if glob_match(pattern, name) {
                    return false;
                }
            }
        }
        for pattern in &self.env_config.exclude_patterns {
            if glob_match(pattern, name) {
                return false;
            }
        }
        true
    }
}

/// Minimal `*`/`?` glob matcher over variable names, case-insensitive.
fn glob_match(pattern: &str, name: &str) -> bool {
    fn inner(p: &[u8], n: &[u8]) -> bool {
        match (p.first(), n.first()) {
            (None, None) => true,
            (Some(b'*'), _) => {
                inner(&p[1..], n) || (!n.is_empty() && inner(p, &n[1..]))
            }
            (Some(b'?'), Some(_)) => inner(&p[1..], &n[1..]),
            (Some(pc), Some(nc)) if pc.eq_ignore_ascii_case(nc) => inner(&p[1..], &n[1..]),
            _ => false,
        }
    }
    inner(pattern.as_bytes(), name.as_bytes())
}

fn truncate_output(bytes: &[u8]) -> (String, bool) {
    let text = String::from_utf8_lossy(bytes);
    if text.len() <= MAX_OUTPUT_BYTES {
        return (text.into_owned(), false);
    }
    let mut end = MAX_OUTPUT_BYTES;
    while end > 0 && !text.is_char_boundary(end) {
        end -= 1;
    }
    (format!("{}\n[... output truncated ...]", &text[..end]), true)
}

#[async_trait]
impl Tool for ShellTool {
    fn name(&self) -> &str {
        "shell"
    }

    fn description(&self) -> &str {
        "Execute a shell command in the working directory. Output is captured and truncated; the command is killed after the timeout."
    }

    fn kind(&self) -> ToolKind {
        ToolKind::Shell
    }

    fn schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "command": {
                    "type": "string",
                    "description": "The shell command to execute"
                },
                "timeout": {
                    "type": "integer",
                    "description": "Timeout in seconds (default 120, max 600)"
                }
            },
            "required": ["command"],
            "additionalProperties": false
        })
    }

    fn confirmation(&self, invocation: &ToolInvocation) -> Option<ToolConfirmation> {
        let command = invocation.arg_str("command")?.to_string();
        let mut confirmation = ToolConfirmation::new(
            self.name(),
            invocation.arguments.clone(),
            format!("Run `{}`", command),
        );
        confirmation.dangerous = command_is_dangerous(&command).is_some();
        confirmation.command = Some(command);
        Some(confirmation)
    }

    async fn execute(&self, invocation: ToolInvocation) -> ToolResult {
        let params = match parse_args::<Params>(&invocation.arguments) {
            Ok(p) => p,
            Err(e) => return e,
        };

        if let Some(reason) = command_is_dangerous(&params.command) {
            tracing::warn!(command = %params.command, reason, "Blocked dangerous shell command");
            return ToolResult::error(format!("Blocked dangerous command: {}", reason))
                .with_metadata("blocked", json!(true));
        }

        let timeout_secs = params
            .timeout
            .unwrap_or(DEFAULT_TIMEOUT_SECS)
            .min(MAX_TIMEOUT_SECS);

        let mut cmd = Command::new("sh");
        cmd.arg("-c")
            .arg(&params.command)
            .current_dir(&invocation.working_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .env_clear()
            .kill_on_drop(true);

        for (name, value) in std::env::vars() {
            if self.env_allowed(&name) {
                cmd.env(&name, &value);
            }
        }
        for (name, value) in &self.env_config.set_vars {
            cmd.env(name, value);
        }

        let child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => return ToolResult::error(format!("Failed to spawn command: {}", e)),
        };

        let output = match tokio::time::timeout(
            Duration::from_secs(timeout_secs),
            child.wait_with_output(),
        )
        .await
        {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => return ToolResult::error(format!("Command failed: {}", e)),
            Err(_) => {
                return ToolResult::error(format!(
                    "Command timed out after {} seconds",
                    timeout_secs
                ))
                .with_metadata("timeout", json!(true));
            }
        };

        let (stdout, stdout_truncated) = truncate_output(&output.stdout);
        let (stderr, stderr_truncated) = truncate_output(&output.stderr);
        let exit_code = output.status.code().unwrap_or(-1);

        let mut combined = stdout;
        if !stderr.is_empty() {
            if !combined.is_empty() {
                combined.push('\n');
            }
            combined.push_str(&stderr);
        }

        let mut result = if output.status.success() {
            ToolResult::success(combined)
        } else {
            ToolResult::error_with_output(format!("Command exited with code {}", exit_code), combined)
        };
        result.truncated = stdout_truncated || stderr_truncated;
        result.with_exit_code(exit_code)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tool() -> ShellTool {
        ShellTool::new(ShellEnvironmentConfig::default())
    }

    fn invoke(command: &str, dir: &std::path::Path) -> ToolInvocation {
        ToolInvocation::new(json!({"command": command}), dir.to_path_buf())
    }

    #[tokio::test]
    async fn captures_output_and_exit_code() {
        let dir = tempfile::tempdir().unwrap();
        let result = tool().execute(invoke("echo hello", dir.path())).await;
        assert!(result.success);
        assert_eq!(result.output.trim(), "hello");
        assert_eq!(result.exit_code, Some(0));
    }

    #[tokio::test]
    async fn failure_keeps_partial_output() {
        let dir = tempfile::tempdir().unwrap();
        let result = tool()
            .execute(invoke("echo partial && exit 3", dir.path()))
            .await;
        assert!(!result.success);
        assert_eq!(result.exit_code, Some(3));
        assert!(result.output.contains("partial"));
        assert!(result.error.unwrap().contains("code 3"));
    }

    #[tokio::test]
    async fn blocks_dangerous_commands_lexically() {
        let dir = tempfile::tempdir().unwrap();
        let result = tool().execute(invoke("rm -rf /", dir.path())).await;
        assert!(!result.success);
        assert_eq!(result.metadata["blocked"], json!(true));
    }

    #[tokio::test]
    async fn times_out_long_commands() {
        let dir = tempfile::tempdir().unwrap();
        let invocation = ToolInvocation::new(
            json!({"command": "sleep 5", "timeout": 1}),
            dir.path().to_path_buf(),
        );
        let result = tool().execute(invocation).await;
        assert!(!result.success);
        assert_eq!(result.metadata["timeout"], json!(true));
    }

    #[tokio::test]
    async fn scrubs_credential_env_vars() {
        let dir = tempfile::tempdir().unwrap();
        std::env::set_var("TEST_SHELL_SECRET_VALUE", "sensitive");
        let result = tool()
            .execute(invoke("echo \"[${TEST_SHELL_SECRET_VALUE:-absent}]\"", dir.path()))
            .await;
        std::env::remove_var("TEST_SHELL_SECRET_VALUE");
        assert_eq!(result.output.trim(), "[absent]");
    }

    #[tokio::test]
    async fn set_vars_reach_the_child() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = ShellEnvironmentConfig::default();
        config.set_vars.insert("INJECTED_VAR".into(), "yes".into());
        let result = ShellTool::new(config)
            .execute(invoke("echo $INJECTED_VAR", dir.path()))
            .await;
        assert_eq!(result.output.trim(), "yes");
    }

    #[test]
    fn glob_matcher_handles_wildcards() {
        assert!(glob_match("*KEY*", "OPENAI_API_KEY"));
        assert!(glob_match("AWS_*", "AWS_REGION"));
        assert!(glob_match("??_VAR", "MY_VAR"));
        assert!(!glob_match("AWS_*", "MY_AWS"));
        assert!(glob_match("*secret*", "DB_SECRET_X"));
    }

    #[test]
    fn confirmation_carries_command_and_danger() {
        let invocation = ToolInvocation::new(
            json!({"command": "rm -rf /"}),
            std::path::PathBuf::from("/tmp"),
        );
        let confirmation = tool().confirmation(&invocation).unwrap();
        assert_eq!(confirmation.command.as_deref(), Some("rm -rf /"));
        assert!(confirmation.dangerous);
    }
}
