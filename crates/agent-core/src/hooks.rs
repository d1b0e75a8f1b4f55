//! Lifecycle hook system
//!
//! User-configured commands dispatched at agent lifecycle points. Each hook
//! runs as a subprocess in the agent's working directory with `AI_AGENT_*`
//! environment variables describing the trigger. Hook failures are logged
//! and never fail the host operation.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::process::Command;

/// Default per-hook timeout.
const DEFAULT_HOOK_TIMEOUT_SECS: u64 = 30;

/// Lifecycle point a hook fires at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HookTrigger {
    BeforeAgent,
    AfterAgent,
    BeforeTool,
    AfterTool,
    OnError,
}

impl HookTrigger {
    pub fn as_str(&self) -> &'static str {
        match self {
            HookTrigger::BeforeAgent => "before_agent",
            HookTrigger::AfterAgent => "after_agent",
            HookTrigger::BeforeTool => "before_tool",
            HookTrigger::AfterTool => "after_tool",
            HookTrigger::OnError => "on_error",
        }
    }
}

/// One configured hook. `command` and `script` are mutually exclusive; the
/// first one set wins.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HookConfig {
    pub name: String,
    pub trigger: HookTrigger,
    #[serde(default)]
    pub command: Option<String>,
    #[serde(default)]
    pub script: Option<String>,
    #[serde(default = "default_hook_timeout", alias = "timeoutSeconds")]
    pub timeout_seconds: u64,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_hook_timeout() -> u64 {
    DEFAULT_HOOK_TIMEOUT_SECS
}

fn default_enabled() -> bool {
    true
}

impl HookConfig {
    fn shell_line(&self) -> Option<&str> {
        self.command.as_deref().or(self.script.as_deref())
    }
}

/// Dispatches configured hooks. Consulted only when `enabled` is true.
pub struct HookSystem {
    enabled: bool,
    hooks: Vec<HookConfig>,
    working_dir: PathBuf,
}

impl HookSystem {
    pub fn new(enabled: bool, hooks: Vec<HookConfig>, working_dir: PathBuf) -> Self {
        Self {
            enabled,
            hooks,
            working_dir,
        }
    }

    /// A hook system that never fires.
    pub fn disabled() -> Self {
        Self::new(false, Vec::new(), PathBuf::from("."))
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub async fn before_agent(&self, user_message: &str) {
        self.dispatch(
            HookTrigger::BeforeAgent,
            vec![("AI_AGENT_USER_MESSAGE", user_message.to_string())],
        )
        .await;
    }

    pub async fn after_agent(&self, user_message: &str, response: &str) {
        self.dispatch(
            HookTrigger::AfterAgent,
            vec![
                ("AI_AGENT_USER_MESSAGE", user_message.to_string()),
                ("AI_AGENT_RESPONSE", response.to_string()),
            ],
        )
        .await;
    }

    pub async fn before_tool(&self, tool_name: &str, params: &Value) {
        self.dispatch(
            HookTrigger::BeforeTool,
            vec![
                ("AI_AGENT_TOOL_NAME", tool_name.to_string()),
                ("AI_AGENT_TOOL_PARAMS", params.to_string()),
            ],
        )
        .await;
    }

    pub async fn after_tool(&self, tool_name: &str, params: &Value, result_text: &str) {
        self.dispatch(
            HookTrigger::AfterTool,
            vec![
                ("AI_AGENT_TOOL_NAME", tool_name.to_string()),
                ("AI_AGENT_TOOL_PARAMS", params.to_string()),
                ("AI_AGENT_TOOL_RESULT", result_text.to_string()),
            ],
        )
        .await;
    }

    pub async fn on_error(&self, error: &str) {
        self.dispatch(
            HookTrigger::OnError,
            vec![("AI_AGENT_ERROR", error.to_string())],
        )
        .await;
    }

    async fn dispatch(&self, trigger: HookTrigger, extra_env: Vec<(&'static str, String)>) {
        if !self.enabled {
            return;
        }
        for hook in self
            .hooks
            .iter()
            .filter(|h| h.enabled && h.trigger == trigger)
        {
            self.run_hook(hook, trigger, &extra_env).await;
        }
    }

    async fn run_hook(
        &self,
        hook: &HookConfig,
        trigger: HookTrigger,
        extra_env: &[(&'static str, String)],
    ) {
        let Some(line) = hook.shell_line() else {
            tracing::warn!(hook = %hook.name, "Hook has neither command nor script");
            return;
        };

        let mut cmd = Command::new("sh");
        cmd.arg("-c")
            .arg(line)
            .current_dir(&self.working_dir)
            .env("AI_AGENT_TRIGGER", trigger.as_str())
            .env("AI_AGENT_CWD", &self.working_dir)
            .stdin(std::process::Stdio::null())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .kill_on_drop(true);
        for (key, value) in extra_env {
            cmd.env(key, value);
        }

        let child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => {
                tracing::warn!(hook = %hook.name, "Failed to spawn hook: {}", e);
                return;
            }
        };

        let timeout = Duration::from_secs(hook.timeout_seconds);
        match tokio::time::timeout(timeout, child.wait_with_output()).await {
            Ok(Ok(output)) => {
                if !output.status.success() {
                    tracing::warn!(
                        hook = %hook.name,
                        exit = output.status.code().unwrap_or(-1),
                        stderr = %String::from_utf8_lossy(&output.stderr).trim(),
                        "Hook exited with failure"
                    );
                }
            }
            Ok(Err(e)) => tracing::warn!(hook = %hook.name, "Hook execution failed: {}", e),
            Err(_) => tracing::warn!(
                hook = %hook.name,
                timeout_secs = hook.timeout_seconds,
                "Hook timed out"
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn marker_hook(trigger: HookTrigger, marker: &std::path::Path) -> HookConfig {
        HookConfig {
            name: "marker".into(),
            trigger,
            command: Some(format!(
                "echo \"$AI_AGENT_TRIGGER $AI_AGENT_TOOL_NAME\" >> {}",
                marker.display()
            )),
            script: None,
            timeout_seconds: 5,
            enabled: true,
        }
    }

    #[tokio::test]
    async fn disabled_system_never_fires() {
        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join("fired");
        let hooks = HookSystem::new(
            false,
            vec![marker_hook(HookTrigger::BeforeTool, &marker)],
            dir.path().to_path_buf(),
        );
        hooks.before_tool("read_file", &json!({})).await;
        assert!(!marker.exists());
    }

    #[tokio::test]
    async fn before_tool_hook_receives_env() {
        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join("fired");
        let hooks = HookSystem::new(
            true,
            vec![marker_hook(HookTrigger::BeforeTool, &marker)],
            dir.path().to_path_buf(),
        );
        hooks.before_tool("read_file", &json!({"path": "x"})).await;

        let content = std::fs::read_to_string(&marker).unwrap();
        assert_eq!(content.trim(), "before_tool read_file");
    }

    #[tokio::test]
    async fn hook_failure_does_not_propagate() {
        let dir = tempfile::tempdir().unwrap();
        let hooks = HookSystem::new(
            true,
            vec![HookConfig {
                name: "broken".into(),
                trigger: HookTrigger::AfterTool,
                command: Some("exit 3".into()),
                script: None,
                timeout_seconds: 5,
                enabled: true,
            }],
            dir.path().to_path_buf(),
        );
        // Must not panic or error.
        hooks.after_tool("shell", &json!({}), "output").await;
    }

    #[tokio::test]
    async fn only_matching_trigger_fires() {
        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join("fired");
        let hooks = HookSystem::new(
            true,
            vec![marker_hook(HookTrigger::AfterAgent, &marker)],
            dir.path().to_path_buf(),
        );
        hooks.before_tool("read_file", &json!({})).await;
        assert!(!marker.exists());

        hooks.after_agent("hi", "hello").await;
        assert!(marker.exists());
    }
}
