//! Sub-agent tool
//!
//! A bounded nested agent run, invoked as if it were a tool. The child gets
//! a fresh session derived from the parent's configuration — restricted
//! tool allow-list, its own context, its own turn cap — and a wall-clock
//! deadline enforced between events. The parent's only coupling is the
//! single summary result it collects.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::mpsc;

use crate::agent::AgentEvent;
use crate::ai::client::LlmProvider;
use crate::config::{AgentConfig, SubAgentDefinition};
use crate::memory::UserMemoryStore;
use crate::session::Session;
use crate::tools::{Tool, ToolInvocation, ToolKind, ToolResult};

/// How a sub-agent run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Termination {
    Goal,
    Timeout,
    Error,
}

impl Termination {
    fn as_str(&self) -> &'static str {
        match self {
            Termination::Goal => "goal",
            Termination::Timeout => "timeout",
            Termination::Error => "error",
        }
    }
}

pub struct SubAgentTool {
    definition: SubAgentDefinition,
    parent_config: AgentConfig,
    provider: Arc<dyn LlmProvider>,
    memory: Arc<Mutex<UserMemoryStore>>,
}

impl SubAgentTool {
    pub fn new(
        definition: SubAgentDefinition,
        parent_config: AgentConfig,
        provider: Arc<dyn LlmProvider>,
        memory: Arc<Mutex<UserMemoryStore>>,
    ) -> Self {
        Self {
            definition,
            parent_config,
            provider,
            memory,
        }
    }

    /// Parent config with the definition's bounds applied. Nested sub-agent
    /// registration is dropped so children cannot recurse.
    fn derive_config(&self) -> AgentConfig {
        let mut config = self.parent_config.clone();
        config.max_turns = self.definition.max_turns;
        if self.definition.allowed_tools.is_some() {
            config.allowed_tools = self.definition.allowed_tools.clone();
        }
        config.subagents = Vec::new();
        config
    }
}

#[async_trait]
impl Tool for SubAgentTool {
    fn name(&self) -> &str {
        &self.definition.name
    }

    fn description(&self) -> &str {
        &self.definition.description
    }

    fn kind(&self) -> ToolKind {
        ToolKind::Memory
    }

    fn is_mutating(&self, _args: &Value) -> bool {
        true
    }

    fn schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "goal": {
                    "type": "string",
                    "description": "What the sub-agent should accomplish"
                }
            },
            "required": ["goal"],
            "additionalProperties": false
        })
    }

    async fn execute(&self, invocation: ToolInvocation) -> ToolResult {
        let Some(goal) = invocation.arg_str("goal") else {
            return ToolResult::error("Missing required parameter 'goal'");
        };

        let child = match Session::with_memory(
            self.derive_config(),
            Arc::clone(&self.provider),
            Arc::clone(&self.memory),
        ) {
            Ok(child) => child,
            Err(e) => return ToolResult::error(format!("Failed to create sub-agent: {}", e)),
        };
        let child = Arc::new(tokio::sync::Mutex::new(child));

        if let Err(e) = child.lock().await.initialize().await {
            return ToolResult::error(format!("Sub-agent initialization failed: {}", e));
        }

        let message = format!("{}\n\nGoal: {}", self.definition.goal_prompt, goal);
        let deadline =
            tokio::time::Instant::now() + Duration::from_secs(self.definition.timeout_seconds);

        let (tx, mut rx) = mpsc::unbounded_channel();
        let run_child = Arc::clone(&child);
        let handle = tokio::spawn(async move {
            let mut guard = run_child.lock().await;
            guard.run(&message, &tx).await
        });

        let mut termination = Termination::Goal;
        let mut tool_names: Vec<String> = Vec::new();
        let mut final_response: Option<String> = None;
        let mut last_error: Option<String> = None;

        loop {
            match tokio::time::timeout_at(deadline, rx.recv()).await {
                Ok(Some(event)) => match event {
                    AgentEvent::ToolCallStart { name, .. } => {
                        if !tool_names.contains(&name) {
                            tool_names.push(name);
                        }
                    }
                    AgentEvent::TextComplete { content } => final_response = Some(content),
                    AgentEvent::AgentError { error, .. } => {
                        termination = Termination::Error;
                        last_error = Some(error);
                    }
                    _ => {}
                },
                Ok(None) => break,
                Err(_) => {
                    tracing::warn!(
                        subagent = %self.definition.name,
                        timeout_secs = self.definition.timeout_seconds,
                        "Sub-agent deadline exceeded"
                    );
                    termination = Termination::Timeout;
                    handle.abort();
                    break;
                }
            }
        }

        if termination != Termination::Timeout {
            let _ = handle.await;
        }
        child.lock().await.close().await;

        let mut summary = format!(
            "Sub-agent '{}' finished: {}\n",
            self.definition.name,
            termination.as_str()
        );
        if let Some(error) = &last_error {
            summary.push_str(&format!("Error: {}\n", error));
        }
        summary.push_str(&format!(
            "Tools invoked: {}\n",
            if tool_names.is_empty() {
                "none".to_string()
            } else {
                tool_names.join(", ")
            }
        ));
        summary.push_str(&format!(
            "Final response:\n{}",
            final_response.as_deref().unwrap_or("(none)")
        ));

        if termination == Termination::Goal {
            ToolResult::success(summary)
        } else {
            ToolResult::error_with_output(
                format!("Sub-agent terminated: {}", termination.as_str()),
                summary,
            )
        }
    }
}
