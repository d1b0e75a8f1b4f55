//! Session lifecycle
//!
//! A session owns every long-lived resource: the LLM provider, tool
//! registry, context manager, MCP supervisor, discovery manager, approval
//! manager, loop detector, and hook system. Lifecycle is `initialize`
//! (start MCP, run discovery, build the system prompt), any number of
//! `run` calls, then `close`.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use anyhow::Result;
use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::agent::{AgentEvent, TurnLoop};
use crate::ai::client::LlmProvider;
use crate::ai::types::TokenUsage;
use crate::approval::{ApprovalCallback, ApprovalManager, ApprovalPolicy};
use crate::config::AgentConfig;
use crate::context::ContextManager;
use crate::hooks::HookSystem;
use crate::loopdetect::LoopDetector;
use crate::mcp::{McpManager, McpServerInfo};
use crate::memory::UserMemoryStore;
use crate::persistence::SessionSnapshot;
use crate::subagent::SubAgentTool;
use crate::tools::builtin::register_builtin_tools;
use crate::tools::discovery::{DiscoveryError, DiscoveryManager};
use crate::tools::{ToolKind, ToolRegistry};

const BASE_SYSTEM_PROMPT: &str = "You are a coding agent operating in the user's working \
directory. Use the available tools to read, search, and modify the project, and to run \
commands. Prefer small verifiable steps, report what you changed, and stop when the task \
is complete.";

/// Summary counters for `/stats`.
#[derive(Debug, Clone)]
pub struct SessionStats {
    pub id: Uuid,
    pub turn_count: usize,
    pub message_count: usize,
    pub total_usage: TokenUsage,
    pub model: String,
    pub approval: ApprovalPolicy,
}

/// One conversation with its full service graph.
pub struct Session {
    id: Uuid,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    turn_count: usize,
    config: AgentConfig,
    working_dir: PathBuf,
    provider: Arc<dyn LlmProvider>,
    registry: Arc<ToolRegistry>,
    mcp: Arc<McpManager>,
    discovery: DiscoveryManager,
    approval: ApprovalManager,
    hooks: HookSystem,
    context: ContextManager,
    loop_detector: LoopDetector,
    memory: Arc<Mutex<UserMemoryStore>>,
}

impl Session {
    /// Build a session from validated configuration. `initialize` must run
    /// before `run`.
    pub fn new(config: AgentConfig, provider: Arc<dyn LlmProvider>) -> Result<Self> {
        Self::with_memory(
            config,
            provider,
            Arc::new(Mutex::new(UserMemoryStore::at_default_location())),
        )
    }

    pub fn with_memory(
        config: AgentConfig,
        provider: Arc<dyn LlmProvider>,
        memory: Arc<Mutex<UserMemoryStore>>,
    ) -> Result<Self> {
        config.validate()?;
        let working_dir = config.working_dir();
        let now = Utc::now();

        Ok(Self {
            id: Uuid::new_v4(),
            created_at: now,
            updated_at: now,
            turn_count: 0,
            registry: Arc::new(ToolRegistry::new()),
            mcp: Arc::new(McpManager::new(working_dir.clone())),
            discovery: DiscoveryManager::for_working_dir(&working_dir, config.debug),
            approval: ApprovalManager::new(config.approval),
            hooks: HookSystem::new(
                config.hooks_enabled,
                config.hooks.clone(),
                working_dir.clone(),
            ),
            context: ContextManager::new(String::new(), config.model.context_window),
            loop_detector: LoopDetector::new(),
            memory,
            working_dir,
            provider,
            config,
        })
    }

    /// Start MCP servers, run tool discovery, and build the system prompt
    /// with the tools that actually registered.
    pub async fn initialize(&mut self) -> Result<()> {
        register_builtin_tools(
            &self.registry,
            self.config.shell_environment.clone(),
            Arc::clone(&self.memory),
        )
        .await;

        for definition in &self.config.subagents {
            self.registry
                .register(Arc::new(SubAgentTool::new(
                    definition.clone(),
                    self.config.clone(),
                    Arc::clone(&self.provider),
                    Arc::clone(&self.memory),
                )))
                .await;
        }

        let discovered = self.discovery.discover_all(&self.registry).await;
        if discovered > 0 {
            tracing::info!(count = discovered, "Registered discovered tools");
        }

        self.registry
            .set_allowed_tools(self.config.allowed_tools.clone())
            .await;

        self.mcp.load_config(&self.config.mcp_servers).await;
        self.mcp.connect_all(&self.registry).await;
        Arc::clone(&self.mcp)
            .start_health_checks(Arc::clone(&self.registry))
            .await;

        let system_prompt = self.build_system_prompt().await;
        self.context =
            ContextManager::new(system_prompt, self.config.model.context_window);
        Ok(())
    }

    async fn build_system_prompt(&self) -> String {
        let mut prompt = String::from(BASE_SYSTEM_PROMPT);
        prompt.push_str(&format!("\n\nWorking directory: {}", self.working_dir.display()));

        if let Some(instructions) = self.config.instructions() {
            prompt.push_str("\n\n## Project instructions\n");
            prompt.push_str(&instructions);
        }

        if let Some(block) = self.memory.lock().expect("memory lock").system_prompt_block() {
            prompt.push_str("\n\n");
            prompt.push_str(&block);
        }

        let tools = self.registry.get_tools().await;
        if !tools.is_empty() {
            prompt.push_str("\n\n## Available tools\n");
            for tool in tools {
                prompt.push_str(&format!("- {}: {}\n", tool.name(), tool.description()));
            }
        }
        prompt
    }

    /// Drive one agent run; events stream to `events` as they happen.
    /// Returns the final assistant text, if any.
    pub async fn run(
        &mut self,
        user_message: &str,
        events: &mpsc::UnboundedSender<AgentEvent>,
    ) -> Option<String> {
        self.updated_at = Utc::now();
        let turn_loop = TurnLoop {
            provider: self.provider.as_ref(),
            registry: &self.registry,
            hooks: &self.hooks,
            approval: &self.approval,
            context: &mut self.context,
            loop_detector: &mut self.loop_detector,
            working_dir: &self.working_dir,
            max_turns: self.config.max_turns,
        };
        let response = turn_loop
            .run(user_message, events, &mut self.turn_count)
            .await;
        self.updated_at = Utc::now();
        response
    }

    /// Shut MCP down and release external resources.
    pub async fn close(&mut self) {
        self.mcp.shutdown(&self.registry).await;
    }

    // ── Engine hooks for front-ends ────────────────────────────────────

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn stats(&self) -> SessionStats {
        SessionStats {
            id: self.id,
            turn_count: self.turn_count,
            message_count: self.context.message_count(),
            total_usage: self.context.total_usage(),
            model: self.config.model.name.clone(),
            approval: self.approval.policy(),
        }
    }

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    pub fn clear_context(&mut self) {
        self.context.clear();
    }

    pub fn approval_policy(&self) -> ApprovalPolicy {
        self.approval.policy()
    }

    pub fn set_approval_policy(&mut self, policy: ApprovalPolicy) {
        self.approval.set_policy(policy);
        self.config.approval = policy;
    }

    pub fn set_approval_callback(&mut self, callback: ApprovalCallback) {
        self.approval.set_callback(callback);
    }

    /// Swap model and provider together (`/model`).
    pub fn set_model(&mut self, name: String, provider: Arc<dyn LlmProvider>) {
        self.config.model.name = name;
        self.provider = provider;
    }

    pub async fn tool_summaries(&self) -> Vec<(String, ToolKind, String)> {
        self.registry
            .get_tools()
            .await
            .iter()
            .map(|t| {
                (
                    t.name().to_string(),
                    t.kind(),
                    t.description().to_string(),
                )
            })
            .collect()
    }

    pub async fn mcp_infos(&self) -> Vec<McpServerInfo> {
        self.mcp.server_infos().await
    }

    /// Run one health sweep now and report the result (`/mcp-health`).
    pub async fn mcp_health(&self) -> Vec<McpServerInfo> {
        self.mcp.health_sweep(&self.registry).await;
        self.mcp.server_infos().await
    }

    /// Re-run tool discovery (`/reload`).
    pub async fn reload_tools(&mut self) -> (usize, Vec<DiscoveryError>) {
        let count = self.discovery.reload(&self.registry).await;
        (count, self.discovery.errors().to_vec())
    }

    // ── Persistence ────────────────────────────────────────────────────

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            id: self.id,
            created_at: self.created_at,
            updated_at: self.updated_at,
            turn_count: self.turn_count,
            messages: self
                .context
                .raw_messages()
                .iter()
                .map(|m| m.message.clone())
                .collect(),
            total_usage: self.context.total_usage(),
        }
    }

    /// Replay a snapshot into this (initialized) session, preserving ids,
    /// timestamps, turn count, and the message sequence.
    pub fn restore(&mut self, snapshot: SessionSnapshot) {
        self.id = snapshot.id;
        self.created_at = snapshot.created_at;
        self.updated_at = snapshot.updated_at;
        self.turn_count = snapshot.turn_count;
        self.context.clear();
        for message in snapshot.messages {
            self.context.replay_message(message);
        }
        self.context.set_total_usage(snapshot.total_usage);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ai::streaming::StreamEvent;
    use crate::ai::types::{AiTool, ChatMessage};
    use async_trait::async_trait;

    struct SilentProvider;

    #[async_trait]
    impl LlmProvider for SilentProvider {
        async fn chat_stream(
            &self,
            _messages: Vec<ChatMessage>,
            _tools: Vec<AiTool>,
        ) -> mpsc::UnboundedReceiver<StreamEvent> {
            let (tx, rx) = mpsc::unbounded_channel();
            let _ = tx.send(StreamEvent::TextDelta {
                text: "ok".into(),
            });
            let _ = tx.send(StreamEvent::MessageComplete {
                finish_reason: None,
                usage: None,
            });
            rx
        }

        async fn complete(&self, _messages: Vec<ChatMessage>) -> Result<(String, TokenUsage)> {
            Ok((String::new(), TokenUsage::default()))
        }
    }

    fn test_config(dir: &std::path::Path) -> AgentConfig {
        AgentConfig {
            api_key: Some("sk-test".into()),
            cwd: Some(dir.to_path_buf()),
            ..Default::default()
        }
    }

    fn test_memory(dir: &std::path::Path) -> Arc<Mutex<UserMemoryStore>> {
        Arc::new(Mutex::new(UserMemoryStore::new(dir.join("memory.json"))))
    }

    async fn initialized_session(dir: &std::path::Path) -> Session {
        let mut session = Session::with_memory(
            test_config(dir),
            Arc::new(SilentProvider),
            test_memory(dir),
        )
        .unwrap();
        session.initialize().await.unwrap();
        session
    }

    #[tokio::test]
    async fn initialize_registers_builtins_and_builds_prompt() {
        let dir = tempfile::tempdir().unwrap();
        let session = initialized_session(dir.path()).await;

        let tools = session.tool_summaries().await;
        let names: Vec<&str> = tools.iter().map(|(n, _, _)| n.as_str()).collect();
        assert!(names.contains(&"read_file"));
        assert!(names.contains(&"shell"));
        assert!(names.contains(&"memory"));

        assert!(session.context.system_prompt().contains("Available tools"));
        assert!(session.context.system_prompt().contains("read_file"));
    }

    #[tokio::test]
    async fn run_produces_response_and_counts_turns() {
        let dir = tempfile::tempdir().unwrap();
        let mut session = initialized_session(dir.path()).await;

        let (tx, _rx) = mpsc::unbounded_channel();
        let response = session.run("hello", &tx).await;
        assert_eq!(response.as_deref(), Some("ok"));
        assert_eq!(session.stats().turn_count, 1);
        assert_eq!(session.stats().message_count, 2);

        session.close().await;
    }

    #[tokio::test]
    async fn snapshot_restore_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let mut session = initialized_session(dir.path()).await;

        let (tx, _rx) = mpsc::unbounded_channel();
        session.run("first", &tx).await;
        session.run("second", &tx).await;
        let snapshot = session.snapshot();
        let original_stats = session.stats();
        session.close().await;

        let mut fresh = initialized_session(dir.path()).await;
        fresh.restore(snapshot.clone());

        let stats = fresh.stats();
        assert_eq!(stats.id, original_stats.id);
        assert_eq!(stats.turn_count, original_stats.turn_count);
        assert_eq!(stats.message_count, original_stats.message_count);
        assert_eq!(fresh.snapshot().messages, snapshot.messages);
        fresh.close().await;
    }

    #[tokio::test]
    async fn memory_block_lands_in_system_prompt() {
        let dir = tempfile::tempdir().unwrap();
        let memory = test_memory(dir.path());
        memory
            .lock()
            .unwrap()
            .set("style".into(), "concise".into())
            .unwrap();

        let mut session = Session::with_memory(
            test_config(dir.path()),
            Arc::new(SilentProvider),
            memory,
        )
        .unwrap();
        session.initialize().await.unwrap();

        assert!(session
            .context
            .system_prompt()
            .contains("style: concise"));
        session.close().await;
    }

    #[tokio::test]
    async fn allowed_tools_filter_applies() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = test_config(dir.path());
        config.allowed_tools = Some(vec!["read_file".into(), "grep".into()]);
        let mut session =
            Session::with_memory(config, Arc::new(SilentProvider), test_memory(dir.path()))
                .unwrap();
        session.initialize().await.unwrap();

        let names: Vec<String> = session
            .tool_summaries()
            .await
            .into_iter()
            .map(|(n, _, _)| n)
            .collect();
        assert_eq!(names.len(), 2);
        assert!(names.contains(&"read_file".to_string()));
        session.close().await;
    }
}
