//! Agent configuration
//!
//! TOML configuration loaded from `<cwd>/.ai-agent/config.toml`, falling back
//! to the system config directory. Both snake_case and camelCase keys are
//! accepted. Credentials fall back to the environment.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::approval::ApprovalPolicy;
use crate::hooks::HookConfig;
use crate::paths;

/// Default per-run turn cap.
pub const DEFAULT_MAX_TURNS: usize = 100;
/// Default model context window in tokens.
pub const DEFAULT_CONTEXT_WINDOW: usize = 128_000;
/// Default MCP server startup timeout.
pub const DEFAULT_MCP_STARTUP_TIMEOUT_SECS: u64 = 10;

/// Model selection and sampling options.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    pub name: String,
    #[serde(default)]
    pub temperature: Option<f64>,
    /// Drives the compaction trigger (0.8 x context_window).
    #[serde(default = "default_context_window", alias = "contextWindow")]
    pub context_window: usize,
}

fn default_context_window() -> usize {
    DEFAULT_CONTEXT_WINDOW
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            name: "gpt-4o-mini".to_string(),
            temperature: None,
            context_window: DEFAULT_CONTEXT_WINDOW,
        }
    }
}

/// Environment sanitisation for the shell tool.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ShellEnvironmentConfig {
    /// Skip the built-in credential-shaped exclude patterns.
    #[serde(default, alias = "ignoreDefaultExcludes")]
    pub ignore_default_excludes: bool,
    /// Glob-style variable name patterns to strip (`*`/`?`).
    #[serde(default, alias = "excludePatterns")]
    pub exclude_patterns: Vec<String>,
    /// Variables forced into the child environment.
    #[serde(default, alias = "setVars")]
    pub set_vars: HashMap<String, String>,
}

/// One configured MCP server. `command` and `url` are mutually exclusive.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct McpServerEntry {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub command: Option<String>,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: HashMap<String, String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_mcp_startup_timeout", alias = "startupTimeoutSec")]
    pub startup_timeout_sec: u64,
    #[serde(default)]
    pub cwd: Option<PathBuf>,
}

fn default_true() -> bool {
    true
}

fn default_mcp_startup_timeout() -> u64 {
    DEFAULT_MCP_STARTUP_TIMEOUT_SECS
}

impl McpServerEntry {
    /// Validate the stdio-XOR-url constraint.
    pub fn validate(&self, name: &str) -> Result<()> {
        match (&self.command, &self.url) {
            (Some(_), Some(_)) => anyhow::bail!(
                "MCP server '{}' sets both command and url; pick one transport",
                name
            ),
            (None, None) => anyhow::bail!("MCP server '{}' needs either command or url", name),
            _ => Ok(()),
        }
    }
}

/// A configured sub-agent definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubAgentDefinition {
    pub name: String,
    pub description: String,
    #[serde(alias = "goalPrompt")]
    pub goal_prompt: String,
    /// Restricts the child registry when set.
    #[serde(default, alias = "allowedTools")]
    pub allowed_tools: Option<Vec<String>>,
    #[serde(default = "default_subagent_max_turns", alias = "maxTurns")]
    pub max_turns: usize,
    #[serde(default = "default_subagent_timeout", alias = "timeoutSeconds")]
    pub timeout_seconds: u64,
}

fn default_subagent_max_turns() -> usize {
    20
}

fn default_subagent_timeout() -> u64 {
    600
}

/// Top-level agent configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    #[serde(default)]
    pub model: ModelConfig,
    #[serde(default, alias = "apiKey")]
    pub api_key: Option<String>,
    #[serde(default, alias = "baseUrl")]
    pub base_url: Option<String>,
    #[serde(default)]
    pub cwd: Option<PathBuf>,
    #[serde(default)]
    pub approval: ApprovalPolicy,
    #[serde(default = "default_max_turns", alias = "maxTurns")]
    pub max_turns: usize,
    #[serde(default, alias = "shellEnvironment")]
    pub shell_environment: ShellEnvironmentConfig,
    #[serde(default, alias = "hooksEnabled")]
    pub hooks_enabled: bool,
    #[serde(default)]
    pub hooks: Vec<HookConfig>,
    #[serde(default, alias = "mcpServers")]
    pub mcp_servers: HashMap<String, McpServerEntry>,
    #[serde(default)]
    pub subagents: Vec<SubAgentDefinition>,
    /// When set, only these tools are exposed to the model.
    #[serde(default, alias = "allowedTools")]
    pub allowed_tools: Option<Vec<String>>,
    #[serde(default, alias = "developerInstructions")]
    pub developer_instructions: Option<String>,
    #[serde(default, alias = "userInstructions")]
    pub user_instructions: Option<String>,
    /// Verbose discovery/health logging.
    #[serde(default)]
    pub debug: bool,
}

fn default_max_turns() -> usize {
    DEFAULT_MAX_TURNS
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            model: ModelConfig::default(),
            api_key: None,
            base_url: None,
            cwd: None,
            approval: ApprovalPolicy::default(),
            max_turns: DEFAULT_MAX_TURNS,
            shell_environment: ShellEnvironmentConfig::default(),
            hooks_enabled: false,
            hooks: Vec::new(),
            mcp_servers: HashMap::new(),
            subagents: Vec::new(),
            allowed_tools: None,
            developer_instructions: None,
            user_instructions: None,
            debug: false,
        }
    }
}

impl AgentConfig {
    /// Load configuration for a working directory: project config first, then
    /// the system config file, then built-in defaults. Environment fallbacks
    /// are applied afterwards.
    pub fn load(cwd: &Path) -> Result<Self> {
        let candidates = [paths::project_config_path(cwd), paths::system_config_path()];

        let mut config = Self::default();
        for path in &candidates {
            if path.is_file() {
                config = Self::load_file(path)?;
                tracing::info!(path = %path.display(), "Loaded config");
                break;
            }
        }

        config.apply_env_fallbacks();
        for (name, server) in &config.mcp_servers {
            server.validate(name)?;
        }
        Ok(config)
    }

    /// Parse a single TOML config file.
    pub fn load_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        toml::from_str(&content)
            .with_context(|| format!("Failed to parse config {}", path.display()))
    }

    /// Fill credentials from the environment when the file left them unset.
    pub fn apply_env_fallbacks(&mut self) {
        if self.api_key.is_none() {
            self.api_key = std::env::var("API_KEY")
                .or_else(|_| std::env::var("OPENAI_API_KEY"))
                .ok();
        }
        if self.base_url.is_none() {
            self.base_url = std::env::var("BASE_URL")
                .or_else(|_| std::env::var("OPENAI_API_BASE_URL"))
                .ok();
        }
    }

    /// Refuse to start on unusable configuration.
    pub fn validate(&self) -> Result<()> {
        if self.api_key.as_deref().unwrap_or("").is_empty() {
            anyhow::bail!(
                "No API key configured (set api_key in config.toml or the API_KEY / OPENAI_API_KEY environment variable)"
            );
        }
        if let Some(cwd) = &self.cwd {
            if !cwd.is_dir() {
                anyhow::bail!("Configured cwd does not exist: {}", cwd.display());
            }
        }
        if self.max_turns == 0 {
            anyhow::bail!("max_turns must be at least 1");
        }
        Ok(())
    }

    /// Working directory: configured value or the process cwd.
    pub fn working_dir(&self) -> PathBuf {
        self.cwd
            .clone()
            .unwrap_or_else(|| std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")))
    }

    /// Project instructions for the system prompt: explicit config values,
    /// falling back to `AGENT.MD` in the working directory.
    pub fn instructions(&self) -> Option<String> {
        let mut parts = Vec::new();
        if let Some(dev) = &self.developer_instructions {
            parts.push(dev.clone());
        }
        if let Some(user) = &self.user_instructions {
            parts.push(user.clone());
        }
        if parts.is_empty() {
            let agent_md = self.working_dir().join("AGENT.MD");
            if let Ok(content) = std::fs::read_to_string(agent_md) {
                parts.push(content);
            }
        }
        if parts.is_empty() {
            None
        } else {
            Some(parts.join("\n\n"))
        }
    }
}
