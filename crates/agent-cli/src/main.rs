//! ai-agent - console front-end for the agent orchestration engine
//!
//! Single-shot with a positional prompt, or an interactive REPL with slash
//! commands. All behavior lives in `agent-core`; this binary only parses
//! arguments, renders the event stream, and dispatches commands.

use std::path::PathBuf;
use std::sync::Arc;

use agent_core::{AgentConfig, LlmClient, LlmClientConfig, Session};
use anyhow::{Context, Result};
use clap::Parser;
use tokio::sync::mpsc;

mod render;
mod repl;

/// AI coding agent
#[derive(Parser)]
#[command(name = "ai-agent")]
#[command(about = "An interactive coding agent", long_about = None)]
struct Cli {
    /// Run a single prompt and exit
    prompt: Option<String>,

    /// Working directory for the session
    #[arg(short = 'c', long)]
    cwd: Option<PathBuf>,
}

fn init_logging() {
    let log_dir = agent_core::paths::logs_dir();
    if let Err(e) = std::fs::create_dir_all(&log_dir) {
        eprintln!("Failed to create log directory: {}", e);
        return;
    }
    let log_file = match std::fs::File::create(log_dir.join("ai-agent.log")) {
        Ok(file) => file,
        Err(e) => {
            eprintln!("Failed to create log file: {}", e);
            return;
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .with_writer(std::sync::Mutex::new(log_file))
        .with_ansi(false)
        .init();
}

pub(crate) fn build_provider(config: &AgentConfig) -> Arc<LlmClient> {
    Arc::new(LlmClient::new(LlmClientConfig {
        model: config.model.name.clone(),
        api_key: config.api_key.clone().unwrap_or_default(),
        base_url: config.base_url.clone(),
        temperature: config.model.temperature,
    }))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging();

    let cwd = match cli.cwd {
        Some(cwd) => cwd
            .canonicalize()
            .with_context(|| format!("Working directory not found: {}", cwd.display()))?,
        None => std::env::current_dir()?,
    };

    let mut config = AgentConfig::load(&cwd)?;
    config.cwd = Some(cwd);
    config.validate()?;

    let provider = build_provider(&config);
    let mut session = Session::new(config, provider)?;
    session.initialize().await?;

    let outcome = match cli.prompt {
        Some(prompt) => run_single_shot(&mut session, &prompt).await,
        None => repl::run(&mut session).await,
    };

    session.close().await;
    outcome
}

/// One prompt, one run. Exits non-zero when the run produced no final
/// response.
async fn run_single_shot(session: &mut Session, prompt: &str) -> Result<()> {
    let (tx, rx) = mpsc::unbounded_channel();
    let renderer = tokio::spawn(render::render_events(rx));

    session.run(prompt, &tx).await;
    drop(tx);

    let response = renderer.await.unwrap_or(None);
    if response.is_none() {
        anyhow::bail!("Agent produced no final response");
    }
    Ok(())
}
