//! Interactive REPL with slash commands

use std::sync::Arc;

use agent_core::{ApprovalPolicy, PersistenceManager, Session};
use anyhow::Result;
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::render;

const HELP: &str = "\
Commands:
  /help              Show this help
  /config            Show active configuration
  /clear             Clear the conversation context
  /model <name>      Switch model
  /approval <policy> Set approval policy (on-request, on-failure, auto, auto-edit, never, yolo)
  /stats             Session statistics
  /tools             List available tools
  /mcp               List MCP servers
  /mcp-health        Run an MCP health sweep now
  /reload            Re-run tool discovery
  /save              Save this session
  /sessions          List saved sessions
  /resume <id>       Resume a saved session
  /checkpoint        Save a checkpoint of this session
  /restore <id>      Restore a checkpoint
  /exit, /quit       Leave";

pub async fn run(session: &mut Session) -> Result<()> {
    // Mutating tool calls that need confirmation prompt on the console.
    session.set_approval_callback(Arc::new(|confirmation| {
        Box::pin(async move {
            tokio::task::spawn_blocking(move || {
                use std::io::{BufRead, Write};
                println!("\n{}", confirmation.description);
                if let Some(command) = &confirmation.command {
                    println!("  $ {}", command);
                }
                if let Some(diff) = &confirmation.diff {
                    println!("{}", diff.to_unified_diff());
                }
                print!("Allow? [y/N] ");
                let _ = std::io::stdout().flush();
                let mut line = String::new();
                let _ = std::io::stdin().lock().read_line(&mut line);
                matches!(line.trim(), "y" | "Y" | "yes")
            })
            .await
            .unwrap_or(false)
        })
    }));

    let persistence = PersistenceManager::at_default_location()?;
    let mut editor = DefaultEditor::new()?;
    println!("ai-agent — type a message, or /help for commands");

    loop {
        let line = match editor.readline("› ") {
            Ok(line) => line,
            Err(ReadlineError::Interrupted) | Err(ReadlineError::Eof) => break,
            Err(e) => return Err(e.into()),
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let _ = editor.add_history_entry(line);

        if let Some(command) = line.strip_prefix('/') {
            if !dispatch_command(session, &persistence, command).await? {
                break;
            }
            continue;
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let renderer = tokio::spawn(render::render_events(rx));
        session.run(line, &tx).await;
        drop(tx);
        let _ = renderer.await;
    }

    Ok(())
}

/// Handle one slash command; returns false when the REPL should exit.
async fn dispatch_command(
    session: &mut Session,
    persistence: &PersistenceManager,
    command: &str,
) -> Result<bool> {
    let mut parts = command.splitn(2, ' ');
    let name = parts.next().unwrap_or_default();
    let arg = parts.next().map(str::trim).unwrap_or_default();

    match name {
        "help" => println!("{}", HELP),
        "config" => {
            let config = session.config();
            println!("model:      {}", config.model.name);
            println!("window:     {} tokens", config.model.context_window);
            println!("approval:   {}", session.approval_policy().as_str());
            println!("max turns:  {}", config.max_turns);
            println!("cwd:        {}", config.working_dir().display());
            println!("hooks:      {}", if config.hooks_enabled { "enabled" } else { "disabled" });
        }
        "clear" => {
            session.clear_context();
            println!("Context cleared");
        }
        "model" => {
            if arg.is_empty() {
                println!("Usage: /model <name>");
            } else {
                let mut config = session.config().clone();
                config.model.name = arg.to_string();
                let provider = crate::build_provider(&config);
                session.set_model(arg.to_string(), provider);
                println!("Model set to {}", arg);
            }
        }
        "approval" => match ApprovalPolicy::parse(arg) {
            Some(policy) => {
                session.set_approval_policy(policy);
                println!("Approval policy set to {}", policy.as_str());
            }
            None => println!("Unknown policy '{}'. See /help for the list.", arg),
        },
        "stats" => {
            let stats = session.stats();
            println!("session:  {}", stats.id);
            println!("turns:    {}", stats.turn_count);
            println!("messages: {}", stats.message_count);
            println!(
                "tokens:   {} prompt / {} completion / {} total",
                stats.total_usage.prompt_tokens,
                stats.total_usage.completion_tokens,
                stats.total_usage.total_tokens
            );
        }
        "tools" => {
            for (name, kind, description) in session.tool_summaries().await {
                println!("{:24} [{:?}] {}", name, kind, description);
            }
        }
        "mcp" => {
            let infos = session.mcp_infos().await;
            if infos.is_empty() {
                println!("No MCP servers configured");
            }
            for info in infos {
                println!(
                    "{:20} {:6} {} ({} tools)",
                    info.name, info.transport, info.status, info.tool_count
                );
            }
        }
        "mcp-health" => {
            for info in session.mcp_health().await {
                println!("{:20} {}", info.name, info.status);
            }
        }
        "reload" => {
            let (count, errors) = session.reload_tools().await;
            println!("Discovered {} tools", count);
            for error in errors {
                println!("  {:?} {}: {}", error.kind, error.file.display(), error.message);
            }
        }
        "save" => {
            let path = persistence.save(&session.snapshot())?;
            println!("Saved to {}", path.display());
        }
        "sessions" => {
            let listed = persistence.list();
            if listed.is_empty() {
                println!("No saved sessions");
            }
            for snapshot in listed {
                println!(
                    "{}  {}  {} turns, {} messages",
                    snapshot.id,
                    snapshot.updated_at.format("%Y-%m-%d %H:%M"),
                    snapshot.turn_count,
                    snapshot.messages.len()
                );
            }
        }
        "resume" => match arg.parse::<Uuid>() {
            Ok(id) => match persistence.load(id) {
                Ok(snapshot) => {
                    session.restore(snapshot);
                    let stats = session.stats();
                    println!(
                        "Resumed {} ({} turns, {} messages)",
                        stats.id, stats.turn_count, stats.message_count
                    );
                }
                Err(e) => println!("{}", e),
            },
            Err(_) => println!("Usage: /resume <session-uuid>"),
        },
        "checkpoint" => {
            let checkpoint_id = persistence.save_checkpoint(&session.snapshot())?;
            println!("Checkpoint {}", checkpoint_id);
        }
        "restore" => {
            if arg.is_empty() {
                println!("Usage: /restore <checkpoint-id>");
            } else {
                match persistence.load_checkpoint(arg) {
                    Ok(snapshot) => {
                        session.restore(snapshot);
                        println!("Checkpoint restored");
                    }
                    Err(e) => println!("{}", e),
                }
            }
        }
        "exit" | "quit" => return Ok(false),
        other => println!("Unknown command '/{}'. Try /help.", other),
    }

    Ok(true)
}
