//! Plain-console rendering of the engine event stream

use std::io::Write;

use agent_core::AgentEvent;
use tokio::sync::mpsc;

/// Consume events until the channel closes, printing progress to stdout and
/// errors to stderr. Returns the final response, if any.
pub async fn render_events(mut rx: mpsc::UnboundedReceiver<AgentEvent>) -> Option<String> {
    let mut final_response = None;

    while let Some(event) = rx.recv().await {
        match event {
            AgentEvent::AgentStart { .. } => {}
            AgentEvent::TextDelta { content } => {
                print!("{}", content);
                let _ = std::io::stdout().flush();
            }
            AgentEvent::TextComplete { .. } => println!(),
            AgentEvent::ToolCallStart { name, args, .. } => {
                println!("⚙ {} {}", name, compact_args(&args));
            }
            AgentEvent::ToolCallComplete {
                name,
                success,
                error,
                truncated,
                ..
            } => {
                if success {
                    let note = if truncated { " (output truncated)" } else { "" };
                    println!("✔ {}{}", name, note);
                } else {
                    println!("✘ {}: {}", name, error.unwrap_or_default());
                }
            }
            AgentEvent::AgentError { error, .. } => {
                eprintln!("error: {}", error);
            }
            AgentEvent::AgentEnd { response, .. } => {
                final_response = response;
            }
        }
    }

    final_response
}

fn compact_args(args: &serde_json::Value) -> String {
    let text = args.to_string();
    if text.chars().count() > 120 {
        let truncated: String = text.chars().take(120).collect();
        format!("{}…", truncated)
    } else {
        text
    }
}
