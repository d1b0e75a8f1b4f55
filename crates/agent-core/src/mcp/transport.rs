//! MCP stdio transport
//!
//! Newline-delimited JSON over a child process's stdin/stdout. The child is
//! killed when the transport is dropped or closed.

use std::collections::HashMap;
use std::path::Path;
use std::process::Stdio;

use anyhow::{anyhow, Result};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::Mutex;

#[derive(Debug)]
pub struct StdioTransport {
    stdin: Mutex<ChildStdin>,
    stdout: Mutex<BufReader<ChildStdout>>,
    child: Mutex<Child>,
}

impl StdioTransport {
    /// Spawn an MCP server process.
    pub async fn spawn(
        command: &str,
        args: &[String],
        env: &HashMap<String, String>,
        working_dir: &Path,
    ) -> Result<Self> {
        tracing::info!(command, ?args, "Spawning MCP server");

        let mut cmd = Command::new(command);
        cmd.args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .current_dir(working_dir)
            .kill_on_drop(true);
        for (key, value) in env {
            cmd.env(key, value);
        }

        let mut child = cmd.spawn().map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                anyhow!("Command not found: {}. Is it installed and in PATH?", command)
            } else {
                anyhow!("Failed to spawn {}: {}", command, e)
            }
        })?;

        let stdin = child.stdin.take().ok_or_else(|| anyhow!("No stdin"))?;
        let stdout = child.stdout.take().ok_or_else(|| anyhow!("No stdout"))?;

        Ok(Self {
            stdin: Mutex::new(stdin),
            stdout: Mutex::new(BufReader::new(stdout)),
            child: Mutex::new(child),
        })
    }

    /// Send one newline-delimited JSON message.
    pub async fn send(&self, message: &str) -> Result<()> {
        let mut stdin = self.stdin.lock().await;
        stdin.write_all(message.as_bytes()).await?;
        stdin.write_all(b"\n").await?;
        stdin.flush().await?;
        Ok(())
    }

    /// Receive the next JSON line, skipping any stray server chatter.
    pub async fn receive(&self) -> Result<String> {
        let mut stdout = self.stdout.lock().await;
        loop {
            let mut line = String::new();
            let bytes = stdout.read_line(&mut line).await?;
            if bytes == 0 {
                let mut child = self.child.lock().await;
                return match child.try_wait() {
                    Ok(Some(status)) => Err(anyhow!("MCP server exited with {}", status)),
                    Ok(None) => Err(anyhow!("MCP server closed stdout unexpectedly")),
                    Err(e) => Err(anyhow!("Error checking MCP server status: {}", e)),
                };
            }

            let line = line.trim();
            if line.starts_with('{') {
                return Ok(line.to_string());
            }
            if !line.is_empty() {
                tracing::debug!("Skipping non-JSON MCP output: {}", line);
            }
        }
    }

    pub async fn is_alive(&self) -> bool {
        let mut child = self.child.lock().await;
        matches!(child.try_wait(), Ok(None))
    }

    /// Kill the child process; errors are irrelevant during teardown.
    pub async fn close(&self) {
        let mut child = self.child.lock().await;
        let _ = child.start_kill();
    }
}
