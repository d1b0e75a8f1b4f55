//! MCP supervisor
//!
//! Owns every configured server's client lifecycle. Startup connects all
//! servers in parallel with per-server timeouts; a 60 s health sweep
//! reconnects anything that is not connected. Failures are isolated: one
//! bad server never takes down the sweep or the rest of the system.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::config::McpServerEntry;
use crate::tools::ToolRegistry;

use super::client::{McpClient, McpStatus};
use super::tool::McpTool;

const HEALTH_CHECK_INTERVAL: Duration = Duration::from_secs(60);

/// Server summary for front-end listings.
#[derive(Debug, Clone)]
pub struct McpServerInfo {
    pub name: String,
    pub transport: &'static str,
    pub status: McpStatus,
    pub tool_count: usize,
}

/// Supervises all configured MCP servers.
pub struct McpManager {
    entries: RwLock<HashMap<String, McpServerEntry>>,
    clients: RwLock<HashMap<String, Arc<McpClient>>>,
    statuses: RwLock<HashMap<String, McpStatus>>,
    working_dir: PathBuf,
    health_task: Mutex<Option<JoinHandle<()>>>,
}

impl McpManager {
    pub fn new(working_dir: PathBuf) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            clients: RwLock::new(HashMap::new()),
            statuses: RwLock::new(HashMap::new()),
            working_dir,
            health_task: Mutex::new(None),
        }
    }

    /// Store the enabled server entries from configuration.
    pub async fn load_config(&self, servers: &HashMap<String, McpServerEntry>) {
        let mut entries = self.entries.write().await;
        let mut statuses = self.statuses.write().await;
        entries.clear();
        for (name, entry) in servers {
            if !entry.enabled {
                continue;
            }
            entries.insert(name.clone(), entry.clone());
            statuses.insert(name.clone(), McpStatus::Disconnected);
        }
        info!(servers = entries.len(), "Loaded MCP server config");
    }

    /// Connect every configured server in parallel. Each connect is bounded
    /// by its own startup timeout and failures are logged, not propagated.
    pub async fn connect_all(&self, registry: &ToolRegistry) {
        let names: Vec<String> = self.entries.read().await.keys().cloned().collect();
        if names.is_empty() {
            return;
        }
        info!(count = names.len(), "Connecting MCP servers in parallel");

        let connects = names.into_iter().map(|name| async move {
            if let Err(e) = self.connect_server(&name, registry).await {
                warn!(server = %name, "MCP connect failed: {:#}", e);
            }
        });
        futures::future::join_all(connects).await;
    }

    /// Connect one server and register its tools. Replaces any previous
    /// client for the same name.
    pub async fn connect_server(
        &self,
        name: &str,
        registry: &ToolRegistry,
    ) -> anyhow::Result<()> {
        let entry = self
            .entries
            .read()
            .await
            .get(name)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("Unknown MCP server: {}", name))?;

        self.set_status(name, McpStatus::Connecting).await;

        // Drop a stale client before reconnecting.
        if let Some(previous) = self.clients.write().await.remove(name) {
            previous.close().await;
            registry.unregister_mcp_server(name).await;
        }

        let timeout = Duration::from_secs(entry.startup_timeout_sec);
        let connected =
            match tokio::time::timeout(timeout, McpClient::connect(name, &entry, &self.working_dir))
                .await
            {
                Ok(Ok(client)) => client,
                Ok(Err(e)) => {
                    self.set_status(name, McpStatus::Error(e.to_string())).await;
                    return Err(e);
                }
                Err(_) => {
                    let message = format!("Startup timed out after {}s", timeout.as_secs());
                    self.set_status(name, McpStatus::Error(message.clone())).await;
                    return Err(anyhow::anyhow!(message));
                }
            };

        let client = Arc::new(connected);
        for def in client.tools().await {
            registry
                .register_mcp(Arc::new(McpTool::new(name, def, Arc::clone(&client))))
                .await;
        }

        self.clients
            .write()
            .await
            .insert(name.to_string(), Arc::clone(&client));
        self.set_status(name, McpStatus::Connected).await;
        info!(server = %name, "MCP server connected");
        Ok(())
    }

    /// Start the repeating health sweep. Runs until `shutdown`.
    pub async fn start_health_checks(self: Arc<Self>, registry: Arc<ToolRegistry>) {
        let manager = Arc::clone(&self);
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(HEALTH_CHECK_INTERVAL);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            ticker.tick().await; // first tick fires immediately; skip it
            loop {
                ticker.tick().await;
                manager.health_sweep(&registry).await;
            }
        });
        *self.health_task.lock().await = Some(handle);
    }

    /// One pass over all servers: mark dead processes, reconnect anything
    /// not connected. Individual failures never abort the sweep.
    pub async fn health_sweep(&self, registry: &ToolRegistry) {
        let names: Vec<String> = self.entries.read().await.keys().cloned().collect();
        for name in names {
            let status = self.status_of(&name).await;

            if status == McpStatus::Connected {
                let alive = match self.clients.read().await.get(&name) {
                    Some(client) => client.is_alive().await,
                    None => false,
                };
                if alive {
                    continue;
                }
                warn!(server = %name, "MCP server process died");
                self.set_status(&name, McpStatus::Error("Process died".into()))
                    .await;
            }

            if let Err(e) = self.connect_server(&name, registry).await {
                warn!(server = %name, "MCP reconnect failed: {:#}", e);
            }
        }
    }

    /// Cancel the sweep, disconnect every client (errors suppressed), and
    /// clear all state.
    pub async fn shutdown(&self, registry: &ToolRegistry) {
        if let Some(handle) = self.health_task.lock().await.take() {
            handle.abort();
        }

        let clients: Vec<(String, Arc<McpClient>)> =
            self.clients.write().await.drain().collect();
        let disconnects = clients.iter().map(|(name, client)| {
            let client = Arc::clone(client);
            let name = name.clone();
            async move {
                client.close().await;
                tracing::debug!(server = %name, "MCP server disconnected");
            }
        });
        futures::future::join_all(disconnects).await;

        for (name, _) in &clients {
            registry.unregister_mcp_server(name).await;
        }
        self.statuses.write().await.clear();
        self.entries.write().await.clear();
    }

    /// Snapshot for `/mcp` and `/mcp-health`.
    pub async fn server_infos(&self) -> Vec<McpServerInfo> {
        let entries = self.entries.read().await;
        let clients = self.clients.read().await;
        let statuses = self.statuses.read().await;

        let mut infos = Vec::new();
        for (name, entry) in entries.iter() {
            let tool_count = match clients.get(name) {
                Some(client) => client.tools().await.len(),
                None => 0,
            };
            infos.push(McpServerInfo {
                name: name.clone(),
                transport: if entry.command.is_some() { "stdio" } else { "url" },
                status: statuses
                    .get(name)
                    .cloned()
                    .unwrap_or(McpStatus::Disconnected),
                tool_count,
            });
        }
        infos.sort_by(|a, b| a.name.cmp(&b.name));
        infos
    }

    pub async fn status_of(&self, name: &str) -> McpStatus {
        self.statuses
            .read()
            .await
            .get(name)
            .cloned()
            .unwrap_or(McpStatus::Disconnected)
    }

    async fn set_status(&self, name: &str, status: McpStatus) {
        self.statuses
            .write()
            .await
            .insert(name.to_string(), status);
    }
}
