//! MCP client
//!
//! One client per configured server. Stdio servers get a background receive
//! loop that routes responses to pending requests; URL servers speak
//! JSON-RPC over plain HTTP POST. Every transition to `Disconnected` or
//! `Error` closes the client's transport.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};
use serde_json::Value;
use tokio::sync::{mpsc, oneshot, RwLock};
use tracing::{debug, error, info};

use crate::config::McpServerEntry;

use super::protocol::{
    ClientInfo, InitializeParams, InitializeResult, McpRequest, McpResponse, McpToolDef,
    ToolCallParams, ToolCallResult, ToolsListResult, PROTOCOL_VERSION,
};
use super::transport::StdioTransport;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Connection state machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum McpStatus {
    Disconnected,
    Connecting,
    Connected,
    Error(String),
}

impl std::fmt::Display for McpStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            McpStatus::Disconnected => write!(f, "disconnected"),
            McpStatus::Connecting => write!(f, "connecting"),
            McpStatus::Connected => write!(f, "connected"),
            McpStatus::Error(e) => write!(f, "error: {}", e),
        }
    }
}

type PendingMap = Arc<RwLock<HashMap<i64, oneshot::Sender<Result<Value>>>>>;

enum ClientTransport {
    Stdio {
        transport: Arc<StdioTransport>,
        pending: PendingMap,
        shutdown_tx: mpsc::Sender<()>,
    },
    Http {
        http: reqwest::Client,
        url: String,
    },
}

/// Client for one MCP server.
pub struct McpClient {
    name: String,
    transport: ClientTransport,
    next_id: AtomicI64,
    status: RwLock<McpStatus>,
    tools: RwLock<Vec<McpToolDef>>,
}

impl McpClient {
    /// Build a transport for the entry and perform the MCP handshake
    /// (`initialize` + `tools/list`).
    pub async fn connect(
        name: &str,
        entry: &McpServerEntry,
        working_dir: &std::path::Path,
    ) -> Result<Self> {
        let transport = if let Some(command) = &entry.command {
            let cwd = entry.cwd.as_deref().unwrap_or(working_dir);
            let transport =
                Arc::new(StdioTransport::spawn(command, &entry.args, &entry.env, cwd).await?);
            let pending: PendingMap = Arc::new(RwLock::new(HashMap::new()));
            let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
            spawn_receive_loop(name, Arc::clone(&transport), Arc::clone(&pending), shutdown_rx);
            ClientTransport::Stdio {
                transport,
                pending,
                shutdown_tx,
            }
        } else if let Some(url) = &entry.url {
            ClientTransport::Http {
                http: reqwest::Client::new(),
                url: url.clone(),
            }
        } else {
            return Err(anyhow!("Server '{}' has neither command nor url", name));
        };

        let client = Self {
            name: name.to_string(),
            transport,
            next_id: AtomicI64::new(1),
            status: RwLock::new(McpStatus::Connecting),
            tools: RwLock::new(Vec::new()),
        };

        match client.handshake().await {
            Ok(()) => {
                *client.status.write().await = McpStatus::Connected;
                Ok(client)
            }
            Err(e) => {
                client.close().await;
                Err(e)
            }
        }
    }

    async fn handshake(&self) -> Result<()> {
        let params = InitializeParams {
            protocol_version: PROTOCOL_VERSION.to_string(),
            capabilities: serde_json::json!({}),
            client_info: ClientInfo {
                name: "ai-agent".to_string(),
                version: env!("CARGO_PKG_VERSION").to_string(),
            },
        };
        let init: InitializeResult = self
            .request("initialize", Some(serde_json::to_value(params)?))
            .await?;
        info!(
            server = %self.name,
            protocol = %init.protocol_version,
            "MCP server initialized"
        );
        self.notify("notifications/initialized", None).await?;

        let listed: ToolsListResult = self.request("tools/list", None).await?;
        info!(server = %self.name, tools = listed.tools.len(), "MCP tools listed");
        *self.tools.write().await = listed.tools;
        Ok(())
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub async fn status(&self) -> McpStatus {
        self.status.read().await.clone()
    }

    /// Tools advertised at the last successful handshake.
    pub async fn tools(&self) -> Vec<McpToolDef> {
        self.tools.read().await.clone()
    }

    pub async fn call_tool(&self, name: &str, arguments: Value) -> Result<ToolCallResult> {
        let params = ToolCallParams {
            name: name.to_string(),
            arguments: if arguments.is_null() {
                None
            } else {
                Some(arguments)
            },
        };
        self.request("tools/call", Some(serde_json::to_value(params)?))
            .await
    }

    pub async fn is_alive(&self) -> bool {
        match &self.transport {
            ClientTransport::Stdio { transport, .. } => transport.is_alive().await,
            ClientTransport::Http { .. } => {
                matches!(*self.status.read().await, McpStatus::Connected)
            }
        }
    }

    /// Tear the connection down; safe to call repeatedly.
    pub async fn close(&self) {
        {
            let mut status = self.status.write().await;
            if !matches!(*status, McpStatus::Error(_)) {
                *status = McpStatus::Disconnected;
            }
        }
        if let ClientTransport::Stdio {
            transport,
            shutdown_tx,
            pending,
        } = &self.transport
        {
            let _ = shutdown_tx.try_send(());
            let mut pending = pending.write().await;
            for (_, tx) in pending.drain() {
                let _ = tx.send(Err(anyhow!("Connection closed")));
            }
            transport.close().await;
        }
    }

    pub async fn mark_error(&self, message: impl Into<String>) {
        *self.status.write().await = McpStatus::Error(message.into());
    }

    async fn request<R: for<'de> serde::Deserialize<'de>>(
        &self,
        method: &str,
        params: Option<Value>,
    ) -> Result<R> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let request = McpRequest::new(id, method, params);
        debug!(server = %self.name, id, method, "MCP request");

        let value = match &self.transport {
            ClientTransport::Stdio {
                transport, pending, ..
            } => {
                let (tx, rx) = oneshot::channel();
                pending.write().await.insert(id, tx);
                transport.send(&serde_json::to_string(&request)?).await?;

                match tokio::time::timeout(REQUEST_TIMEOUT, rx).await {
                    Ok(Ok(result)) => result?,
                    Ok(Err(_)) => return Err(anyhow!("Request cancelled")),
                    Err(_) => {
                        pending.write().await.remove(&id);
                        return Err(anyhow!(
                            "Request timed out after {}s",
                            REQUEST_TIMEOUT.as_secs()
                        ));
                    }
                }
            }
            ClientTransport::Http { http, url } => {
                let response = http
                    .post(url)
                    .json(&request)
                    .timeout(REQUEST_TIMEOUT)
                    .send()
                    .await?;
                let parsed: McpResponse = response.json().await?;
                if let Some(error) = parsed.error {
                    return Err(anyhow!("MCP error {}: {}", error.code, error.message));
                }
                parsed.result.unwrap_or(Value::Null)
            }
        };

        Ok(serde_json::from_value(value)?)
    }

    async fn notify(&self, method: &str, params: Option<Value>) -> Result<()> {
        #[derive(serde::Serialize)]
        struct Notification {
            jsonrpc: &'static str,
            method: String,
            #[serde(skip_serializing_if = "Option::is_none")]
            params: Option<Value>,
        }
        let notification = Notification {
            jsonrpc: "2.0",
            method: method.to_string(),
            params,
        };

        match &self.transport {
            ClientTransport::Stdio { transport, .. } => {
                transport.send(&serde_json::to_string(&notification)?).await
            }
            ClientTransport::Http { http, url } => {
                let _ = http.post(url).json(&notification).send().await?;
                Ok(())
            }
        }
    }
}

/// Background loop routing stdio responses to their pending requests.
fn spawn_receive_loop(
    name: &str,
    transport: Arc<StdioTransport>,
    pending: PendingMap,
    mut shutdown_rx: mpsc::Receiver<()>,
) {
    let name = name.to_string();
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => {
                    debug!(server = %name, "MCP receive loop shutting down");
                    break;
                }
                result = transport.receive() => {
                    match result {
                        Ok(message) => {
                            if let Err(e) = route_message(&message, &pending).await {
                                error!(server = %name, "MCP message error: {}", e);
                            }
                        }
                        Err(e) => {
                            error!(server = %name, "MCP receive error: {}", e);
                            let mut pending = pending.write().await;
                            for (_, tx) in pending.drain() {
                                let _ = tx.send(Err(anyhow!("Connection lost")));
                            }
                            break;
                        }
                    }
                }
            }
        }
    });
}

async fn route_message(message: &str, pending: &PendingMap) -> Result<()> {
    let response: McpResponse = serde_json::from_str(message)?;

    if let Some(id) = response.id {
        if let Some(tx) = pending.write().await.remove(&id) {
            if let Some(error) = response.error {
                let _ = tx.send(Err(anyhow!("MCP error {}: {}", error.code, error.message)));
            } else {
                let _ = tx.send(Ok(response.result.unwrap_or(Value::Null)));
            }
        }
        return Ok(());
    }

    if let Some(method) = &response.method {
        debug!(method, "Ignoring MCP notification");
    }
    Ok(())
}
