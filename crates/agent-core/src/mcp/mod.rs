//! MCP supervision
//!
//! External tool providers speak the Model Context Protocol over stdio or
//! HTTP. The manager owns client lifecycles: parallel startup connects,
//! a periodic health sweep with reconnects, and namespaced registration of
//! advertised tools into the registry.

pub mod client;
pub mod manager;
pub mod protocol;
pub mod tool;
pub mod transport;

pub use client::{McpClient, McpStatus};
pub use manager::{McpManager, McpServerInfo};
pub use protocol::McpToolDef;
