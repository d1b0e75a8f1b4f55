//! LLM provider layer
//!
//! Provider-neutral message types, the streaming event protocol, and the
//! HTTP chat-completions client with retry.

pub mod client;
pub mod retry;
pub mod streaming;
pub mod types;

pub use client::{LlmClient, LlmClientConfig, LlmProvider};
pub use streaming::{StreamAssembler, StreamEvent};
pub use types::{AiTool, ChatMessage, FinishReason, Role, TokenUsage, ToolCallRecord};
