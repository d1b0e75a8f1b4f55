//! Context compaction
//!
//! When the conversation nears the context window, the history is flattened
//! into a single prompt and summarised with a non-streaming LLM call. The
//! agent continues uncompacted when summarisation fails.

use crate::ai::client::LlmProvider;
use crate::ai::types::{ChatMessage, Role, TokenUsage};
use crate::context::ContextManager;

const COMPRESSION_SYSTEM_PROMPT: &str = "You are a conversation summariser for a coding agent. \
Produce a dense, factual summary of the conversation below: the user's goal, what has been done \
so far, important file paths and their contents' key points, tool results that still matter, \
decisions made, and what remains to be done. Write it so the agent can resume work from the \
summary alone. Do not add commentary.";

const TOOL_TRUNCATE_CHARS: usize = 2_000;
const ASSISTANT_TRUNCATE_CHARS: usize = 3_000;
const USER_TRUNCATE_CHARS: usize = 1_500;
const SEPARATOR: &str = "\n\n---\n\n";

/// Summarises a near-full context.
pub struct Compactor;

impl Compactor {
    /// Returns `(summary, usage)`, or `(None, None)` when the call fails or
    /// produces nothing.
    pub async fn compress(
        provider: &dyn LlmProvider,
        context: &ContextManager,
    ) -> (Option<String>, Option<TokenUsage>) {
        let flattened = Self::flatten_history(context);
        if flattened.is_empty() {
            return (None, None);
        }

        let messages = vec![
            ChatMessage::system(COMPRESSION_SYSTEM_PROMPT),
            ChatMessage::user(flattened),
        ];

        match provider.complete(messages).await {
            Ok((summary, usage)) if !summary.trim().is_empty() => (Some(summary), Some(usage)),
            Ok(_) => {
                tracing::warn!("Compaction produced an empty summary; continuing uncompacted");
                (None, None)
            }
            Err(e) => {
                tracing::warn!("Compaction failed, continuing uncompacted: {}", e);
                (None, None)
            }
        }
    }

    /// Flatten the history with per-role truncation, joined by a separator.
    fn flatten_history(context: &ContextManager) -> String {
        let mut parts = Vec::new();
        for entry in context.raw_messages() {
            let content = entry.message.content.as_deref().unwrap_or("");
            let (label, limit) = match entry.message.role {
                Role::User => ("User", USER_TRUNCATE_CHARS),
                Role::Assistant => ("Assistant", ASSISTANT_TRUNCATE_CHARS),
                Role::Tool => ("Tool output", TOOL_TRUNCATE_CHARS),
                Role::System => continue,
            };
            let mut text = truncate_chars(content, limit);
            if let Some(tool_calls) = &entry.message.tool_calls {
                for call in tool_calls {
                    text.push_str(&format!("\n[called {}]", call.name));
                }
            }
            parts.push(format!("{}: {}", label, text));
        }
        parts.join(SEPARATOR)
    }
}

fn truncate_chars(text: &str, limit: usize) -> String {
    if text.chars().count() <= limit {
        return text.to_string();
    }
    let truncated: String = text.chars().take(limit).collect();
    format!("{}…", truncated)
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use async_trait::async_trait;
    use tokio::sync::mpsc;

    struct FixedSummaryProvider(Option<String>);

    #[async_trait]
    impl LlmProvider for FixedSummaryProvider {
        async fn chat_stream(
            &self,
            _messages: Vec<ChatMessage>,
            _tools: Vec<crate::ai::types::AiTool>,
        ) -> mpsc::UnboundedReceiver<crate::ai::streaming::StreamEvent> {
            let (_tx, rx) = mpsc::unbounded_channel();
            rx
        }

        async fn complete(&self, messages: Vec<ChatMessage>) -> Result<(String, TokenUsage)> {
            assert_eq!(messages.len(), 2);
            assert_eq!(messages[0].role, Role::System);
            match &self.0 {
                Some(summary) => Ok((
                    summary.clone(),
                    TokenUsage {
                        prompt_tokens: 100,
                        completion_tokens: 20,
                        total_tokens: 120,
                        cached_tokens: 0,
                    },
                )),
                None => anyhow::bail!("provider down"),
            }
        }
    }

    fn context_with_history() -> ContextManager {
        let mut ctx = ContextManager::new("system".into(), 1000);
        ctx.add_user_message("fix the bug");
        ctx.add_assistant_message(Some("looking".into()), Vec::new());
        ctx.add_tool_result("call_1", "x".repeat(5000));
        ctx
    }

    #[tokio::test]
    async fn returns_summary_and_usage() {
        let provider = FixedSummaryProvider(Some("the summary".into()));
        let (summary, usage) = Compactor::compress(&provider, &context_with_history()).await;
        assert_eq!(summary.as_deref(), Some("the summary"));
        assert_eq!(usage.unwrap().total_tokens, 120);
    }

    #[tokio::test]
    async fn failure_returns_none_pair() {
        let provider = FixedSummaryProvider(None);
        let (summary, usage) = Compactor::compress(&provider, &context_with_history()).await;
        assert!(summary.is_none());
        assert!(usage.is_none());
    }

    #[test]
    fn flatten_truncates_per_role() {
        let ctx = context_with_history();
        let flat = Compactor::flatten_history(&ctx);
        assert!(flat.contains("User: fix the bug"));
        assert!(flat.contains("Assistant: looking"));
        assert!(flat.contains(SEPARATOR.trim_start_matches('\n')));
        // The 5000-char tool output was cut to 2000 chars plus ellipsis.
        let tool_part = flat.split(SEPARATOR).last().unwrap();
        assert!(tool_part.chars().count() < 2100);
    }

    #[test]
    fn empty_history_flattens_empty() {
        let ctx = ContextManager::new("system".into(), 1000);
        assert!(Compactor::flatten_history(&ctx).is_empty());
    }
}
