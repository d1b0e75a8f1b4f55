//! Conversation context manager
//!
//! Tracks the message list and the immutable system prompt, counts tokens,
//! prunes stale tool output, and swaps the history for a summary stub when
//! the compactor runs.

use chrono::{DateTime, Utc};

use crate::ai::types::{ChatMessage, Role, TokenUsage, ToolCallRecord};

/// Compaction triggers at this fraction of the context window.
const COMPRESSION_THRESHOLD: f64 = 0.8;
/// Tool output inside this token tail (counted from the newest message) is
/// never pruned.
const PRUNE_PROTECT_TOKENS: usize = 40_000;
/// Pruning only happens when at least this many tokens would be cleared.
const PRUNE_MINIMUM_TOKENS: usize = 20_000;
const PRUNED_PLACEHOLDER: &str = "[Old tool result content cleared]";

/// Pluggable token counting. The default estimator assumes ~4 chars/token.
pub trait TokenCounter: Send + Sync {
    fn count(&self, text: &str) -> usize;
}

/// Chars/4 estimate, rounded up.
pub struct CharEstimator;

impl TokenCounter for CharEstimator {
    fn count(&self, text: &str) -> usize {
        text.chars().count().div_ceil(4)
    }
}

/// One tracked message with its token bookkeeping.
#[derive(Debug, Clone)]
pub struct ContextMessage {
    pub message: ChatMessage,
    pub token_count: usize,
    pub pruned_at: Option<DateTime<Utc>>,
}

/// Owns the running conversation for one session.
pub struct ContextManager {
    system_prompt: String,
    messages: Vec<ContextMessage>,
    counter: Box<dyn TokenCounter>,
    context_window: usize,
    latest_usage: TokenUsage,
    total_usage: TokenUsage,
}

impl ContextManager {
    pub fn new(system_prompt: String, context_window: usize) -> Self {
        Self::with_counter(system_prompt, context_window, Box::new(CharEstimator))
    }

    pub fn with_counter(
        system_prompt: String,
        context_window: usize,
        counter: Box<dyn TokenCounter>,
    ) -> Self {
        Self {
            system_prompt,
            messages: Vec::new(),
            counter,
            context_window,
            latest_usage: TokenUsage::default(),
            total_usage: TokenUsage::default(),
        }
    }

    pub fn system_prompt(&self) -> &str {
        &self.system_prompt
    }

    pub fn context_window(&self) -> usize {
        self.context_window
    }

    fn push(&mut self, message: ChatMessage) {
        let token_count = self.counter.count(message.content.as_deref().unwrap_or(""));
        self.messages.push(ContextMessage {
            message,
            token_count,
            pruned_at: None,
        });
    }

    pub fn add_user_message(&mut self, text: impl Into<String>) {
        self.push(ChatMessage::user(text.into()));
    }

    pub fn add_assistant_message(
        &mut self,
        text: Option<String>,
        tool_calls: Vec<ToolCallRecord>,
    ) {
        self.push(ChatMessage::assistant(text, tool_calls));
    }

    pub fn add_tool_result(&mut self, call_id: impl Into<String>, content: impl Into<String>) {
        self.push(ChatMessage::tool(call_id, content));
    }

    /// Provider-neutral view: the system prompt followed by every message.
    pub fn get_messages(&self) -> Vec<ChatMessage> {
        let mut out = Vec::with_capacity(self.messages.len() + 1);
        out.push(ChatMessage::system(self.system_prompt.clone()));
        out.extend(self.messages.iter().map(|m| m.message.clone()));
        out
    }

    /// Messages without the virtual system entry.
    pub fn raw_messages(&self) -> &[ContextMessage] {
        &self.messages
    }

    pub fn message_count(&self) -> usize {
        self.messages.len()
    }

    /// Replay a persisted wire-form message, preserving its role and
    /// tool-call pairing.
    pub fn replay_message(&mut self, message: ChatMessage) {
        self.push(message);
    }

    pub fn latest_usage(&self) -> TokenUsage {
        self.latest_usage
    }

    pub fn total_usage(&self) -> TokenUsage {
        self.total_usage
    }

    pub fn set_latest_usage(&mut self, usage: TokenUsage) {
        self.latest_usage = usage;
    }

    pub fn add_usage(&mut self, usage: &TokenUsage) {
        self.total_usage.add(usage);
    }

    pub fn set_total_usage(&mut self, usage: TokenUsage) {
        self.total_usage = usage;
    }

    /// True when the last completion reported usage near the window.
    pub fn needs_compression(&self) -> bool {
        self.latest_usage.total_tokens as f64 > COMPRESSION_THRESHOLD * self.context_window as f64
    }

    /// Replace the whole history with the three-message summary stub so the
    /// model unambiguously resumes at the next step.
    pub fn replace_with_summary(&mut self, summary: &str) {
        self.messages.clear();
        self.add_user_message(format!(
            "Here is a summary of the conversation so far:\n\n{}",
            summary
        ));
        self.add_assistant_message(
            Some("Understood. I have the summary and will continue from where we left off.".into()),
            Vec::new(),
        );
        self.add_user_message("Continue with the remaining work.");
    }

    /// Clear old tool output. Walks tool messages newest-first, protecting
    /// the most recent `PRUNE_PROTECT_TOKENS` worth; older candidates are
    /// cleared only when they add up to `PRUNE_MINIMUM_TOKENS` or more.
    /// Returns the number of tokens cleared.
    pub fn prune_tool_outputs(&mut self) -> usize {
        let mut tail_tokens = 0usize;
        let mut candidates: Vec<usize> = Vec::new();
        let mut candidate_tokens = 0usize;

        for (index, entry) in self.messages.iter().enumerate().rev() {
            if entry.message.role != Role::Tool {
                continue;
            }
            // Everything older than an already-pruned message was handled in
            // a previous pass.
            if entry.pruned_at.is_some() {
                break;
            }
            tail_tokens += entry.token_count;
            if tail_tokens > PRUNE_PROTECT_TOKENS {
                candidates.push(index);
                candidate_tokens += entry.token_count;
            }
        }

        if candidate_tokens < PRUNE_MINIMUM_TOKENS {
            return 0;
        }

        let now = Utc::now();
        let mut cleared = 0usize;
        for index in candidates {
            let entry = &mut self.messages[index];
            let new_count = self.counter.count(PRUNED_PLACEHOLDER);
            cleared += entry.token_count.saturating_sub(new_count);
            entry.message.content = Some(PRUNED_PLACEHOLDER.to_string());
            entry.token_count = new_count;
            entry.pruned_at = Some(now);
        }
        tracing::debug!(cleared_tokens = cleared, "Pruned old tool output");
        cleared
    }

    /// Sum of stored token counts; used for accounting checks.
    pub fn stored_tokens(&self) -> usize {
        self.messages.iter().map(|m| m.token_count).sum()
    }

    pub fn clear(&mut self) {
        self.messages.clear();
    }
}
