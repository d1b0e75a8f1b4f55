//! Streaming event protocol and tool-call assembly
//!
//! `StreamAssembler` consumes chat-completions stream chunks and turns them
//! into `StreamEvent`s: text deltas as they arrive, tool calls accumulated
//! per index and completed when the stream ends.

use std::collections::BTreeMap;

use serde_json::Value;

use super::types::{FinishReason, TokenUsage, ToolCallRecord};

/// Event stream produced by an LLM call.
#[derive(Debug, Clone)]
pub enum StreamEvent {
    TextDelta {
        text: String,
    },
    ToolCallStart {
        id: String,
        name: String,
    },
    ToolCallDelta {
        id: String,
        delta: String,
    },
    ToolCallComplete {
        call: ToolCallRecord,
    },
    /// Always the last event of a successful stream, even after retries.
    MessageComplete {
        finish_reason: Option<FinishReason>,
        usage: Option<TokenUsage>,
    },
    Error {
        error: String,
    },
}

/// Accumulates one tool call across argument deltas.
#[derive(Debug)]
struct ToolCallAccumulator {
    id: String,
    name: String,
    arguments: String,
}

impl ToolCallAccumulator {
    fn finish(self) -> ToolCallRecord {
        // Malformed argument JSON is preserved for the model to see rather
        // than dropped.
        let arguments = if self.arguments.trim().is_empty() {
            Value::Object(Default::default())
        } else {
            serde_json::from_str(&self.arguments)
                .unwrap_or_else(|_| serde_json::json!({ "raw_arguments": self.arguments }))
        };
        ToolCallRecord {
            id: self.id,
            name: self.name,
            arguments,
        }
    }
}

/// Per-stream assembly state for chat-completions chunks.
#[derive(Debug, Default)]
pub struct StreamAssembler {
    accumulators: BTreeMap<usize, ToolCallAccumulator>,
    finish_reason: Option<FinishReason>,
    usage: Option<TokenUsage>,
}

impl StreamAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Process one parsed stream chunk, returning the events it produced.
    pub fn process_chunk(&mut self, json: &Value) -> Vec<StreamEvent> {
        let mut events = Vec::new();

        if let Some(choice) = json
            .get("choices")
            .and_then(|c| c.as_array())
            .and_then(|c| c.first())
        {
            if let Some(reason) = choice.get("finish_reason").and_then(|r| r.as_str()) {
                self.finish_reason = Some(FinishReason::parse(reason));
            }

            if let Some(delta) = choice.get("delta") {
                if let Some(text) = delta.get("content").and_then(|c| c.as_str()) {
                    if !text.is_empty() {
                        events.push(StreamEvent::TextDelta {
                            text: text.to_string(),
                        });
                    }
                }

                for tool_call in delta
                    .get("tool_calls")
                    .and_then(|t| t.as_array())
                    .into_iter()
                    .flatten()
                {
                    let index =
                        tool_call.get("index").and_then(|i| i.as_u64()).unwrap_or(0) as usize;
                    let function = tool_call.get("function");

                    if let Some(name) = function
                        .and_then(|f| f.get("name"))
                        .and_then(|n| n.as_str())
                    {
                        // New index: a tool call is starting.
                        let id = tool_call
                            .get("id")
                            .and_then(|i| i.as_str())
                            .unwrap_or("")
                            .to_string();
                        events.push(StreamEvent::ToolCallStart {
                            id: id.clone(),
                            name: name.to_string(),
                        });
                        self.accumulators.insert(
                            index,
                            ToolCallAccumulator {
                                id,
                                name: name.to_string(),
                                arguments: String::new(),
                            },
                        );
                    }

                    if let Some(args) = function
                        .and_then(|f| f.get("arguments"))
                        .and_then(|a| a.as_str())
                    {
                        if !args.is_empty() {
                            if let Some(acc) = self.accumulators.get_mut(&index) {
                                acc.arguments.push_str(args);
                                events.push(StreamEvent::ToolCallDelta {
                                    id: acc.id.clone(),
                                    delta: args.to_string(),
                                });
                            }
                        }
                    }
                }
            }
        }

        if let Some(usage) = json.get("usage") {
            let prompt = usage
                .get("prompt_tokens")
                .and_then(|t| t.as_u64())
                .unwrap_or(0) as usize;
            let completion = usage
                .get("completion_tokens")
                .and_then(|t| t.as_u64())
                .unwrap_or(0) as usize;
            let cached = usage
                .get("prompt_tokens_details")
                .and_then(|d| d.get("cached_tokens"))
                .and_then(|t| t.as_u64())
                .unwrap_or(0) as usize;
            if prompt > 0 || completion > 0 {
                self.usage = Some(TokenUsage {
                    prompt_tokens: prompt,
                    completion_tokens: completion,
                    total_tokens: prompt + completion,
                    cached_tokens: cached,
                });
            }
        }

        events
    }

    /// Flush assembled tool calls and the final `MessageComplete`.
    pub fn finish(self) -> Vec<StreamEvent> {
        let mut events = Vec::new();
        for (_, acc) in self.accumulators {
            events.push(StreamEvent::ToolCallComplete { call: acc.finish() });
        }
        events.push(StreamEvent::MessageComplete {
            finish_reason: self.finish_reason,
            usage: self.usage,
        });
        events
    }
}
