//! The agent turn loop
//!
//! One `run` call drives the model until it answers with plain text, the
//! turn cap is hit, or the transport gives up. Within a turn the assistant
//! message (with its tool-call records) is appended to the context before
//! any call is dispatched; calls execute serially in arrival order and
//! their results are appended in the same order, so the conversation stays
//! linearisable. Usage accounting and pruning run at the end of every turn.

use std::path::Path;

use tokio::sync::mpsc;

use crate::ai::client::LlmProvider;
use crate::ai::streaming::StreamEvent;
use crate::ai::types::ToolCallRecord;
use crate::approval::ApprovalManager;
use crate::compact::Compactor;
use crate::context::ContextManager;
use crate::hooks::HookSystem;
use crate::loopdetect::LoopDetector;
use crate::tools::ToolRegistry;

use super::events::AgentEvent;

/// Everything one run of the loop borrows from its session.
pub struct TurnLoop<'a> {
    pub provider: &'a dyn LlmProvider,
    pub registry: &'a ToolRegistry,
    pub hooks: &'a HookSystem,
    pub approval: &'a ApprovalManager,
    pub context: &'a mut ContextManager,
    pub loop_detector: &'a mut LoopDetector,
    pub working_dir: &'a Path,
    pub max_turns: usize,
}

/// The corrective message injected when the loop detector fires.
fn loop_breaker_prompt(reason: &str) -> String {
    format!(
        "You appear to be stuck: {}. Do not repeat the same action again. \
Re-read the task, state what you have learned so far, and take a different approach.",
        reason
    )
}

impl TurnLoop<'_> {
    /// Drive the loop for one user message. Emits events as they happen and
    /// returns the final assistant text, if any. `turn_count` is the
    /// session's cumulative counter.
    pub async fn run(
        mut self,
        user_message: &str,
        events: &mpsc::UnboundedSender<AgentEvent>,
        turn_count: &mut usize,
    ) -> Option<String> {
        self.hooks.before_agent(user_message).await;
        let _ = events.send(AgentEvent::AgentStart {
            message: user_message.to_string(),
        });
        self.context.add_user_message(user_message);

        let mut final_response: Option<String> = None;
        let mut completed = false;

        for _turn in 1..=self.max_turns {
            *turn_count += 1;

            if self.context.needs_compression() {
                let (summary, usage) = Compactor::compress(self.provider, self.context).await;
                if let Some(summary) = summary {
                    self.context.replace_with_summary(&summary);
                    if let Some(usage) = usage {
                        self.context.set_latest_usage(usage);
                        self.context.add_usage(&usage);
                    }
                }
            }

            let schemas = self.registry.schemas().await;
            let mut stream = self
                .provider
                .chat_stream(self.context.get_messages(), schemas)
                .await;

            let mut response_text = String::new();
            let mut tool_calls: Vec<ToolCallRecord> = Vec::new();
            let mut usage = None;
            let mut transport_failed = false;

            while let Some(event) = stream.recv().await {
                match event {
                    StreamEvent::TextDelta { text } => {
                        response_text.push_str(&text);
                        let _ = events.send(AgentEvent::TextDelta { content: text });
                    }
                    StreamEvent::ToolCallComplete { call } => tool_calls.push(call),
                    StreamEvent::MessageComplete {
                        usage: message_usage,
                        ..
                    } => usage = message_usage,
                    StreamEvent::Error { error } => {
                        let _ = events.send(AgentEvent::AgentError {
                            error: error.clone(),
                            details: None,
                        });
                        self.hooks.on_error(&error).await;
                        transport_failed = true;
                    }
                    // Partial tool-call deltas only matter to the assembler.
                    StreamEvent::ToolCallStart { .. } | StreamEvent::ToolCallDelta { .. } => {}
                }
            }

            if !response_text.is_empty() || !tool_calls.is_empty() {
                self.context
                    .add_assistant_message(none_if_empty(&response_text), tool_calls.clone());
            }

            if !response_text.is_empty() {
                let _ = events.send(AgentEvent::TextComplete {
                    content: response_text.clone(),
                });
                self.loop_detector.record_response(&response_text);
                final_response = Some(response_text);
            }

            if transport_failed {
                self.finish_turn(usage);
                completed = true;
                break;
            }

            if tool_calls.is_empty() {
                self.finish_turn(usage);
                completed = true;
                break;
            }

            for call in &tool_calls {
                let _ = events.send(AgentEvent::ToolCallStart {
                    call_id: call.id.clone(),
                    name: call.name.clone(),
                    args: call.arguments.clone(),
                });
                self.loop_detector
                    .record_tool_call(&call.name, &call.arguments);

                let result = self
                    .registry
                    .invoke(
                        &call.name,
                        call.arguments.clone(),
                        self.working_dir,
                        self.hooks,
                        Some(self.approval),
                    )
                    .await;

                let _ = events.send(AgentEvent::tool_call_complete(
                    call.id.clone(),
                    call.name.clone(),
                    &result,
                ));
                self.context
                    .add_tool_result(call.id.clone(), result.to_model_output());
            }

            if let Some(reason) = self.loop_detector.check_for_loop() {
                tracing::info!(reason = %reason, "Loop detected, injecting corrective message");
                self.context.add_user_message(loop_breaker_prompt(&reason));
            }

            self.finish_turn(usage);
        }

        if !completed {
            let error = format!("Maximum turns ({}) reached", self.max_turns);
            let _ = events.send(AgentEvent::AgentError {
                error: error.clone(),
                details: None,
            });
            self.hooks.on_error(&error).await;
        }

        self.hooks
            .after_agent(user_message, final_response.as_deref().unwrap_or(""))
            .await;
        let _ = events.send(AgentEvent::AgentEnd {
            response: final_response.clone(),
            usage: self.context.total_usage(),
        });

        final_response
    }

    /// End-of-turn bookkeeping: usage, then pruning.
    fn finish_turn(&mut self, usage: Option<crate::ai::types::TokenUsage>) {
        if let Some(usage) = usage {
            self.context.set_latest_usage(usage);
            self.context.add_usage(&usage);
        }
        self.context.prune_tool_outputs();
    }
}

fn none_if_empty(text: &str) -> Option<String> {
    if text.is_empty() {
        None
    } else {
        Some(text.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ai::types::{AiTool, ChatMessage, Role, TokenUsage};
    use crate::approval::ApprovalPolicy;
    use crate::tools::{Tool, ToolInvocation, ToolKind, ToolResult};
    use anyhow::Result;
    use async_trait::async_trait;
    use serde_json::{json, Value};
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    /// Scripted provider: each call pops the next canned turn.
    struct ScriptedProvider {
        turns: Mutex<Vec<Vec<StreamEvent>>>,
        seen_messages: Mutex<Vec<Vec<ChatMessage>>>,
    }

    impl ScriptedProvider {
        fn new(turns: Vec<Vec<StreamEvent>>) -> Self {
            Self {
                turns: Mutex::new(turns),
                seen_messages: Mutex::new(Vec::new()),
            }
        }

        fn text_turn(text: &str) -> Vec<StreamEvent> {
            vec![
                StreamEvent::TextDelta { text: text.into() },
                StreamEvent::MessageComplete {
                    finish_reason: None,
                    usage: Some(TokenUsage {
                        prompt_tokens: 10,
                        completion_tokens: 5,
                        total_tokens: 15,
                        cached_tokens: 0,
                    }),
                },
            ]
        }

        fn tool_turn(id: &str, name: &str, args: Value) -> Vec<StreamEvent> {
            vec![
                StreamEvent::ToolCallComplete {
                    call: ToolCallRecord {
                        id: id.into(),
                        name: name.into(),
                        arguments: args,
                    },
                },
                StreamEvent::MessageComplete {
                    finish_reason: None,
                    usage: Some(TokenUsage {
                        prompt_tokens: 10,
                        completion_tokens: 5,
                        total_tokens: 15,
                        cached_tokens: 0,
                    }),
                },
            ]
        }
    }

    #[async_trait]
    impl LlmProvider for ScriptedProvider {
        async fn chat_stream(
            &self,
            messages: Vec<ChatMessage>,
            _tools: Vec<AiTool>,
        ) -> mpsc::UnboundedReceiver<StreamEvent> {
            self.seen_messages.lock().unwrap().push(messages);
            let (tx, rx) = mpsc::unbounded_channel();
            let turn = {
                let mut turns = self.turns.lock().unwrap();
                if turns.is_empty() {
                    Vec::new()
                } else {
                    turns.remove(0)
                }
            };
            for event in turn {
                let _ = tx.send(event);
            }
            rx
        }

        async fn complete(&self, _messages: Vec<ChatMessage>) -> Result<(String, TokenUsage)> {
            Ok(("summary".into(), TokenUsage::default()))
        }
    }

    static READS: AtomicUsize = AtomicUsize::new(0);

    struct FakeReadTool;

    #[async_trait]
    impl Tool for FakeReadTool {
        fn name(&self) -> &str {
            "read_file"
        }
        fn description(&self) -> &str {
            "fake"
        }
        fn kind(&self) -> ToolKind {
            ToolKind::Read
        }
        fn schema(&self) -> Value {
            json!({
                "type": "object",
                "properties": {"path": {"type": "string"}},
                "required": ["path"]
            })
        }
        async fn execute(&self, _invocation: ToolInvocation) -> ToolResult {
            READS.fetch_add(1, Ordering::SeqCst);
            ToolResult::success("hello world")
        }
    }

    struct Harness {
        registry: Arc<ToolRegistry>,
        hooks: HookSystem,
        approval: ApprovalManager,
        context: ContextManager,
        loop_detector: LoopDetector,
    }

    impl Harness {
        async fn new() -> Self {
            let registry = Arc::new(ToolRegistry::new());
            registry.register(Arc::new(FakeReadTool)).await;
            Self {
                registry,
                hooks: HookSystem::disabled(),
                approval: ApprovalManager::new(ApprovalPolicy::OnRequest),
                context: ContextManager::new("system".into(), 100_000),
                loop_detector: LoopDetector::new(),
            }
        }

        async fn run(
            &mut self,
            provider: &dyn LlmProvider,
            message: &str,
        ) -> (Option<String>, Vec<AgentEvent>, usize) {
            let (tx, mut rx) = mpsc::unbounded_channel();
            let mut turn_count = 0;
            let turn_loop = TurnLoop {
                provider,
                registry: &self.registry,
                hooks: &self.hooks,
                approval: &self.approval,
                context: &mut self.context,
                loop_detector: &mut self.loop_detector,
                working_dir: Path::new("/tmp"),
                max_turns: 10,
            };
            let response = turn_loop.run(message, &tx, &mut turn_count).await;
            drop(tx);
            let mut events = Vec::new();
            while let Some(event) = rx.recv().await {
                events.push(event);
            }
            (response, events, turn_count)
        }
    }

    fn event_kinds(events: &[AgentEvent]) -> Vec<&'static str> {
        events
            .iter()
            .map(|e| match e {
                AgentEvent::AgentStart { .. } => "start",
                AgentEvent::TextDelta { .. } => "delta",
                AgentEvent::TextComplete { .. } => "text",
                AgentEvent::ToolCallStart { .. } => "tool_start",
                AgentEvent::ToolCallComplete { .. } => "tool_complete",
                AgentEvent::AgentError { .. } => "error",
                AgentEvent::AgentEnd { .. } => "end",
            })
            .collect()
    }

    #[tokio::test]
    async fn text_only_turn_ends_the_run() {
        let provider = ScriptedProvider::new(vec![ScriptedProvider::text_turn("hello")]);
        let mut harness = Harness::new().await;
        let (response, events, turns) = harness.run(&provider, "hi").await;

        assert_eq!(response.as_deref(), Some("hello"));
        assert_eq!(turns, 1);
        assert_eq!(
            event_kinds(&events),
            vec!["start", "delta", "text", "end"]
        );
        // Conversation: user + assistant.
        assert_eq!(harness.context.message_count(), 2);
        let AgentEvent::AgentEnd { response, .. } = events.last().unwrap() else {
            panic!("expected AgentEnd");
        };
        assert_eq!(response.as_deref(), Some("hello"));
    }

    #[tokio::test]
    async fn single_tool_call_round_trip() {
        READS.store(0, Ordering::SeqCst);
        let provider = ScriptedProvider::new(vec![
            ScriptedProvider::tool_turn("call_1", "read_file", json!({"path": "README.md"})),
            ScriptedProvider::text_turn("done"),
        ]);
        let mut harness = Harness::new().await;
        let (response, events, turns) = harness.run(&provider, "read it").await;

        assert_eq!(response.as_deref(), Some("done"));
        assert_eq!(turns, 2);
        assert_eq!(READS.load(Ordering::SeqCst), 1);
        assert_eq!(
            event_kinds(&events),
            vec!["start", "tool_start", "tool_complete", "delta", "text", "end"]
        );

        // The second request must include the tool message with the output.
        let seen = provider.seen_messages.lock().unwrap();
        let second = &seen[1];
        let tool_message = second.iter().find(|m| m.role == Role::Tool).unwrap();
        assert_eq!(tool_message.content.as_deref(), Some("hello world"));
        assert_eq!(tool_message.tool_call_id.as_deref(), Some("call_1"));

        // Tool-call records and tool results pair up 1:1.
        let assistant_calls: usize = second
            .iter()
            .filter_map(|m| m.tool_calls.as_ref())
            .map(|c| c.len())
            .sum();
        let tool_results = second.iter().filter(|m| m.role == Role::Tool).count();
        assert_eq!(assistant_calls, tool_results);
    }

    #[tokio::test]
    async fn rejected_tool_result_reaches_the_model() {
        struct ShellStub;
        #[async_trait]
        impl Tool for ShellStub {
            fn name(&self) -> &str {
                "shell"
            }
            fn description(&self) -> &str {
                "stub"
            }
            fn kind(&self) -> ToolKind {
                ToolKind::Shell
            }
            fn schema(&self) -> Value {
                json!({"type": "object", "properties": {"command": {"type": "string"}}})
            }
            fn confirmation(
                &self,
                invocation: &ToolInvocation,
            ) -> Option<crate::tools::ToolConfirmation> {
                let command = invocation.arg_str("command")?.to_string();
                let mut c = crate::tools::ToolConfirmation::new(
                    self.name(),
                    invocation.arguments.clone(),
                    "run",
                );
                c.command = Some(command);
                Some(c)
            }
            async fn execute(&self, _invocation: ToolInvocation) -> ToolResult {
                ToolResult::success("should never run")
            }
        }

        let provider = ScriptedProvider::new(vec![
            ScriptedProvider::tool_turn("call_1", "shell", json!({"command": "rm -rf /"})),
            ScriptedProvider::text_turn("understood"),
        ]);
        let mut harness = Harness::new().await;
        harness.registry.register(Arc::new(ShellStub)).await;

        let (_, events, _) = harness.run(&provider, "clean up").await;
        let complete = events
            .iter()
            .find_map(|e| match e {
                AgentEvent::ToolCallComplete { success, error, .. } => {
                    Some((*success, error.clone()))
                }
                _ => None,
            })
            .unwrap();
        assert!(!complete.0);
        assert_eq!(
            complete.1.as_deref(),
            Some("Operation rejected by safety policy")
        );

        // The model sees the rejection as a tool message.
        let seen = provider.seen_messages.lock().unwrap();
        let tool_message = seen[1].iter().find(|m| m.role == Role::Tool).unwrap();
        assert!(tool_message
            .content
            .as_ref()
            .unwrap()
            .contains("Operation rejected by safety policy"));
    }

    #[tokio::test]
    async fn loop_breaker_injected_after_three_identical_calls() {
        let grep_call =
            || ScriptedProvider::tool_turn("c", "read_file", json!({"path": "same.txt"}));
        let provider = ScriptedProvider::new(vec![
            grep_call(),
            grep_call(),
            grep_call(),
            ScriptedProvider::text_turn("breaking out"),
        ]);
        let mut harness = Harness::new().await;
        let (_, _, turns) = harness.run(&provider, "search").await;
        assert_eq!(turns, 4);

        // The fourth request's history includes the corrective user message.
        let seen = provider.seen_messages.lock().unwrap();
        let fourth = &seen[3];
        assert!(fourth.iter().any(|m| {
            m.role == Role::User
                && m.content
                    .as_deref()
                    .is_some_and(|c| c.contains("You appear to be stuck"))
        }));
    }

    #[tokio::test]
    async fn max_turns_emits_agent_error() {
        // Provider that always asks for another tool call.
        let turns: Vec<Vec<StreamEvent>> = (0..20)
            .map(|i| {
                ScriptedProvider::tool_turn(
                    &format!("call_{}", i),
                    "read_file",
                    json!({ "path": format!("f{}", i) }),
                )
            })
            .collect();
        let provider = ScriptedProvider::new(turns);
        let mut harness = Harness::new().await;
        let (response, events, turn_count) = harness.run(&provider, "go").await;

        assert_eq!(turn_count, 10);
        assert!(response.is_none());
        assert!(events.iter().any(|e| matches!(
            e,
            AgentEvent::AgentError { error, .. } if error == "Maximum turns (10) reached"
        )));
        assert!(matches!(events.last(), Some(AgentEvent::AgentEnd { .. })));
    }

    #[tokio::test]
    async fn transport_error_ends_the_run() {
        let provider = ScriptedProvider::new(vec![vec![StreamEvent::Error {
            error: "LLM API error 500".into(),
        }]]);
        let mut harness = Harness::new().await;
        let (response, events, _) = harness.run(&provider, "hi").await;

        assert!(response.is_none());
        assert!(events
            .iter()
            .any(|e| matches!(e, AgentEvent::AgentError { .. })));
        assert!(matches!(events.last(), Some(AgentEvent::AgentEnd { .. })));
    }

    #[tokio::test]
    async fn usage_accumulates_across_turns() {
        let provider = ScriptedProvider::new(vec![
            ScriptedProvider::tool_turn("call_1", "read_file", json!({"path": "a"})),
            ScriptedProvider::text_turn("done"),
        ]);
        let mut harness = Harness::new().await;
        harness.run(&provider, "go").await;
        assert_eq!(harness.context.total_usage().total_tokens, 30);
        assert_eq!(harness.context.latest_usage().total_tokens, 15);
    }

    #[tokio::test]
    async fn compaction_replaces_history_when_near_window() {
        let provider = ScriptedProvider::new(vec![ScriptedProvider::text_turn("after compact")]);
        let mut harness = Harness::new().await;
        // Fill some history and force latest usage over 80% of the window.
        harness.context.add_user_message("old message");
        harness
            .context
            .add_assistant_message(Some("old reply".into()), Vec::new());
        harness.context.set_latest_usage(TokenUsage {
            total_tokens: 85_000,
            ..Default::default()
        });

        harness.run(&provider, "next step").await;

        // Stub (3) + the new user message + the new assistant answer.
        let messages = harness.context.get_messages();
        assert!(messages
            .iter()
            .any(|m| m.content.as_deref().is_some_and(|c| c.contains("summary"))));
        assert_eq!(harness.context.message_count(), 5);
    }
}
