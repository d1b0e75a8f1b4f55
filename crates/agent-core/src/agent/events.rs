//! Engine → front-end event stream

use std::collections::HashMap;

use serde::Serialize;
use serde_json::Value;

use crate::ai::types::TokenUsage;
use crate::tools::{FileDiff, ToolResult};

/// Everything a front-end needs to render an agent run. Serialisable for
/// automation consumers.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AgentEvent {
    AgentStart {
        message: String,
    },
    TextDelta {
        content: String,
    },
    TextComplete {
        content: String,
    },
    ToolCallStart {
        call_id: String,
        name: String,
        args: Value,
    },
    ToolCallComplete {
        call_id: String,
        name: String,
        success: bool,
        output: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
        #[serde(skip_serializing_if = "HashMap::is_empty")]
        metadata: HashMap<String, Value>,
        #[serde(skip_serializing_if = "Option::is_none")]
        diff: Option<FileDiff>,
        truncated: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        exit_code: Option<i32>,
    },
    AgentError {
        error: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        details: Option<String>,
    },
    AgentEnd {
        #[serde(skip_serializing_if = "Option::is_none")]
        response: Option<String>,
        usage: TokenUsage,
    },
}

impl AgentEvent {
    /// Build the completion event from a tool result.
    pub fn tool_call_complete(call_id: String, name: String, result: &ToolResult) -> Self {
        AgentEvent::ToolCallComplete {
            call_id,
            name,
            success: result.success,
            output: result.output.clone(),
            error: result.error.clone(),
            metadata: result.metadata.clone(),
            diff: result.diff.clone(),
            truncated: result.truncated,
            exit_code: result.exit_code,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serialises_with_event_kind_tags() {
        let event = AgentEvent::AgentStart {
            message: "hi".into(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "AGENT_START");
        assert_eq!(json["message"], "hi");
    }

    #[test]
    fn tool_complete_carries_result_fields() {
        let result = ToolResult::error_with_output("boom", "partial").with_exit_code(2);
        let event = AgentEvent::tool_call_complete("c1".into(), "shell".into(), &result);
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "TOOL_CALL_COMPLETE");
        assert_eq!(json["success"], false);
        assert_eq!(json["error"], "boom");
        assert_eq!(json["exit_code"], 2);
    }
}
