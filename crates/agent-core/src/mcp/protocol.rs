//! MCP wire types (JSON-RPC 2.0)

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const PROTOCOL_VERSION: &str = "2024-11-05";

/// JSON-RPC request.
#[derive(Debug, Serialize)]
pub struct McpRequest {
    pub jsonrpc: &'static str,
    pub id: i64,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl McpRequest {
    pub fn new(id: i64, method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: "2.0",
            id,
            method: method.into(),
            params,
        }
    }
}

/// JSON-RPC response or server-initiated notification.
#[derive(Debug, Deserialize)]
pub struct McpResponse {
    pub id: Option<i64>,
    pub result: Option<Value>,
    pub error: Option<McpErrorBody>,
    #[serde(default)]
    pub method: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct McpErrorBody {
    pub code: i64,
    pub message: String,
}

/// Tool definition from `tools/list`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct McpToolDef {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(rename = "inputSchema")]
    pub input_schema: Value,
}

/// Initialize request params.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeParams {
    pub protocol_version: String,
    pub capabilities: Value,
    pub client_info: ClientInfo,
}

#[derive(Debug, Serialize)]
pub struct ClientInfo {
    pub name: String,
    pub version: String,
}

/// Initialize response.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeResult {
    pub protocol_version: String,
}

/// `tools/list` response.
#[derive(Debug, Deserialize)]
pub struct ToolsListResult {
    pub tools: Vec<McpToolDef>,
}

/// `tools/call` params.
#[derive(Debug, Serialize)]
pub struct ToolCallParams {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub arguments: Option<Value>,
}

/// Content blocks returned by MCP tools.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum McpContent {
    Text {
        text: String,
    },
    Image {
        #[serde(rename = "mimeType")]
        mime_type: String,
    },
    Resource {
        uri: String,
        #[serde(default)]
        text: Option<String>,
    },
}

impl std::fmt::Display for McpContent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            McpContent::Text { text } => write!(f, "{}", text),
            McpContent::Image { mime_type } => write!(f, "[Image: {}]", mime_type),
            McpContent::Resource { uri, text } => match text {
                Some(t) => write!(f, "{}\n{}", uri, t),
                None => write!(f, "{}", uri),
            },
        }
    }
}

/// `tools/call` response.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolCallResult {
    pub content: Vec<McpContent>,
    #[serde(default)]
    pub is_error: bool,
}

impl ToolCallResult {
    /// Join the content blocks into one displayable string.
    pub fn flatten(&self) -> String {
        self.content
            .iter()
            .map(|c| c.to_string())
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn request_serialises_jsonrpc_envelope() {
        let request = McpRequest::new(7, "tools/list", None);
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["jsonrpc"], "2.0");
        assert_eq!(json["id"], 7);
        assert!(json.get("params").is_none());
    }

    #[test]
    fn tool_def_reads_camel_case_schema() {
        let def: McpToolDef = serde_json::from_value(json!({
            "name": "lookup",
            "inputSchema": {"type": "object"}
        }))
        .unwrap();
        assert_eq!(def.name, "lookup");
        assert!(def.description.is_none());
    }

    #[test]
    fn call_result_flattens_content() {
        let result: ToolCallResult = serde_json::from_value(json!({
            "content": [
                {"type": "text", "text": "line one"},
                {"type": "resource", "uri": "file:///a", "text": "body"}
            ]
        }))
        .unwrap();
        assert_eq!(result.flatten(), "line one\nfile:///a\nbody");
        assert!(!result.is_error);
    }
}
