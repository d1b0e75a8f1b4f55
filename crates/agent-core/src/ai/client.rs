//! Streaming chat-completions client
//!
//! Talks to an OpenAI-compatible endpoint. Streaming calls return a channel
//! of `StreamEvent`s produced by a background task; rate limits and transient
//! connection errors are retried with exponential backoff before the stream
//! starts. The non-streaming `complete` call backs the compactor.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use futures::StreamExt;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::retry::{backoff_delay, is_retryable_status, MAX_RETRIES};
use super::streaming::{StreamAssembler, StreamEvent};
use super::types::{AiTool, ChatMessage, TokenUsage};

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

/// Provider seam for the turn loop and compactor. The engine only depends on
/// this trait; tests substitute a scripted provider.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Streaming chat completion with tool support. Transport failures
    /// surface as a single `StreamEvent::Error` on the returned channel.
    async fn chat_stream(
        &self,
        messages: Vec<ChatMessage>,
        tools: Vec<AiTool>,
    ) -> mpsc::UnboundedReceiver<StreamEvent>;

    /// Non-streaming completion; returns the single completion text.
    async fn complete(&self, messages: Vec<ChatMessage>) -> Result<(String, TokenUsage)>;
}

/// Connection settings for the HTTP client.
#[derive(Debug, Clone)]
pub struct LlmClientConfig {
    pub model: String,
    pub api_key: String,
    pub base_url: Option<String>,
    pub temperature: Option<f64>,
}

/// HTTP implementation of `LlmProvider`.
pub struct LlmClient {
    http: reqwest::Client,
    config: LlmClientConfig,
}

impl LlmClient {
    pub fn new(config: LlmClientConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            config,
        }
    }

    pub fn model(&self) -> &str {
        &self.config.model
    }

    fn endpoint(&self) -> String {
        let base = self
            .config
            .base_url
            .as_deref()
            .unwrap_or(DEFAULT_BASE_URL)
            .trim_end_matches('/');
        format!("{}/chat/completions", base)
    }

    fn build_body(&self, messages: &[ChatMessage], tools: &[AiTool], stream: bool) -> Value {
        let mut body = json!({
            "model": self.config.model,
            "messages": messages.iter().map(to_wire_message).collect::<Vec<_>>(),
            "stream": stream,
        });
        if stream {
            body["stream_options"] = json!({"include_usage": true});
        }
        if let Some(temperature) = self.config.temperature {
            body["temperature"] = json!(temperature);
        }
        if !tools.is_empty() {
            body["tools"] = Value::Array(
                tools
                    .iter()
                    .map(|t| {
                        json!({
                            "type": "function",
                            "function": {
                                "name": t.name,
                                "description": t.description,
                                "parameters": t.input_schema,
                            }
                        })
                    })
                    .collect(),
            );
            body["tool_choice"] = json!("auto");
        }
        body
    }

    /// Send the request, retrying rate limits and transient connect errors.
    async fn send_with_retry(&self, body: &Value) -> Result<reqwest::Response> {
        let mut attempt = 0usize;
        loop {
            let result = self
                .http
                .post(self.endpoint())
                .bearer_auth(&self.config.api_key)
                .json(body)
                .send()
                .await;

            match result {
                Ok(response) if response.status().is_success() => return Ok(response),
                Ok(response) => {
                    let status = response.status();
                    if is_retryable_status(status.as_u16()) && attempt < MAX_RETRIES {
                        let delay = backoff_delay(attempt);
                        warn!(
                            attempt = attempt + 1,
                            status = status.as_u16(),
                            delay_secs = delay.as_secs(),
                            "LLM request failed, retrying"
                        );
                        tokio::time::sleep(delay).await;
                        attempt += 1;
                        continue;
                    }
                    let detail = response
                        .text()
                        .await
                        .unwrap_or_else(|_| "Unknown error".to_string());
                    return Err(anyhow!("LLM API error {}: {}", status, detail));
                }
                // Connection-level failures are worth retrying; request
                // construction errors are not.
                Err(e) if (e.is_connect() || e.is_timeout()) && attempt < MAX_RETRIES => {
                    let delay = backoff_delay(attempt);
                    warn!(
                        attempt = attempt + 1,
                        delay_secs = delay.as_secs(),
                        "LLM connection failed, retrying: {}",
                        e
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(anyhow!(e).context("LLM request failed")),
            }
        }
    }
}

#[async_trait]
impl LlmProvider for LlmClient {
    async fn chat_stream(
        &self,
        messages: Vec<ChatMessage>,
        tools: Vec<AiTool>,
    ) -> mpsc::UnboundedReceiver<StreamEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        let body = self.build_body(&messages, &tools, true);
        info!(
            model = %self.config.model,
            messages = messages.len(),
            tools = tools.len(),
            "Starting streaming LLM call"
        );

        let response = match self.send_with_retry(&body).await {
            Ok(response) => response,
            Err(e) => {
                let _ = tx.send(StreamEvent::Error {
                    error: e.to_string(),
                });
                return rx;
            }
        };

        tokio::spawn(async move {
            let mut assembler = StreamAssembler::new();
            let mut buffer = String::new();
            let mut stream = response.bytes_stream();
            let mut failed = false;

            'read: while let Some(chunk) = stream.next().await {
                let bytes = match chunk {
                    Ok(bytes) => bytes,
                    Err(e) => {
                        let _ = tx.send(StreamEvent::Error {
                            error: format!("LLM stream read error: {}", e),
                        });
                        failed = true;
                        break;
                    }
                };
                buffer.push_str(&String::from_utf8_lossy(&bytes));

                while let Some(newline) = buffer.find('\n') {
                    let line = buffer[..newline].trim().to_string();
                    buffer.drain(..=newline);

                    let Some(data) = line.strip_prefix("data:") else {
                        continue;
                    };
                    let data = data.trim();
                    if data == "[DONE]" {
                        break 'read;
                    }
                    match serde_json::from_str::<Value>(data) {
                        Ok(json) => {
                            for event in assembler.process_chunk(&json) {
                                let _ = tx.send(event);
                            }
                        }
                        Err(e) => debug!("Skipping unparseable stream line: {}", e),
                    }
                }
            }

            if !failed {
                for event in assembler.finish() {
                    let _ = tx.send(event);
                }
            }
        });

        rx
    }

    async fn complete(&self, messages: Vec<ChatMessage>) -> Result<(String, TokenUsage)> {
        let body = self.build_body(&messages, &[], false);
        let response = self.send_with_retry(&body).await?;
        let json: Value = response
            .json()
            .await
            .context("Failed to parse LLM response")?;

        let text = json
            .get("choices")
            .and_then(|c| c.as_array())
            .and_then(|c| c.first())
            .and_then(|c| c.get("message"))
            .and_then(|m| m.get("content"))
            .and_then(|t| t.as_str())
            .unwrap_or("")
            .to_string();

        let usage = json
            .get("usage")
            .map(|u| {
                let prompt = u.get("prompt_tokens").and_then(|t| t.as_u64()).unwrap_or(0) as usize;
                let completion = u
                    .get("completion_tokens")
                    .and_then(|t| t.as_u64())
                    .unwrap_or(0) as usize;
                TokenUsage {
                    prompt_tokens: prompt,
                    completion_tokens: completion,
                    total_tokens: prompt + completion,
                    cached_tokens: 0,
                }
            })
            .unwrap_or_default();

        Ok((text, usage))
    }
}

/// Convert a neutral message to the chat-completions wire shape.
fn to_wire_message(message: &ChatMessage) -> Value {
    let mut wire = json!({"role": message.role.as_str()});
    wire["content"] = match &message.content {
        Some(content) => Value::String(content.clone()),
        None => Value::Null,
    };
    if let Some(tool_calls) = &message.tool_calls {
        wire["tool_calls"] = Value::Array(
            tool_calls
                .iter()
                .map(|call| {
                    json!({
                        "id": call.id,
                        "type": "function",
                        "function": {
                            "name": call.name,
                            "arguments": call.arguments.to_string(),
                        }
                    })
                })
                .collect(),
        );
    }
    if let Some(call_id) = &message.tool_call_id {
        wire["tool_call_id"] = json!(call_id);
    }
    wire
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ai::types::ToolCallRecord;

    fn test_client() -> LlmClient {
        LlmClient::new(LlmClientConfig {
            model: "test-model".into(),
            api_key: "sk-test".into(),
            base_url: Some("http://localhost:9".into()),
            temperature: Some(0.2),
        })
    }

    #[test]
    fn endpoint_appends_chat_completions() {
        let client = test_client();
        assert_eq!(client.endpoint(), "http://localhost:9/chat/completions");
    }

    #[test]
    fn body_includes_tools_and_stream_options() {
        let client = test_client();
        let tools = vec![AiTool {
            name: "read_file".into(),
            description: "Read a file".into(),
            input_schema: json!({"type": "object"}),
        }];
        let body = client.build_body(&[ChatMessage::user("hi")], &tools, true);
        assert_eq!(body["tool_choice"], "auto");
        assert_eq!(body["tools"][0]["function"]["name"], "read_file");
        assert_eq!(body["stream_options"]["include_usage"], true);
        assert_eq!(body["temperature"], 0.2);
    }

    #[test]
    fn wire_message_serialises_tool_calls_as_strings() {
        let msg = ChatMessage::assistant(
            None,
            vec![ToolCallRecord {
                id: "call_9".into(),
                name: "shell".into(),
                arguments: json!({"command": "ls"}),
            }],
        );
        let wire = to_wire_message(&msg);
        assert_eq!(wire["content"], Value::Null);
        assert_eq!(wire["tool_calls"][0]["id"], "call_9");
        let args = wire["tool_calls"][0]["function"]["arguments"]
            .as_str()
            .unwrap();
        assert_eq!(
            serde_json::from_str::<Value>(args).unwrap(),
            json!({"command": "ls"})
        );
    }

    #[test]
    fn wire_message_sets_tool_call_id() {
        let wire = to_wire_message(&ChatMessage::tool("call_1", "output"));
        assert_eq!(wire["role"], "tool");
        assert_eq!(wire["tool_call_id"], "call_1");
    }
}
