use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde_json::{json, Value};
use tracing::{debug, error, warn};

use crate::backoff::BackoffSchedule;
use crate::error::LlmError;
use crate::types::{ChatRequest, ChatResponse, ResponseFormat, Role, ToolCall};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Chat-completion port. The turn orchestrator and scorer depend on this
/// trait, never on the concrete provider client.
#[async_trait]
pub trait ChatCompletion: Send + Sync {
    async fn complete(&self, request: ChatRequest) -> Result<ChatResponse, LlmError>;
}

/// OpenAI-compatible chat-completions client.
///
/// Rate-limit and timeout failures retry on the chat backoff schedule
/// (1s/2s/4s, three attempts); other API errors abort immediately so the
/// caller can fall back.
pub struct OpenAiChatClient {
    client: Client,
    base_url: String,
    api_key: String,
    backoff: BackoffSchedule,
}

impl OpenAiChatClient {
    pub fn new(api_key: &str) -> Self {
        Self::with_base_url(api_key, "https://api.openai.com/v1")
    }

    pub fn with_base_url(api_key: &str, base_url: &str) -> Self {
        let client = Client::builder()
            .timeout(DEFAULT_TIMEOUT)
            .build()
            .unwrap_or_default();
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            backoff: BackoffSchedule::chat(),
        }
    }

    fn build_body(request: &ChatRequest) -> Value {
        let messages: Vec<Value> = request
            .messages
            .iter()
            .map(|message| {
                let mut entry = json!({
                    "role": match message.role {
                        Role::System => "system",
                        Role::User => "user",
                        Role::Assistant => "assistant",
                        Role::Tool => "tool",
                    },
                    "content": message.content,
                });
                if let Some(tool_calls) = &message.tool_calls {
                    entry["tool_calls"] = Value::Array(
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
                if let Some(tool_call_id) = &message.tool_call_id {
                    entry["tool_call_id"] = json!(tool_call_id);
                }
                entry
            })
            .collect();

        let mut body = json!({
            "model": request.model,
            "messages": messages,
            "temperature": request.temperature,
            "max_tokens": request.max_tokens,
        });

        if !request.tools.is_empty() {
            body["tools"] = Value::Array(
                request
                    .tools
                    .iter()
                    .map(|tool| {
                        json!({
                            "type": "function",
                            "function": {
                                "name": tool.name,
                                "description": tool.description,
                                "parameters": tool.parameters,
                            }
                        })
                    })
                    .collect(),
            );
            body["tool_choice"] = json!("auto");
        }

        if request.response_format == ResponseFormat::JsonObject {
            body["response_format"] = json!({ "type": "json_object" });
        }

        body
    }

    fn parse_response(value: Value) -> Result<ChatResponse, LlmError> {
        let message = value
            .pointer("/choices/0/message")
            .ok_or_else(|| LlmError::Api("response missing choices[0].message".to_string()))?;

        let content = message
            .get("content")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();

        let mut tool_calls = Vec::new();
        if let Some(raw_calls) = message.get("tool_calls").and_then(Value::as_array) {
            for raw in raw_calls {
                let id = raw.get("id").and_then(Value::as_str).unwrap_or_default();
                let name = raw
                    .pointer("/function/name")
                    .and_then(Value::as_str)
                    .unwrap_or_default();
                let arguments_raw = raw
                    .pointer("/function/arguments")
                    .and_then(Value::as_str)
                    .unwrap_or("{}");
                let arguments: Value = serde_json::from_str(arguments_raw)
                    .unwrap_or_else(|_| json!({ "raw": arguments_raw }));
                tool_calls.push(ToolCall {
                    id: id.to_string(),
                    name: name.to_string(),
                    arguments,
                });
            }
        }

        Ok(ChatResponse {
            content,
            tool_calls,
        })
    }

    async fn attempt(&self, body: &Value) -> Result<ChatResponse, LlmError> {
        let url = format!("{}/chat/completions", self.base_url);
        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    LlmError::Timeout(e.to_string())
                } else {
                    LlmError::Api(e.to_string())
                }
            })?;

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            let text = response.text().await.unwrap_or_default();
            return Err(LlmError::RateLimited(text));
        }
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(LlmError::Api(format!("{}: {}", status, text)));
        }

        let value: Value = response
            .json()
            .await
            .map_err(|e| LlmError::Api(format!("invalid response body: {}", e)))?;
        Self::parse_response(value)
    }
}

#[async_trait]
impl ChatCompletion for OpenAiChatClient {
    async fn complete(&self, request: ChatRequest) -> Result<ChatResponse, LlmError> {
        let body = Self::build_body(&request);
        let mut last_error = LlmError::Api("no attempts made".to_string());

        for attempt in 0..self.backoff.max_attempts() {
            debug!(
                "Chat completion attempt {}/{} for model {}",
                attempt + 1,
                self.backoff.max_attempts(),
                request.model
            );
            match self.attempt(&body).await {
                Ok(response) => return Ok(response),
                Err(err) if err.is_retryable() => {
                    let delay = self.backoff.delay_for(attempt);
                    warn!(
                        "Chat completion attempt {} failed ({}), retrying in {:?}",
                        attempt + 1,
                        err,
                        delay
                    );
                    last_error = err;
                    if attempt + 1 < self.backoff.max_attempts() {
                        tokio::time::sleep(delay).await;
                    }
                }
                Err(err) => {
                    error!("Chat completion failed without retry: {}", err);
                    return Err(err);
                }
            }
        }

        error!(
            "Chat completion exhausted {} attempts: {}",
            self.backoff.max_attempts(),
            last_error
        );
        Err(last_error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ChatMessage, ToolDefinition};

    #[test]
    fn body_carries_tools_and_format() {
        let request = ChatRequest::new("gpt-4o-mini", vec![ChatMessage::system("prompt")])
            .with_tools(vec![ToolDefinition {
                name: "check_availability".to_string(),
                description: "Check slots".to_string(),
                parameters: json!({"type": "object"}),
            }])
            .json_object();

        let body = OpenAiChatClient::build_body(&request);
        assert_eq!(body["tools"][0]["function"]["name"], "check_availability");
        assert_eq!(body["tool_choice"], "auto");
        assert_eq!(body["response_format"]["type"], "json_object");
    }

    #[test]
    fn tool_results_serialize_with_call_id() {
        let request = ChatRequest::new(
            "gpt-4o-mini",
            vec![ChatMessage::tool_result("preemptive_call", "{\"success\":true}")],
        );
        let body = OpenAiChatClient::build_body(&request);
        assert_eq!(body["messages"][0]["role"], "tool");
        assert_eq!(body["messages"][0]["tool_call_id"], "preemptive_call");
    }

    #[test]
    fn parses_tool_call_arguments_into_json() {
        let raw = json!({
            "choices": [{
                "message": {
                    "content": null,
                    "tool_calls": [{
                        "id": "call_1",
                        "type": "function",
                        "function": {
                            "name": "book_appointment",
                            "arguments": "{\"service_type\":\"botox\"}"
                        }
                    }]
                }
            }]
        });

        let parsed = OpenAiChatClient::parse_response(raw).unwrap();
        assert!(parsed.has_tool_calls());
        assert_eq!(parsed.tool_calls[0].name, "book_appointment");
        assert_eq!(parsed.tool_calls[0].arguments["service_type"], "botox");
    }
}
