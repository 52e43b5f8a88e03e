//! OpenAI-compatible HTTP chat model.
//!
//! Speaks the `/chat/completions` dialect over `reqwest` with rustls. The
//! engine treats every transport or 5xx failure as a provider error, which
//! the runtime retries as transient; the per-call soft timeout is enforced
//! here so a hung endpoint surfaces the same way.

use async_trait::async_trait;
use serde_json::{Value, json};
use std::time::Duration;

use super::AgentError;
use super::chat::{ChatMessage, ChatModel, ChatRequest, ChatResponse, ToolCall};

pub struct HttpChatModel {
    client: reqwest::Client,
    endpoint: String,
    model: String,
    credential: String,
    timeout: Duration,
}

impl HttpChatModel {
    /// Build a client for one endpoint/model pair. Does not connect.
    pub fn new(
        endpoint: &str,
        model: &str,
        credential: &str,
        timeout: Duration,
    ) -> Result<Self, AgentError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AgentError::Provider {
                provider: "http".to_string(),
                message: format!("client build: {e}"),
            })?;
        Ok(Self {
            client,
            endpoint: endpoint.trim_end_matches('/').to_string(),
            model: model.to_string(),
            credential: credential.to_string(),
            timeout,
        })
    }

    fn request_body(&self, request: &ChatRequest) -> Value {
        let messages: Vec<Value> = request
            .messages
            .iter()
            .map(|m| {
                let mut entry = json!({"role": m.role, "content": m.content});
                if !m.tool_calls.is_empty() {
                    entry["tool_calls"] = Value::Array(
                        m.tool_calls
                            .iter()
                            .map(|c| {
                                json!({
                                    "id": c.id,
                                    "type": "function",
                                    "function": {
                                        "name": c.name,
                                        "arguments": c.arguments.to_string(),
                                    },
                                })
                            })
                            .collect(),
                    );
                }
                if let Some(id) = &m.tool_call_id {
                    entry["tool_call_id"] = json!(id);
                }
                entry
            })
            .collect();

        let mut body = json!({"model": self.model, "messages": messages});
        if !request.tools.is_empty() {
            body["tools"] = Value::Array(
                request
                    .tools
                    .iter()
                    .map(|t| {
                        json!({
                            "type": "function",
                            "function": {
                                "name": t.name,
                                "description": t.description,
                                "parameters": t.parameters,
                            },
                        })
                    })
                    .collect(),
            );
        }
        body
    }

    fn parse_message(value: &Value) -> Result<ChatMessage, AgentError> {
        let message = value
            .pointer("/choices/0/message")
            .ok_or_else(|| AgentError::Provider {
                provider: "http".to_string(),
                message: "response carries no choices".to_string(),
            })?;

        let mut out = ChatMessage {
            role: message
                .get("role")
                .and_then(Value::as_str)
                .unwrap_or(ChatMessage::ASSISTANT)
                .to_string(),
            content: message
                .get("content")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            ..Default::default()
        };

        if let Some(calls) = message.get("tool_calls").and_then(Value::as_array) {
            for call in calls {
                let id = call.get("id").and_then(Value::as_str).unwrap_or_default();
                let name = call
                    .pointer("/function/name")
                    .and_then(Value::as_str)
                    .unwrap_or_default();
                let raw_args = call
                    .pointer("/function/arguments")
                    .and_then(Value::as_str)
                    .unwrap_or("{}");
                let arguments: Value =
                    serde_json::from_str(raw_args).unwrap_or(Value::Object(Default::default()));
                out.tool_calls.push(ToolCall {
                    id: id.to_string(),
                    name: name.to_string(),
                    arguments,
                });
            }
        }

        Ok(out)
    }
}

#[async_trait]
impl ChatModel for HttpChatModel {
    async fn complete(&self, request: ChatRequest) -> Result<ChatResponse, AgentError> {
        let url = format!("{}/chat/completions", self.endpoint);
        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.credential)
            .json(&self.request_body(&request))
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    AgentError::Timeout {
                        seconds: self.timeout.as_secs(),
                    }
                } else {
                    AgentError::Provider {
                        provider: "http".to_string(),
                        message: e.to_string(),
                    }
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AgentError::Provider {
                provider: "http".to_string(),
                message: format!("{status}: {body}"),
            });
        }

        let value: Value = response.json().await.map_err(|e| AgentError::Provider {
            provider: "http".to_string(),
            message: format!("body decode: {e}"),
        })?;

        Ok(ChatResponse {
            message: Self::parse_message(&value)?,
        })
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tool_calls_roundtrip_from_provider_shape() {
        let value = json!({
            "choices": [{
                "message": {
                    "role": "assistant",
                    "content": null,
                    "tool_calls": [{
                        "id": "call-1",
                        "type": "function",
                        "function": {
                            "name": "web_search",
                            "arguments": "{\"query\": \"rust\"}",
                        },
                    }],
                },
            }],
        });
        let message = HttpChatModel::parse_message(&value).unwrap();
        assert!(message.wants_tools());
        assert_eq!(message.tool_calls[0].arguments["query"], "rust");
    }

    #[test]
    fn missing_choices_is_a_provider_error() {
        let err = HttpChatModel::parse_message(&json!({})).unwrap_err();
        assert!(matches!(err, AgentError::Provider { .. }));
    }
}
