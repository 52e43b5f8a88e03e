//! Provider-agnostic chat primitives.
//!
//! [`ChatModel`] is the single seam between the engine and any concrete LLM
//! provider. The production implementation is [`crate::agents::http::HttpChatModel`];
//! tests drive the engine with [`ScriptedChatModel`], which replays canned
//! responses in order.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Mutex;

use super::AgentError;

/// A single chat turn.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    #[serde(default)]
    pub content: String,
    /// Tool invocations requested by the model (assistant turns only).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
    /// Which tool call this message answers (tool turns only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl ChatMessage {
    pub const SYSTEM: &'static str = "system";
    pub const USER: &'static str = "user";
    pub const ASSISTANT: &'static str = "assistant";
    pub const TOOL: &'static str = "tool";

    #[must_use]
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Self::SYSTEM.to_string(),
            content: content.into(),
            ..Default::default()
        }
    }

    #[must_use]
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Self::USER.to_string(),
            content: content.into(),
            ..Default::default()
        }
    }

    #[must_use]
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Self::ASSISTANT.to_string(),
            content: content.into(),
            ..Default::default()
        }
    }

    /// A tool result message answering `tool_call_id`.
    #[must_use]
    pub fn tool(tool_call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: Self::TOOL.to_string(),
            content: content.into(),
            tool_call_id: Some(tool_call_id.into()),
            ..Default::default()
        }
    }

    /// An assistant turn that only requests tool calls.
    #[must_use]
    pub fn tool_request(calls: Vec<ToolCall>) -> Self {
        Self {
            role: Self::ASSISTANT.to_string(),
            tool_calls: calls,
            ..Default::default()
        }
    }

    /// Whether this turn requests at least one tool invocation.
    #[must_use]
    pub fn wants_tools(&self) -> bool {
        !self.tool_calls.is_empty()
    }
}

/// A tool invocation requested by the model.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub arguments: Value,
}

/// Declaration of a callable tool, shipped with the request.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    /// JSON schema of the tool's arguments.
    pub parameters: Value,
}

/// One completion request.
#[derive(Clone, Debug, Default)]
pub struct ChatRequest {
    pub messages: Vec<ChatMessage>,
    pub tools: Vec<ToolSpec>,
}

impl ChatRequest {
    #[must_use]
    pub fn new(messages: Vec<ChatMessage>) -> Self {
        Self {
            messages,
            tools: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_tools(mut self, tools: Vec<ToolSpec>) -> Self {
        self.tools = tools;
        self
    }
}

/// One completion response.
#[derive(Clone, Debug)]
pub struct ChatResponse {
    pub message: ChatMessage,
}

/// The provider seam.
///
/// Implementations must be cheap to call concurrently; the content fan-out
/// holds one model handle per agent kind and issues up to the configured
/// semaphore cap of simultaneous calls.
#[async_trait]
pub trait ChatModel: Send + Sync {
    async fn complete(&self, request: ChatRequest) -> Result<ChatResponse, AgentError>;

    /// Model identifier, for logging only.
    fn model_name(&self) -> &str;
}

/// Test double that replays scripted responses in order.
///
/// When the script runs dry it fails as a provider error, which exercises
/// the transient-retry path in tests.
pub struct ScriptedChatModel {
    responses: Mutex<Vec<Result<ChatMessage, AgentError>>>,
    /// Answer returned once the script is exhausted, if any.
    fallback: Option<ChatMessage>,
    calls: Mutex<Vec<ChatRequest>>,
}

impl ScriptedChatModel {
    #[must_use]
    pub fn new(responses: Vec<ChatMessage>) -> Self {
        Self {
            responses: Mutex::new(responses.into_iter().map(Ok).collect()),
            fallback: None,
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Script a mix of successes and failures.
    #[must_use]
    pub fn with_outcomes(outcomes: Vec<Result<ChatMessage, AgentError>>) -> Self {
        Self {
            responses: Mutex::new(outcomes),
            fallback: None,
            calls: Mutex::new(Vec::new()),
        }
    }

    /// A model that always answers with the same body.
    #[must_use]
    pub fn repeating(body: impl Into<String>) -> Self {
        Self {
            responses: Mutex::new(Vec::new()),
            fallback: Some(ChatMessage::assistant(body.into())),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Requests observed so far (for asserting prompt construction).
    #[must_use]
    pub fn recorded_calls(&self) -> Vec<ChatRequest> {
        self.calls.lock().expect("calls mutex poisoned").clone()
    }
}

#[async_trait]
impl ChatModel for ScriptedChatModel {
    async fn complete(&self, request: ChatRequest) -> Result<ChatResponse, AgentError> {
        self.calls
            .lock()
            .expect("calls mutex poisoned")
            .push(request);
        let mut responses = self.responses.lock().expect("responses mutex poisoned");
        if responses.is_empty() {
            return match &self.fallback {
                Some(message) => Ok(ChatResponse {
                    message: message.clone(),
                }),
                None => Err(AgentError::Provider {
                    provider: "scripted".to_string(),
                    message: "script exhausted".to_string(),
                }),
            };
        }
        responses.remove(0).map(|message| ChatResponse { message })
    }

    fn model_name(&self) -> &str {
        "scripted"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn scripted_model_replays_in_order() {
        let model = ScriptedChatModel::new(vec![
            ChatMessage::assistant("first"),
            ChatMessage::assistant("second"),
        ]);
        let a = model
            .complete(ChatRequest::new(vec![ChatMessage::user("hi")]))
            .await
            .unwrap();
        let b = model
            .complete(ChatRequest::new(vec![ChatMessage::user("hi")]))
            .await
            .unwrap();
        assert_eq!(a.message.content, "first");
        assert_eq!(b.message.content, "second");
        assert!(model
            .complete(ChatRequest::new(vec![]))
            .await
            .is_err());
        assert_eq!(model.recorded_calls().len(), 3);
    }

    #[tokio::test]
    async fn repeating_model_never_runs_dry() {
        let model = ScriptedChatModel::repeating("{\"score\": 1.0}");
        for _ in 0..3 {
            let response = model.complete(ChatRequest::new(vec![])).await.unwrap();
            assert_eq!(response.message.content, "{\"score\": 1.0}");
        }
    }
}
