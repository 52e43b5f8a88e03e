//! Bounded tool-call loop for the content-finding agents.
//!
//! The tutorial generator and resource recommender may call `web_search`
//! while drafting. The loop gives the model at most [`MAX_TOOL_TURNS`]
//! completions; each tool call is executed, its result appended as a tool
//! message, and the loop exits on the first non-tool response. A model that
//! is still asking for tools on the last turn gets its final content taken
//! as-is.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use super::AgentError;
use super::chat::{ChatMessage, ChatModel, ChatRequest, ChatResponse, ToolSpec};

/// Maximum number of model completions per tool-using agent call.
pub const MAX_TOOL_TURNS: usize = 5;

/// One hit returned by the search provider.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
    pub title: String,
    pub url: String,
    #[serde(default)]
    pub snippet: String,
}

/// External web-search provider seam. The concrete provider is out of scope;
/// the engine only depends on this contract.
#[async_trait]
pub trait WebSearch: Send + Sync {
    async fn search(
        &self,
        query: &str,
        max_results: usize,
    ) -> Result<Vec<SearchResult>, AgentError>;
}

/// Search provider that finds nothing. Used when no provider is configured
/// so tool-using agents degrade to plain completions.
#[derive(Debug, Default)]
pub struct NoopSearch;

#[async_trait]
impl WebSearch for NoopSearch {
    async fn search(&self, _: &str, _: usize) -> Result<Vec<SearchResult>, AgentError> {
        Ok(Vec::new())
    }
}

/// Tool specification advertised to the model.
#[must_use]
pub fn web_search_spec() -> ToolSpec {
    ToolSpec {
        name: "web_search".to_string(),
        description: "Search the web for up-to-date learning material.".to_string(),
        parameters: json!({
            "type": "object",
            "properties": {
                "query": {"type": "string"},
                "max_results": {"type": "integer", "minimum": 1, "maximum": 10},
            },
            "required": ["query"],
        }),
    }
}

/// Observer for tool activity, wired to the notification bus by callers.
pub type ToolObserver<'a> = &'a (dyn Fn(ToolActivity) + Send + Sync);

/// What happened during one tool exchange.
#[derive(Clone, Debug)]
pub enum ToolActivity {
    Call { name: String, arguments: Value },
    Result { name: String, summary: String },
}

/// Run the bounded tool loop and return the final (non-tool) message.
pub async fn run_tool_loop(
    model: &dyn ChatModel,
    search: &dyn WebSearch,
    mut messages: Vec<ChatMessage>,
    observe: ToolObserver<'_>,
) -> Result<ChatMessage, AgentError> {
    let tools = vec![web_search_spec()];

    for turn in 0..MAX_TOOL_TURNS {
        let request = ChatRequest::new(messages.clone()).with_tools(tools.clone());
        let ChatResponse { message } = model.complete(request).await?;

        if !message.wants_tools() || turn == MAX_TOOL_TURNS - 1 {
            return Ok(message);
        }

        let calls = message.tool_calls.clone();
        messages.push(message);
        for call in calls {
            observe(ToolActivity::Call {
                name: call.name.clone(),
                arguments: call.arguments.clone(),
            });
            let body = execute_tool(search, &call.name, &call.arguments).await?;
            observe(ToolActivity::Result {
                name: call.name.clone(),
                summary: truncate(&body, 200),
            });
            messages.push(ChatMessage::tool(call.id, body));
        }
    }

    // Unreachable: the final turn above returns unconditionally.
    Err(AgentError::Parse {
        reason: "tool loop exhausted without a response".to_string(),
    })
}

async fn execute_tool(
    search: &dyn WebSearch,
    name: &str,
    arguments: &Value,
) -> Result<String, AgentError> {
    match name {
        "web_search" => {
            let query = arguments
                .get("query")
                .and_then(Value::as_str)
                .unwrap_or_default();
            let max_results = arguments
                .get("max_results")
                .and_then(Value::as_u64)
                .unwrap_or(5) as usize;
            let results = search.search(query, max_results).await?;
            serde_json::to_string(&results).map_err(|e| AgentError::InvalidDocument {
                what: "search results",
                message: e.to_string(),
            })
        }
        // Unknown tool: tell the model instead of failing the workflow.
        other => Ok(format!("{{\"error\": \"unknown tool: {other}\"}}")),
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.len() <= max {
        s.to_string()
    } else {
        let mut end = max;
        while !s.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}…", &s[..end])
    }
}
