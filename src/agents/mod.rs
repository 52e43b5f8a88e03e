//! LLM agent contracts and construction.
//!
//! Every agent in the system shares one polymorphic contract (execute an
//! input document, get an output document) realized over a provider-agnostic
//! [`chat::ChatModel`]. The eleven concrete variants are enumerated by
//! [`AgentKind`]; [`factory::Agents`] exposes a typed method per variant so
//! callers never handle raw JSON.
//!
//! Output parsing is deliberately forgiving: models wrap JSON in fences,
//! nest it under envelope keys, and drop computable fields. The
//! [`parse`] module recovers from all of that before anything is treated
//! as a failure.

pub mod chat;
pub mod factory;
pub mod http;
pub mod parse;
pub mod tools;

use miette::Diagnostic;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

pub use chat::{ChatMessage, ChatModel, ChatRequest, ChatResponse, ScriptedChatModel, ToolCall};
pub use factory::{AgentFactory, Agents};
pub use parse::{normalize_framework, recover_json};
pub use tools::{SearchResult, WebSearch};

/// The eleven agent variants the engine can construct.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentKind {
    IntentAnalyzer,
    CurriculumArchitect,
    StructureValidator,
    RoadmapEditor,
    TutorialGenerator,
    ResourceRecommender,
    QuizGenerator,
    ModificationAnalyzer,
    TutorialModifier,
    ResourceModifier,
    QuizModifier,
}

impl AgentKind {
    pub const ALL: [AgentKind; 11] = [
        AgentKind::IntentAnalyzer,
        AgentKind::CurriculumArchitect,
        AgentKind::StructureValidator,
        AgentKind::RoadmapEditor,
        AgentKind::TutorialGenerator,
        AgentKind::ResourceRecommender,
        AgentKind::QuizGenerator,
        AgentKind::ModificationAnalyzer,
        AgentKind::TutorialModifier,
        AgentKind::ResourceModifier,
        AgentKind::QuizModifier,
    ];

    #[must_use]
    pub fn encode(&self) -> &'static str {
        match self {
            AgentKind::IntentAnalyzer => "intent_analyzer",
            AgentKind::CurriculumArchitect => "curriculum_architect",
            AgentKind::StructureValidator => "structure_validator",
            AgentKind::RoadmapEditor => "roadmap_editor",
            AgentKind::TutorialGenerator => "tutorial_generator",
            AgentKind::ResourceRecommender => "resource_recommender",
            AgentKind::QuizGenerator => "quiz_generator",
            AgentKind::ModificationAnalyzer => "modification_analyzer",
            AgentKind::TutorialModifier => "tutorial_modifier",
            AgentKind::ResourceModifier => "resource_modifier",
            AgentKind::QuizModifier => "quiz_modifier",
        }
    }

    /// Whether this variant runs the bounded web-search tool loop.
    #[must_use]
    pub fn uses_tools(&self) -> bool {
        matches!(
            self,
            AgentKind::TutorialGenerator | AgentKind::ResourceRecommender
        )
    }
}

impl fmt::Display for AgentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.encode())
    }
}

/// Errors surfaced by agent execution.
///
/// The runtime's error handler classifies these into its retry taxonomy:
/// `Provider` and `Timeout` are transient, `Parse` gets one re-prompt,
/// `InvalidDocument` surfaces immediately, `Cancelled` propagates.
#[derive(Debug, Error, Diagnostic)]
pub enum AgentError {
    /// The model endpoint failed (network error, 5xx, connect refusal).
    #[error("provider error ({provider}): {message}")]
    #[diagnostic(
        code(roadweave::agents::provider),
        help("Transient by classification; the error handler retries with backoff.")
    )]
    Provider { provider: String, message: String },

    /// The per-call soft timeout elapsed.
    #[error("LLM call timed out after {seconds}s")]
    #[diagnostic(code(roadweave::agents::timeout))]
    Timeout { seconds: u64 },

    /// No parsing strategy could recover a JSON document from the response.
    #[error("unrecoverable model output: {reason}")]
    #[diagnostic(
        code(roadweave::agents::parse),
        help("The error handler re-prompts once before surfacing this.")
    )]
    Parse { reason: String },

    /// The recovered document does not satisfy the variant's output shape.
    #[error("structurally invalid {what}: {message}")]
    #[diagnostic(code(roadweave::agents::invalid_document))]
    InvalidDocument { what: &'static str, message: String },

    /// No configuration exists for the requested variant.
    #[error("agent not configured: {kind}")]
    #[diagnostic(
        code(roadweave::agents::unconfigured),
        help("Add a {kind} entry to the agent configuration map.")
    )]
    Unconfigured { kind: AgentKind },

    /// The surrounding workflow was cancelled.
    #[error("agent call cancelled")]
    #[diagnostic(code(roadweave::agents::cancelled))]
    Cancelled,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn eleven_variants() {
        assert_eq!(AgentKind::ALL.len(), 11);
    }

    #[test]
    fn only_content_finders_use_tools() {
        let tool_users: Vec<_> = AgentKind::ALL.iter().filter(|k| k.uses_tools()).collect();
        assert_eq!(
            tool_users,
            vec![&AgentKind::TutorialGenerator, &AgentKind::ResourceRecommender]
        );
    }
}
