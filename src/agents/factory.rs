//! Configuration-driven agent construction and the typed execution facade.
//!
//! [`AgentFactory`] owns one [`ChatModel`] handle per configured variant,
//! built once at engine init (provider construction never happens during
//! request handling). [`Agents`] layers the typed per-variant methods on
//! top of the uniform `execute(kind, input) -> output` contract.

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;
use tracing::instrument;

use super::chat::{ChatMessage, ChatModel, ChatRequest};
use super::http::HttpChatModel;
use super::parse::{normalize_framework, recover_json};
use super::tools::{NoopSearch, ToolActivity, WebSearch, run_tool_loop};
use super::{AgentError, AgentKind};
use crate::config::AgentConfig;
use crate::model::{Concept, Framework, IntentAnalysis, UserProfile, ValidationReport};

/// Output document of the tutorial generator. The body itself is handed to
/// the external object store by the caller; only the pointer and summary
/// land in metadata rows.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct TutorialDraft {
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub body: String,
    #[serde(default)]
    pub content_url: Option<String>,
}

/// Holds one constructed model per agent variant.
pub struct AgentFactory {
    models: FxHashMap<AgentKind, Arc<dyn ChatModel>>,
    search: Arc<dyn WebSearch>,
}

impl AgentFactory {
    /// Build every configured variant up front.
    ///
    /// Variants absent from `configs` simply fail with
    /// [`AgentError::Unconfigured`] when first used, so a deployment that
    /// skips content generation does not need content agent credentials.
    pub fn from_config(
        configs: &FxHashMap<AgentKind, AgentConfig>,
        llm_timeout: Duration,
    ) -> Result<Self, AgentError> {
        let mut models: FxHashMap<AgentKind, Arc<dyn ChatModel>> = FxHashMap::default();
        for (kind, config) in configs {
            if config.endpoint.is_empty() {
                continue;
            }
            let model = HttpChatModel::new(
                &config.endpoint,
                &config.model,
                &config.credential,
                llm_timeout,
            )?;
            models.insert(*kind, Arc::new(model));
        }
        Ok(Self {
            models,
            search: Arc::new(NoopSearch),
        })
    }

    /// Test/bench constructor with caller-supplied models.
    #[must_use]
    pub fn from_models(models: FxHashMap<AgentKind, Arc<dyn ChatModel>>) -> Self {
        Self {
            models,
            search: Arc::new(NoopSearch),
        }
    }

    #[must_use]
    pub fn with_search(mut self, search: Arc<dyn WebSearch>) -> Self {
        self.search = search;
        self
    }

    fn model(&self, kind: AgentKind) -> Result<&Arc<dyn ChatModel>, AgentError> {
        self.models
            .get(&kind)
            .ok_or(AgentError::Unconfigured { kind })
    }
}

/// Per-variant system prompts. Terse on purpose; the contract is carried by
/// the input document and the parser, not prompt engineering.
fn system_prompt(kind: AgentKind) -> &'static str {
    match kind {
        AgentKind::IntentAnalyzer => {
            "Extract the learner's goal from the request. Reply with JSON: \
             {goal, experience_level, target_hours_per_week, focus_areas, constraints}."
        }
        AgentKind::CurriculumArchitect => {
            "Design a learning roadmap as JSON: {title, stages: [{title, order, \
             modules: [{title, concepts: [{concept_id, title, description, \
             estimated_hours}]}]}], total_estimated_hours, recommended_completion_weeks}."
        }
        AgentKind::StructureValidator => {
            "Review the roadmap structure. Reply with JSON: {issues: [{severity: \
             minor|major|critical, location, message}], score} with score in [0,1]."
        }
        AgentKind::RoadmapEditor => {
            "Revise the roadmap to resolve the listed issues. Reply with the full \
             corrected roadmap JSON in the same shape as the input."
        }
        AgentKind::TutorialGenerator => {
            "Write a tutorial for the concept. You may call web_search. Reply with \
             JSON: {summary, body}."
        }
        AgentKind::ResourceRecommender => {
            "Recommend external learning resources for the concept. You may call \
             web_search. Reply with JSON: {resources: [{title, url, kind, reason}]}."
        }
        AgentKind::QuizGenerator => {
            "Write a quiz for the concept. Reply with JSON: {questions: [{prompt, \
             choices, answer_index, explanation}]}."
        }
        AgentKind::ModificationAnalyzer => {
            "Analyze the requested roadmap modification. Reply with JSON: \
             {targets: [{concept_id, kinds}], rationale}."
        }
        AgentKind::TutorialModifier => {
            "Apply the requested change to the tutorial. Reply with JSON: {summary, body}."
        }
        AgentKind::ResourceModifier => {
            "Apply the requested change to the resource list. Reply with JSON: \
             {resources: [...]}."
        }
        AgentKind::QuizModifier => {
            "Apply the requested change to the quiz. Reply with JSON: {questions: [...]}."
        }
    }
}

/// Typed execution facade over the factory.
pub struct Agents {
    factory: AgentFactory,
}

impl Agents {
    #[must_use]
    pub fn new(factory: AgentFactory) -> Self {
        Self { factory }
    }

    /// The uniform contract: run one variant on an input document and
    /// recover its output document.
    ///
    /// Tool-using variants run the bounded web-search loop; everything else
    /// is a single completion.
    #[instrument(skip(self, input, observe), fields(agent = %kind), err)]
    pub async fn execute(
        &self,
        kind: AgentKind,
        input: Value,
        observe: &(dyn Fn(ToolActivity) + Send + Sync),
    ) -> Result<Value, AgentError> {
        let model = self.factory.model(kind)?;
        let messages = vec![
            ChatMessage::system(system_prompt(kind)),
            ChatMessage::user(input.to_string()),
        ];

        let message = if kind.uses_tools() {
            run_tool_loop(model.as_ref(), self.factory.search.as_ref(), messages, observe).await?
        } else {
            model.complete(ChatRequest::new(messages)).await?.message
        };

        recover_json(&message.content)
    }

    pub async fn analyze_intent(
        &self,
        user_request: &Value,
    ) -> Result<IntentAnalysis, AgentError> {
        let value = self
            .execute(AgentKind::IntentAnalyzer, user_request.clone(), &|_| {})
            .await?;
        serde_json::from_value(value).map_err(|e| AgentError::InvalidDocument {
            what: "intent analysis",
            message: e.to_string(),
        })
    }

    pub async fn design_curriculum(
        &self,
        intent: &IntentAnalysis,
        profile: Option<&UserProfile>,
    ) -> Result<Framework, AgentError> {
        let input = json!({"intent": intent, "profile": profile});
        let value = self
            .execute(AgentKind::CurriculumArchitect, input, &|_| {})
            .await?;
        let target = if intent.target_hours_per_week > 0.0 {
            intent.target_hours_per_week
        } else {
            profile.map(|p| p.weekly_hours).unwrap_or(0.0)
        };
        normalize_framework(value, target)
    }

    pub async fn validate_structure(
        &self,
        framework: &Framework,
    ) -> Result<ValidationReport, AgentError> {
        let value = self
            .execute(
                AgentKind::StructureValidator,
                serde_json::to_value(framework).unwrap_or(Value::Null),
                &|_| {},
            )
            .await?;
        serde_json::from_value(value).map_err(|e| AgentError::InvalidDocument {
            what: "validation report",
            message: e.to_string(),
        })
    }

    pub async fn edit_roadmap(
        &self,
        framework: &Framework,
        report: &ValidationReport,
    ) -> Result<Framework, AgentError> {
        let input = json!({"framework": framework, "issues": report.issues});
        let value = self.execute(AgentKind::RoadmapEditor, input, &|_| {}).await?;
        normalize_framework(value, 0.0)
    }

    pub async fn generate_tutorial(
        &self,
        concept: &Concept,
        profile: Option<&UserProfile>,
        observe: &(dyn Fn(ToolActivity) + Send + Sync),
    ) -> Result<TutorialDraft, AgentError> {
        let input = json!({"concept": concept, "profile": profile});
        let value = self
            .execute(AgentKind::TutorialGenerator, input, observe)
            .await?;
        serde_json::from_value(value).map_err(|e| AgentError::InvalidDocument {
            what: "tutorial draft",
            message: e.to_string(),
        })
    }

    pub async fn recommend_resources(
        &self,
        concept: &Concept,
        profile: Option<&UserProfile>,
        observe: &(dyn Fn(ToolActivity) + Send + Sync),
    ) -> Result<Value, AgentError> {
        let input = json!({"concept": concept, "profile": profile});
        let value = self
            .execute(AgentKind::ResourceRecommender, input, observe)
            .await?;
        match value.get("resources") {
            Some(resources) if resources.is_array() => Ok(resources.clone()),
            _ if value.is_array() => Ok(value),
            _ => Err(AgentError::InvalidDocument {
                what: "resource list",
                message: "missing resources array".to_string(),
            }),
        }
    }

    pub async fn generate_quiz(
        &self,
        concept: &Concept,
        profile: Option<&UserProfile>,
    ) -> Result<Value, AgentError> {
        let input = json!({"concept": concept, "profile": profile});
        let value = self
            .execute(AgentKind::QuizGenerator, input, &|_| {})
            .await?;
        match value.get("questions") {
            Some(questions) if questions.is_array() => Ok(questions.clone()),
            _ if value.is_array() => Ok(value),
            _ => Err(AgentError::InvalidDocument {
                what: "quiz",
                message: "missing questions array".to_string(),
            }),
        }
    }

    pub async fn analyze_modification(
        &self,
        request: &Value,
        framework: &Framework,
    ) -> Result<Value, AgentError> {
        let input = json!({"request": request, "framework": framework});
        self.execute(AgentKind::ModificationAnalyzer, input, &|_| {})
            .await
    }

    pub async fn modify_tutorial(
        &self,
        current: &Value,
        change: &Value,
    ) -> Result<TutorialDraft, AgentError> {
        let input = json!({"current": current, "change": change});
        let value = self
            .execute(AgentKind::TutorialModifier, input, &|_| {})
            .await?;
        serde_json::from_value(value).map_err(|e| AgentError::InvalidDocument {
            what: "tutorial draft",
            message: e.to_string(),
        })
    }

    pub async fn modify_resources(
        &self,
        current: &Value,
        change: &Value,
    ) -> Result<Value, AgentError> {
        let input = json!({"current": current, "change": change});
        self.execute(AgentKind::ResourceModifier, input, &|_| {})
            .await
    }

    pub async fn modify_quiz(&self, current: &Value, change: &Value) -> Result<Value, AgentError> {
        let input = json!({"current": current, "change": change});
        self.execute(AgentKind::QuizModifier, input, &|_| {}).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::chat::ScriptedChatModel;

    fn agents_with(kind: AgentKind, model: ScriptedChatModel) -> Agents {
        let mut models: FxHashMap<AgentKind, Arc<dyn ChatModel>> = FxHashMap::default();
        models.insert(kind, Arc::new(model));
        Agents::new(AgentFactory::from_models(models))
    }

    #[tokio::test]
    async fn intent_output_is_typed() {
        let agents = agents_with(
            AgentKind::IntentAnalyzer,
            ScriptedChatModel::new(vec![ChatMessage::assistant(
                r#"{"goal": "Learn Python", "experience_level": "beginner",
                   "target_hours_per_week": 5, "focus_areas": [], "constraints": []}"#,
            )]),
        );
        let intent = agents
            .analyze_intent(&json!({"text": "I want to learn Python"}))
            .await
            .unwrap();
        assert_eq!(intent.goal, "Learn Python");
        assert_eq!(intent.target_hours_per_week, 5.0);
    }

    #[tokio::test]
    async fn curriculum_output_is_normalized() {
        let body = "```json\n{\"output\":{\"stages\":[{\"title\":\"S\",\"modules\":[{\"title\":\"M\",\"concepts\":[{\"concept_id\":\"c1\",\"title\":\"C\",\"estimated_hours\":4.0}]}]}]}}\n```";
        let agents = agents_with(
            AgentKind::CurriculumArchitect,
            ScriptedChatModel::new(vec![ChatMessage::assistant(body)]),
        );
        let intent = IntentAnalysis {
            goal: "x".into(),
            target_hours_per_week: 2.0,
            ..Default::default()
        };
        let framework = agents.design_curriculum(&intent, None).await.unwrap();
        assert_eq!(framework.stages[0].order, 1);
        assert_eq!(framework.total_estimated_hours, 4.0);
        assert_eq!(framework.recommended_completion_weeks, 2);
    }

    #[tokio::test]
    async fn unconfigured_variant_errors() {
        let agents = Agents::new(AgentFactory::from_models(FxHashMap::default()));
        let err = agents.analyze_intent(&Value::Null).await.unwrap_err();
        assert!(matches!(err, AgentError::Unconfigured { .. }));
    }

    #[tokio::test]
    async fn resource_list_unwraps_envelope() {
        let agents = agents_with(
            AgentKind::ResourceRecommender,
            ScriptedChatModel::new(vec![ChatMessage::assistant(
                r#"{"resources": [{"title": "Book", "url": "https://example.com"}]}"#,
            )]),
        );
        let resources = agents
            .recommend_resources(&Concept::default(), None, &|_| {})
            .await
            .unwrap();
        assert_eq!(resources.as_array().unwrap().len(), 1);
    }
}
