//! The six workflow node runners.
//!
//! Each runner persists exactly its own node's result inside one scope it
//! commits itself, and reports everything else through the returned patch.
//! The review and content runners do not advance the workflow: review
//! suspends until an external decision, content hands the run off to the
//! worker driving the fan-out job.

use async_trait::async_trait;
use chrono::Utc;
use serde_json::json;
use uuid::Uuid;

use crate::model::{IntentAnalysisMetadata, RoadmapMetadata};
use crate::queue::{JobPayload, QueueName};
use crate::repo::{IntentRepo, RoadmapRepo, TaskRepo, UserProfileRepo};
use crate::state::{StatePatch, WorkflowState};
use crate::types::{ArtifactKind, TaskStatus, WorkflowStep};

use super::node::{NodeContext, NodeError, NodeOutcome, NodeRunner};

/// Parse the user request into a structured goal and pin the roadmap id.
pub struct IntentAnalysisRunner;

#[async_trait]
impl NodeRunner for IntentAnalysisRunner {
    fn step(&self) -> WorkflowStep {
        WorkflowStep::Intent
    }

    async fn run(
        &self,
        state: &WorkflowState,
        ctx: &NodeContext,
    ) -> Result<NodeOutcome, NodeError> {
        ctx.ensure_live()?;
        let analysis = ctx.agents.analyze_intent(&state.user_request).await?;
        let roadmap_id = state
            .roadmap_id
            .clone()
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        let now = Utc::now();
        let mut scope = ctx.repos.begin().await?;
        IntentRepo::upsert(
            &mut scope,
            &IntentAnalysisMetadata {
                task_id: state.task_id.clone(),
                analysis: analysis.clone(),
                created_at: now,
                updated_at: now,
            },
        )
        .await?;
        TaskRepo::set_roadmap(&mut scope, &state.task_id, &roadmap_id).await?;
        scope.commit().await?;

        ctx.log("info", "intent_analysis", json!({"goal": analysis.goal}))
            .await;

        Ok(NodeOutcome::Advance(
            StatePatch::new()
                .with_intent(analysis)
                .with_roadmap_id(roadmap_id),
        ))
    }
}

/// Design the framework from the intent plus the stored user profile.
pub struct CurriculumDesignRunner;

#[async_trait]
impl NodeRunner for CurriculumDesignRunner {
    fn step(&self) -> WorkflowStep {
        WorkflowStep::Curriculum
    }

    async fn run(
        &self,
        state: &WorkflowState,
        ctx: &NodeContext,
    ) -> Result<NodeOutcome, NodeError> {
        ctx.ensure_live()?;
        let intent = state
            .intent
            .as_ref()
            .ok_or(NodeError::MissingInput { what: "intent" })?;
        let roadmap_id = state
            .roadmap_id
            .as_deref()
            .ok_or(NodeError::MissingInput { what: "roadmap_id" })?;

        let profile = {
            let mut scope = ctx.repos.begin().await?;
            let profile = UserProfileRepo::get(&mut scope, &state.user_id).await?;
            scope.commit().await?;
            profile
        };

        let mut framework = ctx.agents.design_curriculum(intent, profile.as_ref()).await?;

        // Concepts need stable ids before detail rows can reference them.
        for concept in framework.concepts_mut() {
            if concept.concept_id.is_empty() {
                concept.concept_id = Uuid::new_v4().to_string();
            }
        }

        let now = Utc::now();
        let mut scope = ctx.repos.begin().await?;
        RoadmapRepo::upsert(
            &mut scope,
            &RoadmapMetadata {
                roadmap_id: roadmap_id.to_string(),
                task_id: state.task_id.clone(),
                user_id: state.user_id.clone(),
                framework: framework.clone(),
                created_at: now,
                updated_at: now,
            },
        )
        .await?;
        scope.commit().await?;

        ctx.log(
            "info",
            "curriculum_design",
            json!({"stages": framework.stages.len(), "concepts": framework.concepts().count()}),
        )
        .await;

        Ok(NodeOutcome::Advance(StatePatch::new().with_framework(framework)))
    }
}

/// Score the framework structure and collect issues.
pub struct ValidationRunner;

#[async_trait]
impl NodeRunner for ValidationRunner {
    fn step(&self) -> WorkflowStep {
        WorkflowStep::Validation
    }

    async fn run(
        &self,
        state: &WorkflowState,
        ctx: &NodeContext,
    ) -> Result<NodeOutcome, NodeError> {
        ctx.ensure_live()?;
        let framework = state
            .framework
            .as_ref()
            .ok_or(NodeError::MissingInput { what: "framework" })?;

        let report = ctx.agents.validate_structure(framework).await?;
        if !(0.0..=1.0).contains(&report.score) {
            return Err(NodeError::Validation(format!(
                "validator score {} outside [0, 1]",
                report.score
            )));
        }

        ctx.log(
            "info",
            "validation",
            json!({"score": report.score, "issues": report.issues.len()}),
        )
        .await;

        Ok(NodeOutcome::Advance(StatePatch::new().with_validation(report)))
    }
}

/// Revise the framework when validation found blocking issues.
pub struct EditorRunner;

#[async_trait]
impl NodeRunner for EditorRunner {
    fn step(&self) -> WorkflowStep {
        WorkflowStep::Editor
    }

    async fn run(
        &self,
        state: &WorkflowState,
        ctx: &NodeContext,
    ) -> Result<NodeOutcome, NodeError> {
        ctx.ensure_live()?;
        let framework = state
            .framework
            .as_ref()
            .ok_or(NodeError::MissingInput { what: "framework" })?;
        let report = state
            .validation
            .as_ref()
            .ok_or(NodeError::MissingInput { what: "validation report" })?;
        let roadmap_id = state
            .roadmap_id
            .as_deref()
            .ok_or(NodeError::MissingInput { what: "roadmap_id" })?;

        let mut revised = ctx.agents.edit_roadmap(framework, report).await?;
        for concept in revised.concepts_mut() {
            if concept.concept_id.is_empty() {
                concept.concept_id = Uuid::new_v4().to_string();
            }
        }

        let mut scope = ctx.repos.begin().await?;
        RoadmapRepo::update_framework(&mut scope, roadmap_id, &revised).await?;
        scope.commit().await?;

        ctx.log(
            "info",
            "editor",
            json!({"cycle": state.edit_cycles + 1, "issues_addressed": report.issues.len()}),
        )
        .await;

        Ok(NodeOutcome::Advance(
            StatePatch::new()
                .with_framework(revised)
                .with_clear_validation()
                .with_edit_cycles(state.edit_cycles + 1),
        ))
    }
}

/// Move the task into review and suspend until an external decision.
pub struct HumanReviewRunner;

#[async_trait]
impl NodeRunner for HumanReviewRunner {
    fn step(&self) -> WorkflowStep {
        WorkflowStep::HumanReview
    }

    async fn run(
        &self,
        state: &WorkflowState,
        ctx: &NodeContext,
    ) -> Result<NodeOutcome, NodeError> {
        ctx.ensure_live()?;
        let mut scope = ctx.repos.begin().await?;
        TaskRepo::set_status(
            &mut scope,
            &state.task_id,
            TaskStatus::HumanReviewPending,
            Some(WorkflowStep::HumanReview),
            None,
        )
        .await?;
        scope.commit().await?;

        ctx.log("info", "human_review", json!({"awaiting": "decision"}))
            .await;

        Ok(NodeOutcome::Suspend(StatePatch::new()))
    }
}

/// Enqueue the content fan-out job and hand the run to the worker.
pub struct ContentRunner;

#[async_trait]
impl NodeRunner for ContentRunner {
    fn step(&self) -> WorkflowStep {
        WorkflowStep::ContentGeneration
    }

    async fn run(
        &self,
        state: &WorkflowState,
        ctx: &NodeContext,
    ) -> Result<NodeOutcome, NodeError> {
        ctx.ensure_live()?;
        let roadmap_id = state
            .roadmap_id
            .as_deref()
            .ok_or(NodeError::MissingInput { what: "roadmap_id" })?;

        let job_id = ctx
            .queue
            .enqueue(
                QueueName::Content,
                JobPayload::GenerateContent {
                    task_id: state.task_id.clone(),
                    roadmap_id: roadmap_id.to_string(),
                    kinds: ArtifactKind::ALL.to_vec(),
                    concept_ids: None,
                },
            )
            .await?;

        let mut scope = ctx.repos.begin().await?;
        TaskRepo::set_queue_job(&mut scope, &state.task_id, &job_id).await?;
        TaskRepo::set_status(
            &mut scope,
            &state.task_id,
            TaskStatus::Processing,
            Some(WorkflowStep::ContentGeneration),
            None,
        )
        .await?;
        scope.commit().await?;

        ctx.log("info", "content_generation", json!({"queued_job": job_id}))
            .await;

        Ok(NodeOutcome::Handoff(StatePatch::new()))
    }
}

/// The full runner set in router order.
#[must_use]
pub fn all_runners() -> Vec<Box<dyn NodeRunner>> {
    vec![
        Box::new(IntentAnalysisRunner),
        Box::new(CurriculumDesignRunner),
        Box::new(ValidationRunner),
        Box::new(EditorRunner),
        Box::new(HumanReviewRunner),
        Box::new(ContentRunner),
    ]
}
