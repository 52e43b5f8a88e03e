//! Content fan-out.
//!
//! For each concept of a roadmap the worker produces up to three artifacts
//! (tutorial, resources, quiz). Generation is parallel: kinds run
//! concurrently with each other, and within a kind one task per concept is
//! scheduled in framework traversal order, bounded by the kind's semaphore.
//!
//! Persistence is deliberately narrower than generation: one transaction
//! per kind writes all of that kind's detail rows and the matching
//! framework status patch. K kinds → K transactions, however many concepts
//! the roadmap has. The detail rows written first are the source of truth;
//! the framework statuses are a projection patched in the same transaction.
//!
//! Resume semantics: concepts that already own a detail row are skipped
//! (the job may be redelivered at-least-once), unless the job names
//! explicit concept ids; that is a regeneration and runs regardless.

use async_trait::async_trait;
use miette::Diagnostic;
use serde_json::{Value, json};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Semaphore;
use tracing::instrument;

use crate::agents::Agents;
use crate::agents::tools::ToolActivity;
use crate::checkpoint::{Checkpoint, Checkpointer, CheckpointerError};
use crate::config::EngineConfig;
use crate::events::{NotificationBus, ProgressEvent};
use crate::model::{
    Concept, QuizMetadata, ResourceRecommendationMetadata, TutorialMetadata, UserProfile,
};
use crate::queue::JobPayload;
use crate::repo::{
    QuizRepo, RepoError, RepoFactory, ResourceRepo, RoadmapRepo, TaskRepo, TutorialRepo,
    UserProfileRepo,
};
use crate::state::{ContentReport, StatePatch, WorkflowState};
use crate::types::{ArtifactKind, ContentStatus, WorkflowStep};

use super::cancel::CancelToken;

/// Size of streamed tutorial chunks forwarded to SSE clients.
const CHUNK_SIZE: usize = 400;

/// One content job, decoded from the queue payload.
#[derive(Clone, Debug, PartialEq)]
pub struct ContentJobSpec {
    pub task_id: String,
    pub roadmap_id: String,
    pub kinds: Vec<ArtifactKind>,
    /// Explicit regeneration targets; `None` means every concept that does
    /// not already have the artifact.
    pub concept_ids: Option<Vec<String>>,
}

impl ContentJobSpec {
    /// Decode from a queue payload; `None` for other payload kinds.
    #[must_use]
    pub fn from_payload(payload: &JobPayload) -> Option<Self> {
        match payload {
            JobPayload::GenerateContent {
                task_id,
                roadmap_id,
                kinds,
                concept_ids,
            } => Some(Self {
                task_id: task_id.clone(),
                roadmap_id: roadmap_id.clone(),
                kinds: kinds.clone(),
                concept_ids: concept_ids.clone(),
            }),
            _ => None,
        }
    }
}

#[derive(Debug, Error, Diagnostic)]
pub enum ContentError {
    #[error(transparent)]
    #[diagnostic(code(roadweave::content::repo))]
    Repo(#[from] RepoError),

    #[error(transparent)]
    #[diagnostic(code(roadweave::content::checkpoint))]
    Checkpoint(#[from] CheckpointerError),

    /// Cancellation fired mid-fan-out; completed artifacts are persisted,
    /// the task stays non-terminal for the sweeper to pick up.
    #[error("content generation cancelled")]
    #[diagnostic(code(roadweave::content::cancelled))]
    Cancelled,
}

/// External object store holding tutorial bodies. Only the returned URL
/// lands in the metadata row.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn put_tutorial(
        &self,
        roadmap_id: &str,
        concept_id: &str,
        body: &str,
    ) -> Result<String, String>;
}

/// Store that keeps nothing and hands back a deterministic pseudo-URL.
/// Stands in when no object store is wired up.
#[derive(Debug, Default)]
pub struct NoopObjectStore;

#[async_trait]
impl ObjectStore for NoopObjectStore {
    async fn put_tutorial(
        &self,
        roadmap_id: &str,
        concept_id: &str,
        _body: &str,
    ) -> Result<String, String> {
        Ok(format!("memory://tutorials/{roadmap_id}/{concept_id}"))
    }
}

/// What one concept × kind generation produced.
enum ArtifactOutcome {
    Done(ArtifactPayload),
    Failed(String),
    /// Cancellation hit before this concept ran; leaves the status pending.
    Skipped,
}

enum ArtifactPayload {
    Tutorial {
        summary: String,
        content_url: Option<String>,
    },
    Resources(Value),
    Quiz(Value),
}

pub struct ContentEngine {
    repos: Arc<RepoFactory>,
    agents: Arc<Agents>,
    bus: Arc<NotificationBus>,
    checkpointer: Arc<dyn Checkpointer>,
    object_store: Arc<dyn ObjectStore>,
    config: Arc<EngineConfig>,
}

impl ContentEngine {
    pub fn new(
        repos: Arc<RepoFactory>,
        agents: Arc<Agents>,
        bus: Arc<NotificationBus>,
        checkpointer: Arc<dyn Checkpointer>,
        object_store: Arc<dyn ObjectStore>,
        config: Arc<EngineConfig>,
    ) -> Self {
        Self {
            repos,
            agents,
            bus,
            checkpointer,
            object_store,
            config,
        }
    }

    /// Run one content job to a terminal task status.
    #[instrument(skip(self, cancel), fields(task_id = %job.task_id), err)]
    pub async fn run(
        &self,
        job: &ContentJobSpec,
        cancel: &CancelToken,
    ) -> Result<ContentReport, ContentError> {
        let (task, profile) = {
            let mut scope = self.repos.begin().await?;
            let task = TaskRepo::get(&mut scope, &job.task_id).await?;
            let profile = UserProfileRepo::get(&mut scope, &task.user_id).await?;
            scope.commit().await?;
            (task, profile)
        };
        if task.status.is_terminal() {
            // Redelivered job for a finished task; nothing to do.
            return Ok(ContentReport {
                status: task.status,
                ..Default::default()
            });
        }

        // Work out the target list per kind, skipping concepts whose detail
        // row already exists (unless explicitly regenerating).
        let mut plans: Vec<(ArtifactKind, Vec<Concept>)> = Vec::new();
        {
            let mut scope = self.repos.begin().await?;
            let roadmap = RoadmapRepo::get(&mut scope, &job.roadmap_id).await?;
            for kind in ArtifactKind::ALL {
                if !job.kinds.contains(&kind) {
                    continue;
                }
                let existing: Vec<String> = match kind {
                    ArtifactKind::Tutorial => {
                        TutorialRepo::list_for_roadmap(&mut scope, &job.roadmap_id)
                            .await?
                            .into_iter()
                            .filter(|t| t.is_latest)
                            .map(|t| t.concept_id)
                            .collect()
                    }
                    ArtifactKind::Resources => {
                        ResourceRepo::list_for_roadmap(&mut scope, &job.roadmap_id)
                            .await?
                            .into_iter()
                            .map(|r| r.concept_id)
                            .collect()
                    }
                    ArtifactKind::Quiz => QuizRepo::list_for_roadmap(&mut scope, &job.roadmap_id)
                        .await?
                        .into_iter()
                        .map(|q| q.concept_id)
                        .collect(),
                };
                let targets: Vec<Concept> = roadmap
                    .framework
                    .concepts()
                    .filter(|concept| match &job.concept_ids {
                        Some(ids) => ids.contains(&concept.concept_id),
                        None => !existing.contains(&concept.concept_id),
                    })
                    .cloned()
                    .collect();
                plans.push((kind, targets));
            }
            scope.commit().await?;
        }

        // Generation: kinds in parallel, concepts bounded per kind.
        let generation = futures_util::future::join_all(plans.into_iter().map(
            |(kind, targets)| {
                let profile = profile.clone();
                async move {
                    let outcomes = self.generate_kind(job, kind, targets, profile, cancel).await;
                    (kind, outcomes)
                }
            },
        ))
        .await;

        // Persistence: one transaction per kind, in deterministic order.
        let mut report = ContentReport::default();
        let mut failed = 0u32;
        let mut skipped_for_cancel = false;
        for (kind, outcomes) in generation {
            if outcomes.is_empty() {
                continue;
            }
            let mut scope = self.repos.begin().await?;
            let roadmap = RoadmapRepo::get(&mut scope, &job.roadmap_id).await?;
            let mut framework = roadmap.framework;
            for (concept_id, outcome) in outcomes {
                match outcome {
                    ArtifactOutcome::Done(payload) => {
                        let (reference_id, content_url) = match payload {
                            ArtifactPayload::Tutorial {
                                summary,
                                content_url,
                            } => {
                                let mut row = TutorialMetadata::draft(
                                    &concept_id,
                                    &job.roadmap_id,
                                    content_url.clone(),
                                    Some(summary),
                                );
                                row.content_status = ContentStatus::Completed;
                                TutorialRepo::upsert(&mut scope, &row).await?;
                                (row.tutorial_id, content_url)
                            }
                            ArtifactPayload::Resources(resources) => {
                                let row = ResourceRecommendationMetadata::draft(
                                    &concept_id,
                                    &job.roadmap_id,
                                    resources,
                                );
                                ResourceRepo::upsert(&mut scope, &row).await?;
                                (row.id, None)
                            }
                            ArtifactPayload::Quiz(questions) => {
                                let row = QuizMetadata::draft(
                                    &concept_id,
                                    &job.roadmap_id,
                                    questions,
                                );
                                QuizRepo::upsert(&mut scope, &row).await?;
                                (row.quiz_id, None)
                            }
                        };
                        if let Some(concept) = framework.concept_mut(&concept_id) {
                            concept.set_artifact(
                                kind,
                                ContentStatus::Completed,
                                Some(reference_id),
                            );
                            if let Some(url) = content_url {
                                concept.content_url = Some(url);
                            }
                        }
                    }
                    ArtifactOutcome::Failed(message) => {
                        if let Some(concept) = framework.concept_mut(&concept_id) {
                            concept.set_artifact(kind, ContentStatus::Failed, None);
                        }
                        tracing::warn!(
                            task_id = %job.task_id,
                            kind = %kind,
                            concept_id = %concept_id,
                            error = %message,
                            "artifact generation failed"
                        );
                        report.record_failure(kind, &concept_id);
                        failed += 1;
                    }
                    ArtifactOutcome::Skipped => {
                        skipped_for_cancel = true;
                    }
                }
            }
            RoadmapRepo::update_framework(&mut scope, &job.roadmap_id, &framework).await?;
            scope.commit().await?;
        }

        if skipped_for_cancel || cancel.is_cancelled() {
            // Persisted what finished; leave the task non-terminal and let
            // the recovery sweeper re-enqueue the remainder.
            self.checkpoint_progress(job, None).await?;
            return Err(ContentError::Cancelled);
        }

        // Artifacts that already existed count as successes for the final
        // resolution; re-read the framework for the authoritative tally.
        let total_done = {
            let mut scope = self.repos.begin().await?;
            let roadmap = RoadmapRepo::get(&mut scope, &job.roadmap_id).await?;
            scope.commit().await?;
            roadmap.framework.progress().completed
        };
        report.succeeded = total_done;
        report.status = ContentReport::resolve_status(total_done, failed);

        let error_payload = (!report.failed_concepts.is_empty())
            .then(|| json!({"failed_concepts": report.failed_concepts}));
        {
            let mut scope = self.repos.begin().await?;
            TaskRepo::set_status(
                &mut scope,
                &job.task_id,
                report.status,
                Some(WorkflowStep::ContentGeneration),
                error_payload.as_ref(),
            )
            .await?;
            scope.commit().await?;
        }

        self.checkpoint_progress(job, Some(report.clone())).await?;
        self.bus.publish(ProgressEvent::WorkflowCompleted {
            workflow_id: job.task_id.clone(),
            status: report.status,
        });
        self.bus.close_workflow(&job.task_id);

        Ok(report)
    }

    /// Generate one artifact kind for the target concepts, preserving
    /// traversal order in the returned vector.
    async fn generate_kind(
        &self,
        job: &ContentJobSpec,
        kind: ArtifactKind,
        targets: Vec<Concept>,
        profile: Option<UserProfile>,
        cancel: &CancelToken,
    ) -> Vec<(String, ArtifactOutcome)> {
        let semaphore = Arc::new(Semaphore::new(self.config.semaphore_cap(kind)));
        let mut handles = Vec::with_capacity(targets.len());

        for concept in targets {
            // Acquire before spawning: concepts enter generation strictly in
            // framework traversal order, at most `cap` in flight.
            let Ok(permit) = Arc::clone(&semaphore).acquire_owned().await else {
                break;
            };
            let agents = Arc::clone(&self.agents);
            let bus = Arc::clone(&self.bus);
            let object_store = Arc::clone(&self.object_store);
            let cancel = cancel.clone();
            let profile = profile.clone();
            let task_id = job.task_id.clone();
            let roadmap_id = job.roadmap_id.clone();

            handles.push(tokio::spawn(async move {
                let _permit = permit;
                let concept_id = concept.concept_id.clone();
                if cancel.is_cancelled() {
                    return (concept_id, ArtifactOutcome::Skipped);
                }
                let outcome = generate_artifact(
                    kind,
                    &concept,
                    profile.as_ref(),
                    &agents,
                    &bus,
                    object_store.as_ref(),
                    &task_id,
                    &roadmap_id,
                )
                .await;
                (concept_id, outcome)
            }));
        }

        let mut outcomes = Vec::with_capacity(handles.len());
        for handle in handles {
            match handle.await {
                Ok(entry) => outcomes.push(entry),
                Err(join_error) => {
                    tracing::error!(error = %join_error, "content generation task panicked");
                }
            }
        }
        outcomes
    }

    /// Write the content report (or just the current state) into the
    /// checkpoint log so resume sees the fan-out outcome.
    async fn checkpoint_progress(
        &self,
        job: &ContentJobSpec,
        report: Option<ContentReport>,
    ) -> Result<(), ContentError> {
        let mut state = match self.checkpointer.load_latest(&job.task_id).await? {
            Some(checkpoint) => checkpoint.state,
            None => {
                let mut scope = self.repos.begin().await?;
                let task = TaskRepo::get(&mut scope, &job.task_id).await?;
                scope.commit().await?;
                let mut state =
                    WorkflowState::new(&task.task_id, &task.user_id, task.user_request.clone());
                state.roadmap_id = Some(job.roadmap_id.clone());
                state
            }
        };
        if let Some(report) = report {
            state.apply(StatePatch::new().with_content(report));
        }
        self.checkpointer
            .save(Checkpoint::capture(
                &job.task_id,
                WorkflowStep::ContentGeneration,
                &state,
            ))
            .await?;
        Ok(())
    }
}

/// Produce one artifact. Failures are data, not control flow: the caller
/// decides what a failed concept means for the task.
#[allow(clippy::too_many_arguments)]
async fn generate_artifact(
    kind: ArtifactKind,
    concept: &Concept,
    profile: Option<&UserProfile>,
    agents: &Agents,
    bus: &Arc<NotificationBus>,
    object_store: &dyn ObjectStore,
    task_id: &str,
    roadmap_id: &str,
) -> ArtifactOutcome {
    let observe = {
        let bus = Arc::clone(bus);
        let workflow_id = task_id.to_string();
        move |activity: ToolActivity| match activity {
            ToolActivity::Call { name, arguments } => bus.publish(ProgressEvent::ToolCall {
                workflow_id: workflow_id.clone(),
                name,
                arguments,
            }),
            ToolActivity::Result { name, summary } => bus.publish(ProgressEvent::ToolResult {
                workflow_id: workflow_id.clone(),
                name,
                summary,
            }),
        }
    };

    match kind {
        ArtifactKind::Tutorial => {
            let draft = match agents.generate_tutorial(concept, profile, &observe).await {
                Ok(draft) => draft,
                Err(error) => return ArtifactOutcome::Failed(error.to_string()),
            };
            // Stream the body to subscribers, then upload it.
            for chunk in chunk_text(&draft.body, CHUNK_SIZE) {
                bus.publish(ProgressEvent::ContentChunk {
                    workflow_id: task_id.to_string(),
                    concept_id: Some(concept.concept_id.clone()),
                    chunk,
                });
            }
            let content_url = match draft.content_url {
                Some(url) => Some(url),
                None if !draft.body.is_empty() => {
                    match object_store
                        .put_tutorial(roadmap_id, &concept.concept_id, &draft.body)
                        .await
                    {
                        Ok(url) => Some(url),
                        Err(message) => return ArtifactOutcome::Failed(message),
                    }
                }
                None => None,
            };
            ArtifactOutcome::Done(ArtifactPayload::Tutorial {
                summary: draft.summary,
                content_url,
            })
        }
        ArtifactKind::Resources => {
            match agents.recommend_resources(concept, profile, &observe).await {
                Ok(resources) => ArtifactOutcome::Done(ArtifactPayload::Resources(resources)),
                Err(error) => ArtifactOutcome::Failed(error.to_string()),
            }
        }
        ArtifactKind::Quiz => match agents.generate_quiz(concept, profile).await {
            Ok(questions) => ArtifactOutcome::Done(ArtifactPayload::Quiz(questions)),
            Err(error) => ArtifactOutcome::Failed(error.to_string()),
        },
    }
}

fn chunk_text(text: &str, size: usize) -> Vec<String> {
    if text.is_empty() {
        return Vec::new();
    }
    let mut chunks = Vec::new();
    let mut start = 0;
    while start < text.len() {
        let mut end = (start + size).min(text.len());
        while !text.is_char_boundary(end) {
            end -= 1;
        }
        chunks.push(text[start..end].to_string());
        start = end;
    }
    chunks
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunking_respects_char_boundaries() {
        let text = "é".repeat(300);
        let chunks = chunk_text(&text, 400);
        assert_eq!(chunks.join(""), text);
        assert!(chunks.iter().all(|c| c.len() <= 400));
    }

    #[test]
    fn job_spec_decodes_only_content_payloads() {
        let payload = JobPayload::GenerateContent {
            task_id: "t".into(),
            roadmap_id: "r".into(),
            kinds: vec![ArtifactKind::Quiz],
            concept_ids: None,
        };
        assert!(ContentJobSpec::from_payload(&payload).is_some());
        assert!(
            ContentJobSpec::from_payload(&JobPayload::RunWorkflow { task_id: "t".into() })
                .is_none()
        );
    }
}
