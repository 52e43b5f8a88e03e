//! Request-handler façade.
//!
//! The thin boundary an HTTP/SSE layer calls into. Each operation validates
//! its input, touches the repositories through a scope, enqueues work, and
//! returns; no LLM call ever runs on the request path. Transport concerns
//! (routes, serialization of [`StatusView`], SSE framing of
//! [`ProgressStream`]) belong to the caller.

use miette::Diagnostic;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::sync::Arc;
use thiserror::Error;
use tracing::instrument;
use uuid::Uuid;

use crate::events::{NotificationBus, ProgressEvent, ProgressStream};
use crate::model::{Progress, Task};
use crate::queue::{JobPayload, QueueError, QueueName, TaskQueue};
use crate::repo::{RepoError, RepoFactory, RoadmapRepo, TaskRepo};
use crate::runtime::executor::{ExecutorError, RunOutcome, WorkflowExecutor};
use crate::runtime::{CancelToken, StateManager};
use crate::types::{ArtifactKind, ContentStatus, ReviewDecision, TaskStatus, WorkflowStep};

#[derive(Debug, Error, Diagnostic)]
pub enum HandlerError {
    /// The submitted document failed validation.
    #[error("invalid request: {message}")]
    #[diagnostic(code(roadweave::handler::invalid_request))]
    InvalidRequest { message: String },

    #[error(transparent)]
    #[diagnostic(code(roadweave::handler::repo))]
    Repo(#[from] RepoError),

    #[error(transparent)]
    #[diagnostic(code(roadweave::handler::queue))]
    Queue(#[from] QueueError),

    #[error(transparent)]
    #[diagnostic(code(roadweave::handler::executor))]
    Executor(#[from] ExecutorError),
}

/// Projection returned by `get_status`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StatusView {
    pub task_id: String,
    pub status: TaskStatus,
    /// Last step recorded on the task row.
    pub current_step: Option<WorkflowStep>,
    /// Step executing right now in this process, if any.
    pub live_step: Option<WorkflowStep>,
    pub roadmap_id: Option<String>,
    pub progress: Option<Progress>,
}

pub struct RequestHandler {
    repos: Arc<RepoFactory>,
    queue: Arc<dyn TaskQueue>,
    bus: Arc<NotificationBus>,
    executor: Arc<WorkflowExecutor>,
    state_manager: Arc<StateManager>,
    cancel: CancelToken,
}

impl RequestHandler {
    pub fn new(
        repos: Arc<RepoFactory>,
        queue: Arc<dyn TaskQueue>,
        bus: Arc<NotificationBus>,
        executor: Arc<WorkflowExecutor>,
        state_manager: Arc<StateManager>,
        cancel: CancelToken,
    ) -> Self {
        Self {
            repos,
            queue,
            bus,
            executor,
            state_manager,
            cancel,
        }
    }

    /// Submit a roadmap-generation request. Returns the task id.
    ///
    /// Idempotent on a client-supplied `task_id`: resubmitting an id that
    /// already has a row returns that id without enqueueing new work.
    #[instrument(skip(self, user_request), err)]
    pub async fn submit(
        &self,
        user_id: &str,
        user_request: Value,
        task_id: Option<String>,
    ) -> Result<String, HandlerError> {
        validate_request(user_id, &user_request)?;

        let task_id = task_id.unwrap_or_else(|| Uuid::new_v4().to_string());
        {
            let mut scope = self.repos.begin().await?;
            match TaskRepo::get(&mut scope, &task_id).await {
                Ok(_) => {
                    scope.commit().await?;
                    return Ok(task_id);
                }
                Err(RepoError::NotFound { .. }) => {}
                Err(other) => return Err(other.into()),
            }
            let task = Task::new(
                task_id.clone(),
                user_id.to_string(),
                "roadmap_generation",
                user_request,
            );
            TaskRepo::upsert(&mut scope, &task).await?;
            scope.commit().await?;
        }

        let job_id = self
            .queue
            .enqueue(
                QueueName::Content,
                JobPayload::RunWorkflow {
                    task_id: task_id.clone(),
                },
            )
            .await?;
        let mut scope = self.repos.begin().await?;
        TaskRepo::set_queue_job(&mut scope, &task_id, &job_id).await?;
        scope.commit().await?;

        Ok(task_id)
    }

    /// Task status plus the projected artifact progress.
    #[instrument(skip(self), err)]
    pub async fn get_status(&self, task_id: &str) -> Result<StatusView, HandlerError> {
        let mut scope = self.repos.begin().await?;
        let task = TaskRepo::get(&mut scope, task_id).await?;
        let progress = match &task.roadmap_id {
            Some(roadmap_id) => match RoadmapRepo::get(&mut scope, roadmap_id).await {
                Ok(roadmap) => Some(roadmap.framework.progress()),
                Err(RepoError::NotFound { .. }) => None,
                Err(other) => return Err(other.into()),
            },
            None => None,
        };
        scope.commit().await?;

        Ok(StatusView {
            task_id: task.task_id.clone(),
            status: task.status,
            current_step: task.current_step,
            live_step: self.state_manager.get(task_id),
            roadmap_id: task.roadmap_id,
            progress,
        })
    }

    /// Subscribe to a task's progress events.
    ///
    /// The stream should be closed by the consumer after an event with
    /// [`ProgressEvent::closes_stream`]. A task that is already terminal
    /// gets an immediate `workflow_completed` so late subscribers do not
    /// hang.
    #[instrument(skip(self), err)]
    pub async fn stream_progress(&self, task_id: &str) -> Result<ProgressStream, HandlerError> {
        let stream = self.bus.subscribe(task_id);
        let mut scope = self.repos.begin().await?;
        let task = TaskRepo::get(&mut scope, task_id).await?;
        scope.commit().await?;
        if task.status.is_terminal() {
            self.bus.publish(ProgressEvent::WorkflowCompleted {
                workflow_id: task_id.to_string(),
                status: task.status,
            });
        }
        Ok(stream)
    }

    /// Apply an external review decision to a suspended workflow.
    #[instrument(skip(self, decision), err)]
    pub async fn review(
        &self,
        task_id: &str,
        decision: ReviewDecision,
    ) -> Result<RunOutcome, HandlerError> {
        Ok(self
            .executor
            .resume(task_id, decision, self.cancel.clone())
            .await?)
    }

    /// Re-run the failed artifacts of a roadmap. Returns the new task id.
    #[instrument(skip(self), err)]
    pub async fn retry_failed(
        &self,
        roadmap_id: &str,
        kinds: Vec<ArtifactKind>,
    ) -> Result<String, HandlerError> {
        let kinds = if kinds.is_empty() {
            ArtifactKind::ALL.to_vec()
        } else {
            kinds
        };
        let roadmap = {
            let mut scope = self.repos.begin().await?;
            let roadmap = RoadmapRepo::get(&mut scope, roadmap_id).await?;
            scope.commit().await?;
            roadmap
        };

        let failed: Vec<String> = roadmap
            .framework
            .concepts()
            .filter(|concept| {
                kinds
                    .iter()
                    .any(|kind| concept.artifact_status(*kind) == ContentStatus::Failed)
            })
            .map(|concept| concept.concept_id.clone())
            .collect();
        if failed.is_empty() {
            return Err(HandlerError::InvalidRequest {
                message: format!("roadmap {roadmap_id} has no failed artifacts to retry"),
            });
        }

        self.spawn_content_task(&roadmap.user_id, roadmap_id, kinds, failed)
            .await
    }

    /// Regenerate specific artifacts for one concept. Returns the new task
    /// id.
    #[instrument(skip(self), err)]
    pub async fn regenerate_concept(
        &self,
        roadmap_id: &str,
        concept_id: &str,
        kinds: Vec<ArtifactKind>,
    ) -> Result<String, HandlerError> {
        let kinds = if kinds.is_empty() {
            ArtifactKind::ALL.to_vec()
        } else {
            kinds
        };
        let roadmap = {
            let mut scope = self.repos.begin().await?;
            let roadmap = RoadmapRepo::get(&mut scope, roadmap_id).await?;
            scope.commit().await?;
            roadmap
        };
        if roadmap.framework.concept(concept_id).is_none() {
            return Err(HandlerError::InvalidRequest {
                message: format!("concept {concept_id} is not part of roadmap {roadmap_id}"),
            });
        }

        self.spawn_content_task(
            &roadmap.user_id,
            roadmap_id,
            kinds,
            vec![concept_id.to_string()],
        )
        .await
    }

    /// Create a follow-up content task over a concept subset and enqueue it.
    async fn spawn_content_task(
        &self,
        user_id: &str,
        roadmap_id: &str,
        kinds: Vec<ArtifactKind>,
        concept_ids: Vec<String>,
    ) -> Result<String, HandlerError> {
        let task_id = Uuid::new_v4().to_string();
        let mut task = Task::new(
            task_id.clone(),
            user_id.to_string(),
            "content_regeneration",
            json!({"roadmap_id": roadmap_id, "kinds": kinds, "concept_ids": concept_ids}),
        );
        task.status = TaskStatus::Processing;
        task.current_step = Some(WorkflowStep::ContentGeneration);
        task.roadmap_id = Some(roadmap_id.to_string());

        {
            let mut scope = self.repos.begin().await?;
            TaskRepo::upsert(&mut scope, &task).await?;
            scope.commit().await?;
        }

        let job_id = self
            .queue
            .enqueue(
                QueueName::Content,
                JobPayload::GenerateContent {
                    task_id: task_id.clone(),
                    roadmap_id: roadmap_id.to_string(),
                    kinds,
                    concept_ids: Some(concept_ids),
                },
            )
            .await?;
        let mut scope = self.repos.begin().await?;
        TaskRepo::set_queue_job(&mut scope, &task_id, &job_id).await?;
        scope.commit().await?;

        Ok(task_id)
    }
}

/// Validate a submission against the expected request shape.
fn validate_request(user_id: &str, user_request: &Value) -> Result<(), HandlerError> {
    if user_id.trim().is_empty() {
        return Err(HandlerError::InvalidRequest {
            message: "user_id must not be empty".to_string(),
        });
    }
    let Some(object) = user_request.as_object() else {
        return Err(HandlerError::InvalidRequest {
            message: "user_request must be a JSON object".to_string(),
        });
    };
    let has_goal = ["goal", "text", "request"]
        .iter()
        .any(|key| object.get(*key).and_then(Value::as_str).is_some_and(|s| !s.trim().is_empty()));
    if !has_goal {
        return Err(HandlerError::InvalidRequest {
            message: "user_request needs a non-empty goal, text, or request field".to_string(),
        });
    }
    Ok(())
}
