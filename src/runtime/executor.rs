//! Workflow executor.
//!
//! Binds the runners, the router, the checkpointer, and the live-step
//! registry into a drivable state machine. The loop per node is always:
//! mark live → publish `node_started` → run under the error handler → merge
//! the patch → checkpoint → route. Every node boundary is therefore a
//! resume point: crash anywhere and `run` picks up from the latest
//! checkpoint with no duplicated writes (repository upserts absorb the
//! replayed node).
//!
//! Suspension is a return value, not a blocked future: human review returns
//! [`RunOutcome::Suspended`] and a later [`WorkflowExecutor::resume`] call
//! reloads the checkpoint and merges the external decision into state.

use miette::Diagnostic;
use rustc_hash::FxHashMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::instrument;
use uuid::Uuid;

use crate::agents::Agents;
use crate::checkpoint::{Checkpoint, Checkpointer, CheckpointerError};
use crate::config::EngineConfig;
use crate::events::{NotificationBus, ProgressEvent};
use crate::model::Framework;
use crate::queue::TaskQueue;
use crate::repo::{RepoError, RepoFactory, RoadmapRepo, TaskRepo};
use crate::state::{StatePatch, WorkflowState};
use crate::types::{ReviewDecision, TaskStatus, WorkflowStep};

use super::cancel::CancelToken;
use super::error_handler::{FailureKind, RetryPolicy, handle_node_execution};
use super::node::{NodeContext, NodeOutcome, NodeRunner};
use super::nodes::all_runners;
use super::router;
use super::state_manager::StateManager;

/// How a drive of the workflow ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    /// The workflow reached a terminal task status.
    Completed(TaskStatus),
    /// Suspended awaiting an external review decision.
    Suspended(WorkflowStep),
    /// An enqueued content job now owns the run.
    HandedOff,
    /// Cancellation was requested; state is checkpointed, status untouched.
    Cancelled,
    /// A node failure surfaced and the task was marked failed.
    Failed(FailureKind),
}

#[derive(Debug, Error, Diagnostic)]
pub enum ExecutorError {
    #[error(transparent)]
    #[diagnostic(code(roadweave::executor::repo))]
    Repo(#[from] RepoError),

    #[error(transparent)]
    #[diagnostic(code(roadweave::executor::checkpoint))]
    Checkpoint(#[from] CheckpointerError),

    /// Resume was called for a workflow that never checkpointed.
    #[error("no checkpoint for workflow: {workflow_id}")]
    #[diagnostic(
        code(roadweave::executor::no_checkpoint),
        help("The workflow must have run at least one node before resume.")
    )]
    NoCheckpoint { workflow_id: String },

    /// An edit decision carried an unusable framework document.
    #[error("invalid review payload: {message}")]
    #[diagnostic(code(roadweave::executor::invalid_decision))]
    InvalidDecision { message: String },

    /// A fatal node failure; the task row is already marked failed.
    #[error("fatal failure at {step}: {message}")]
    #[diagnostic(code(roadweave::executor::node_fatal))]
    NodeFatal { step: WorkflowStep, message: String },
}

pub struct WorkflowExecutor {
    runners: FxHashMap<WorkflowStep, Box<dyn NodeRunner>>,
    repos: Arc<RepoFactory>,
    agents: Arc<Agents>,
    queue: Arc<dyn TaskQueue>,
    bus: Arc<NotificationBus>,
    checkpointer: Arc<dyn Checkpointer>,
    state_manager: Arc<StateManager>,
    config: Arc<EngineConfig>,
    retry: RetryPolicy,
}

impl WorkflowExecutor {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        repos: Arc<RepoFactory>,
        agents: Arc<Agents>,
        queue: Arc<dyn TaskQueue>,
        bus: Arc<NotificationBus>,
        checkpointer: Arc<dyn Checkpointer>,
        state_manager: Arc<StateManager>,
        config: Arc<EngineConfig>,
    ) -> Self {
        let runners = all_runners()
            .into_iter()
            .map(|runner| (runner.step(), runner))
            .collect();
        Self {
            runners,
            repos,
            agents,
            queue,
            bus,
            checkpointer,
            state_manager,
            config,
            retry: RetryPolicy::default(),
        }
    }

    fn context(&self, workflow_id: &str, cancel: CancelToken) -> NodeContext {
        NodeContext {
            workflow_id: workflow_id.to_string(),
            repos: Arc::clone(&self.repos),
            agents: Arc::clone(&self.agents),
            queue: Arc::clone(&self.queue),
            bus: Arc::clone(&self.bus),
            config: Arc::clone(&self.config),
            cancel,
        }
    }

    /// Drive a workflow from its latest checkpoint (or from scratch) until
    /// it completes, suspends, hands off, or fails.
    ///
    /// Driving an already-terminal task is a no-op returning the terminal
    /// status.
    #[instrument(skip(self, cancel), err)]
    pub async fn run(
        &self,
        workflow_id: &str,
        cancel: CancelToken,
    ) -> Result<RunOutcome, ExecutorError> {
        let task = {
            let mut scope = self.repos.begin().await?;
            let task = TaskRepo::get(&mut scope, workflow_id).await?;
            scope.commit().await?;
            task
        };
        if task.status.is_terminal() {
            return Ok(RunOutcome::Completed(task.status));
        }

        let state = match self.checkpointer.load_latest(workflow_id).await? {
            Some(checkpoint) => checkpoint.state,
            None => {
                let mut state =
                    WorkflowState::new(&task.task_id, &task.user_id, task.user_request.clone());
                state.roadmap_id = task.roadmap_id.clone();
                state
            }
        };

        if task.status == TaskStatus::Pending {
            let mut scope = self.repos.begin().await?;
            TaskRepo::set_status(&mut scope, workflow_id, TaskStatus::Processing, None, None)
                .await?;
            scope.commit().await?;
        }

        self.drive(state, cancel).await
    }

    /// Resume a suspended workflow with an external review decision.
    ///
    /// Resuming a terminal task is a no-op returning the terminal status.
    #[instrument(skip(self, decision, cancel), err)]
    pub async fn resume(
        &self,
        workflow_id: &str,
        decision: ReviewDecision,
        cancel: CancelToken,
    ) -> Result<RunOutcome, ExecutorError> {
        let task = {
            let mut scope = self.repos.begin().await?;
            let task = TaskRepo::get(&mut scope, workflow_id).await?;
            scope.commit().await?;
            task
        };
        if task.status.is_terminal() {
            return Ok(RunOutcome::Completed(task.status));
        }

        let checkpoint = self
            .checkpointer
            .load_latest(workflow_id)
            .await?
            .ok_or_else(|| ExecutorError::NoCheckpoint {
                workflow_id: workflow_id.to_string(),
            })?;
        let mut state = checkpoint.state;

        match decision {
            ReviewDecision::Reject => {
                let mut scope = self.repos.begin().await?;
                TaskRepo::set_status(
                    &mut scope,
                    workflow_id,
                    TaskStatus::Rejected,
                    Some(WorkflowStep::HumanReview),
                    None,
                )
                .await?;
                scope.commit().await?;

                state.apply(StatePatch::new().with_review(ReviewDecision::Reject));
                self.checkpointer
                    .save(Checkpoint::capture(
                        workflow_id,
                        WorkflowStep::HumanReview,
                        &state,
                    ))
                    .await?;
                self.finish(workflow_id, TaskStatus::Rejected);
                Ok(RunOutcome::Completed(TaskStatus::Rejected))
            }
            ReviewDecision::Approve => {
                state.apply(StatePatch::new().with_review(ReviewDecision::Approve));
                self.mark_processing(workflow_id).await?;
                self.drive(state, cancel).await
            }
            ReviewDecision::Edit { framework } => {
                let mut edited: Framework = serde_json::from_value(framework.clone())
                    .map_err(|e| ExecutorError::InvalidDecision {
                        message: e.to_string(),
                    })?;
                for concept in edited.concepts_mut() {
                    if concept.concept_id.is_empty() {
                        concept.concept_id = Uuid::new_v4().to_string();
                    }
                }
                if let Some(roadmap_id) = state.roadmap_id.as_deref() {
                    let mut scope = self.repos.begin().await?;
                    RoadmapRepo::update_framework(&mut scope, roadmap_id, &edited).await?;
                    scope.commit().await?;
                }
                state.apply(
                    StatePatch::new()
                        .with_framework(edited)
                        .with_review(ReviewDecision::Edit { framework }),
                );
                self.mark_processing(workflow_id).await?;
                self.drive(state, cancel).await
            }
        }
    }

    async fn mark_processing(&self, workflow_id: &str) -> Result<(), ExecutorError> {
        let mut scope = self.repos.begin().await?;
        TaskRepo::set_status(&mut scope, workflow_id, TaskStatus::Processing, None, None).await?;
        scope.commit().await?;
        Ok(())
    }

    /// Publish the terminal event and drop the workflow's subscribers.
    fn finish(&self, workflow_id: &str, status: TaskStatus) {
        self.bus.publish(ProgressEvent::WorkflowCompleted {
            workflow_id: workflow_id.to_string(),
            status,
        });
        self.bus.close_workflow(workflow_id);
        self.state_manager.clear(workflow_id);
    }

    /// The node loop shared by `run` and `resume`.
    async fn drive(
        &self,
        mut state: WorkflowState,
        cancel: CancelToken,
    ) -> Result<RunOutcome, ExecutorError> {
        let workflow_id = state.task_id.clone();
        let ctx = self.context(&workflow_id, cancel.clone());

        loop {
            let step = router::next_step(&state, &self.config.workflow);

            if step == WorkflowStep::End {
                let status = state
                    .content
                    .as_ref()
                    .map(|report| report.status)
                    .unwrap_or(TaskStatus::Completed);
                let mut scope = self.repos.begin().await?;
                TaskRepo::set_status(
                    &mut scope,
                    &workflow_id,
                    status,
                    Some(WorkflowStep::End),
                    None,
                )
                .await?;
                scope.commit().await?;
                self.checkpointer
                    .save(Checkpoint::capture(&workflow_id, WorkflowStep::End, &state))
                    .await?;
                self.finish(&workflow_id, status);
                return Ok(RunOutcome::Completed(status));
            }

            if cancel.is_cancelled() {
                self.checkpointer
                    .save(Checkpoint::capture(&workflow_id, step, &state))
                    .await?;
                self.state_manager.clear(&workflow_id);
                return Ok(RunOutcome::Cancelled);
            }

            // Steps without a runner cannot occur: the router only returns
            // the six runnable steps or End, and every runnable step is
            // registered in `new`.
            let runner = self
                .runners
                .get(&step)
                .expect("router returned an unregistered step");

            self.state_manager.set(&workflow_id, step);
            self.bus.publish(ProgressEvent::NodeStarted {
                workflow_id: workflow_id.clone(),
                step,
            });

            match handle_node_execution(runner.as_ref(), &state, &ctx, &self.retry).await {
                Ok(NodeOutcome::Advance(patch)) => {
                    state.apply(patch);
                    self.checkpointer
                        .save(Checkpoint::capture(&workflow_id, step, &state))
                        .await?;
                    self.bus.publish(ProgressEvent::NodeCompleted {
                        workflow_id: workflow_id.clone(),
                        step,
                    });
                }
                Ok(NodeOutcome::Suspend(patch)) => {
                    state.apply(patch);
                    self.checkpointer
                        .save(Checkpoint::capture(&workflow_id, step, &state))
                        .await?;
                    self.bus.publish(ProgressEvent::NodeCompleted {
                        workflow_id: workflow_id.clone(),
                        step,
                    });
                    self.bus.publish(ProgressEvent::WorkflowSuspended {
                        workflow_id: workflow_id.clone(),
                        step,
                    });
                    self.state_manager.clear(&workflow_id);
                    return Ok(RunOutcome::Suspended(step));
                }
                Ok(NodeOutcome::Handoff(patch)) => {
                    state.apply(patch);
                    self.checkpointer
                        .save(Checkpoint::capture(&workflow_id, step, &state))
                        .await?;
                    self.bus.publish(ProgressEvent::NodeCompleted {
                        workflow_id: workflow_id.clone(),
                        step,
                    });
                    self.state_manager.clear(&workflow_id);
                    return Ok(RunOutcome::HandedOff);
                }
                Err(failure) => match failure.kind {
                    FailureKind::Cancelled => {
                        self.checkpointer
                            .save(Checkpoint::capture(&workflow_id, step, &state))
                            .await?;
                        self.state_manager.clear(&workflow_id);
                        return Ok(RunOutcome::Cancelled);
                    }
                    FailureKind::Fatal => {
                        // The error handler already moved the task to failed
                        // with the payload; re-raise per policy.
                        self.finish(&workflow_id, TaskStatus::Failed);
                        return Err(ExecutorError::NodeFatal {
                            step,
                            message: failure.message,
                        });
                    }
                    _ => {
                        let mut scope = self.repos.begin().await?;
                        TaskRepo::set_status(
                            &mut scope,
                            &workflow_id,
                            TaskStatus::Failed,
                            Some(step),
                            None,
                        )
                        .await?;
                        scope.commit().await?;
                        self.finish(&workflow_id, TaskStatus::Failed);
                        return Ok(RunOutcome::Failed(failure.kind));
                    }
                },
            }
        }
    }
}
