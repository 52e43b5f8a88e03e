//! Recovery sweeper.
//!
//! Runs once at process startup and then periodically. A task is *stuck*
//! when it is non-terminal, its `updated_at` is older than the configured
//! age threshold, and no queue job is actively processing it. Stuck tasks
//! with a checkpoint are re-enqueued under an advisory lease; stuck tasks
//! without one cannot be resumed and are marked failed.
//!
//! The sweeper is also where the whole-workflow soft budget is enforced:
//! a non-terminal task older than the budget whose job is still live gets
//! its queue job cancelled, so the run checkpoints and exits at the next
//! cancellation check.

use chrono::{Duration as ChronoDuration, Utc};
use miette::Diagnostic;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::instrument;

use crate::checkpoint::{Checkpointer, CheckpointerError, LeaseStore};
use crate::config::RecoveryConfig;
use crate::queue::{JobPayload, QueueError, QueueName, TaskQueue};
use crate::repo::{RepoError, RepoFactory, TaskRepo};
use crate::types::TaskStatus;

use super::cancel::CancelToken;

#[derive(Debug, Error, Diagnostic)]
pub enum RecoveryError {
    #[error(transparent)]
    #[diagnostic(code(roadweave::recovery::repo))]
    Repo(#[from] RepoError),

    #[error(transparent)]
    #[diagnostic(code(roadweave::recovery::checkpoint))]
    Checkpoint(#[from] CheckpointerError),

    #[error(transparent)]
    #[diagnostic(code(roadweave::recovery::queue))]
    Queue(#[from] QueueError),
}

/// What one sweep did.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepReport {
    pub requeued: usize,
    pub marked_unrecoverable: usize,
    pub budget_cancelled: usize,
}

pub struct RecoverySweeper {
    repos: Arc<RepoFactory>,
    checkpointer: Arc<dyn Checkpointer>,
    leases: Arc<dyn LeaseStore>,
    queue: Arc<dyn TaskQueue>,
    config: RecoveryConfig,
    workflow_budget: Duration,
    /// Identity used for lease claims.
    worker_id: String,
}

impl RecoverySweeper {
    pub fn new(
        repos: Arc<RepoFactory>,
        checkpointer: Arc<dyn Checkpointer>,
        leases: Arc<dyn LeaseStore>,
        queue: Arc<dyn TaskQueue>,
        config: RecoveryConfig,
        workflow_budget: Duration,
        worker_id: String,
    ) -> Self {
        Self {
            repos,
            checkpointer,
            leases,
            queue,
            config,
            workflow_budget,
            worker_id,
        }
    }

    /// One sweep over the stale task set.
    #[instrument(skip(self), err)]
    pub async fn sweep_once(&self) -> Result<SweepReport, RecoveryError> {
        let mut report = SweepReport::default();
        if !self.config.enable {
            return Ok(report);
        }

        let age_cutoff = Utc::now() - ChronoDuration::hours(self.config.max_age_hours as i64);
        let budget_cutoff = Utc::now()
            - ChronoDuration::from_std(self.workflow_budget)
                .unwrap_or_else(|_| ChronoDuration::minutes(30));

        let stale = {
            let mut scope = self.repos.begin().await?;
            // The budget cutoff is the later of the two; fetch everything
            // past it and split below.
            let cutoff = age_cutoff.max(budget_cutoff);
            let stale = TaskRepo::list_stale(&mut scope, cutoff).await?;
            scope.commit().await?;
            stale
        };

        let mut handled = 0usize;
        for task in stale {
            if handled >= self.config.max_concurrent {
                break;
            }
            let job_active = match &task.queue_job_id {
                Some(job_id) => self.queue.is_active(job_id).await?,
                None => false,
            };

            if job_active {
                // Over the workflow budget with a live job: cancel it so the
                // run checkpoints and exits.
                if task.updated_at < budget_cutoff {
                    if let Some(job_id) = &task.queue_job_id {
                        self.queue.cancel(job_id).await?;
                        report.budget_cancelled += 1;
                        handled += 1;
                        tracing::warn!(
                            task_id = %task.task_id,
                            "workflow exceeded budget; cancelled its queue job"
                        );
                    }
                }
                continue;
            }

            if task.updated_at >= age_cutoff {
                continue;
            }

            let has_checkpoint = self
                .checkpointer
                .load_latest(&task.task_id)
                .await?
                .is_some();

            if !has_checkpoint {
                let mut scope = self.repos.begin().await?;
                TaskRepo::set_status(
                    &mut scope,
                    &task.task_id,
                    TaskStatus::Failed,
                    task.current_step,
                    Some(&json!({"reason": "unrecoverable", "swept_by": self.worker_id})),
                )
                .await?;
                scope.commit().await?;
                report.marked_unrecoverable += 1;
                handled += 1;
                continue;
            }

            let lease_ttl = Duration::from_secs(self.config.lease_ttl_seconds);
            if !self
                .leases
                .try_acquire(&task.task_id, &self.worker_id, lease_ttl)
                .await?
            {
                // Someone else is already resurrecting this workflow.
                continue;
            }

            let job_id = self
                .queue
                .enqueue(
                    QueueName::Content,
                    JobPayload::RunWorkflow {
                        task_id: task.task_id.clone(),
                    },
                )
                .await?;
            let mut scope = self.repos.begin().await?;
            TaskRepo::set_queue_job(&mut scope, &task.task_id, &job_id).await?;
            scope.commit().await?;
            report.requeued += 1;
            handled += 1;
            tracing::info!(
                task_id = %task.task_id,
                job_id = %job_id,
                "re-enqueued stuck workflow from checkpoint"
            );
        }

        Ok(report)
    }

    /// Startup sweep followed by the periodic loop.
    pub async fn run(&self, cancel: CancelToken) {
        if let Err(error) = self.sweep_once().await {
            tracing::error!(error = %error, "startup recovery sweep failed");
        }
        let interval = Duration::from_secs(self.config.sweep_interval_seconds.max(1));
        loop {
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = tokio::time::sleep(interval) => {}
            }
            match self.sweep_once().await {
                Ok(report) if report != SweepReport::default() => {
                    tracing::info!(
                        requeued = report.requeued,
                        unrecoverable = report.marked_unrecoverable,
                        budget_cancelled = report.budget_cancelled,
                        "recovery sweep finished"
                    );
                }
                Ok(_) => {}
                Err(error) => tracing::error!(error = %error, "recovery sweep failed"),
            }
        }
    }
}
