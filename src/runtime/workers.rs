//! Queue worker loops.
//!
//! Two roles: the *content worker* drains the content queue (workflow
//! drives and content fan-out jobs) and the *logs worker* drains the logs
//! queue (execution-log appends). Both loops are shutdown-aware: they poll
//! with a short wait and exit when the cancel token fires.
//!
//! Job handling is at-least-once: a job is acked when its effect is durable
//! or provably already applied, and nacked with a delay when the failure
//! looks retryable.

use std::sync::Arc;
use std::time::Duration;

use crate::queue::{Job, JobPayload, QueueName, TaskQueue};
use crate::repo::{ExecutionLogRepo, RepoFactory};

use super::cancel::CancelToken;
use super::content::{ContentEngine, ContentError, ContentJobSpec};
use super::executor::{ExecutorError, WorkflowExecutor};

/// Delay before a failed job is redelivered.
const NACK_DELAY: Duration = Duration::from_secs(5);

/// Drain the content queue until cancelled.
pub async fn run_content_worker(
    queue: Arc<dyn TaskQueue>,
    executor: Arc<WorkflowExecutor>,
    content: Arc<ContentEngine>,
    cancel: CancelToken,
) {
    loop {
        if cancel.is_cancelled() {
            return;
        }
        let job = match queue.poll(QueueName::Content).await {
            Ok(Some(job)) => job,
            Ok(None) => continue,
            Err(error) => {
                tracing::error!(error = %error, "content queue poll failed; worker exiting");
                return;
            }
        };
        handle_content_job(&queue, &executor, &content, job, &cancel).await;
    }
}

async fn handle_content_job(
    queue: &Arc<dyn TaskQueue>,
    executor: &Arc<WorkflowExecutor>,
    content: &Arc<ContentEngine>,
    job: Job,
    cancel: &CancelToken,
) {
    let job_id = job.job_id.clone();
    match &job.payload {
        JobPayload::RunWorkflow { task_id } => {
            match executor.run(task_id, cancel.clone()).await {
                Ok(_) => ack(queue, &job_id).await,
                // Fatal node failures already moved the task to failed;
                // redelivery would be a no-op against a terminal row.
                Err(ExecutorError::NodeFatal { .. }) => ack(queue, &job_id).await,
                Err(error) => {
                    tracing::error!(
                        task_id = %task_id,
                        error = %error,
                        "workflow drive failed; requeueing"
                    );
                    nack(queue, &job_id).await;
                }
            }
        }
        JobPayload::GenerateContent { .. } => {
            let Some(spec) = ContentJobSpec::from_payload(&job.payload) else {
                ack(queue, &job_id).await;
                return;
            };
            match content.run(&spec, cancel).await {
                Ok(_) => ack(queue, &job_id).await,
                // Cancellation persisted partial progress; the sweeper
                // owns the retry, not the queue.
                Err(ContentError::Cancelled) => ack(queue, &job_id).await,
                Err(error) => {
                    tracing::error!(
                        task_id = %spec.task_id,
                        error = %error,
                        "content fan-out failed; requeueing"
                    );
                    nack(queue, &job_id).await;
                }
            }
        }
        JobPayload::AppendLog { .. } => {
            // Misrouted; the logs worker owns these.
            ack(queue, &job_id).await;
        }
    }
}

/// Drain the logs queue until cancelled.
pub async fn run_logs_worker(
    queue: Arc<dyn TaskQueue>,
    repos: Arc<RepoFactory>,
    cancel: CancelToken,
) {
    loop {
        if cancel.is_cancelled() {
            return;
        }
        let job = match queue.poll(QueueName::Logs).await {
            Ok(Some(job)) => job,
            Ok(None) => continue,
            Err(error) => {
                tracing::error!(error = %error, "logs queue poll failed; worker exiting");
                return;
            }
        };
        let JobPayload::AppendLog { entry } = &job.payload else {
            ack(&queue, &job.job_id).await;
            continue;
        };
        let result = async {
            let mut scope = repos.begin().await?;
            ExecutionLogRepo::append(&mut scope, entry).await?;
            scope.commit().await
        }
        .await;
        match result {
            Ok(()) => ack(&queue, &job.job_id).await,
            Err(error) => {
                tracing::warn!(error = %error, "execution log append failed; requeueing");
                nack(&queue, &job.job_id).await;
            }
        }
    }
}

async fn ack(queue: &Arc<dyn TaskQueue>, job_id: &str) {
    if let Err(error) = queue.ack(job_id).await {
        tracing::warn!(job_id, error = %error, "ack failed");
    }
}

async fn nack(queue: &Arc<dyn TaskQueue>, job_id: &str) {
    if let Err(error) = queue.nack(job_id, NACK_DELAY).await {
        tracing::warn!(job_id, error = %error, "nack failed");
    }
}
