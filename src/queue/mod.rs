//! Two-queue task distribution.
//!
//! The engine separates cheap persistence writes (*logs* queue) from
//! LLM-bound work (*content* queue). The adapter contract is at-least-once:
//! a polled job stays in flight until it is acked, and a nack re-delivers it
//! after a delay. Handlers are idempotent by construction (every repository
//! write is an upsert), so duplicate delivery is harmless.
//!
//! [`InProcessQueue`] is the in-crate backend: flume channels per queue plus
//! an in-flight table. A distributed broker can replace it behind the same
//! [`TaskQueue`] trait.

use async_trait::async_trait;
use miette::Diagnostic;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

use crate::model::ExecutionLogEntry;
use crate::types::ArtifactKind;

/// The two named queues.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueName {
    /// Lightweight persistence writes.
    Logs,
    /// LLM-bound workflow and content jobs.
    Content,
}

impl fmt::Display for QueueName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QueueName::Logs => f.write_str("logs"),
            QueueName::Content => f.write_str("content"),
        }
    }
}

/// Work carried by a job.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum JobPayload {
    /// Drive a workflow from its latest checkpoint (or from scratch).
    RunWorkflow { task_id: String },
    /// Run content fan-out for a roadmap, optionally restricted to a subset
    /// of kinds and concepts (retries and regenerations).
    GenerateContent {
        task_id: String,
        roadmap_id: String,
        kinds: Vec<ArtifactKind>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        concept_ids: Option<Vec<String>>,
    },
    /// Append one execution log row.
    AppendLog { entry: ExecutionLogEntry },
}

/// One enqueued unit of work.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub job_id: String,
    pub queue: QueueName,
    pub payload: JobPayload,
    /// Delivery attempt, starting at 1.
    pub attempt: u32,
}

#[derive(Debug, Error, Diagnostic)]
pub enum QueueError {
    #[error("queue backend error: {message}")]
    #[diagnostic(code(roadweave::queue::backend))]
    Backend { message: String },

    #[error("queue is shut down")]
    #[diagnostic(code(roadweave::queue::closed))]
    Closed,
}

pub type QueueResult<T> = std::result::Result<T, QueueError>;

/// Queue adapter contract. Guarantees at-least-once delivery; exactly-once
/// is explicitly not promised.
#[async_trait]
pub trait TaskQueue: Send + Sync {
    /// Enqueue a job; returns its id (the task row's `queue_job_id`).
    async fn enqueue(&self, queue: QueueName, payload: JobPayload) -> QueueResult<String>;

    /// Take the next job, waiting briefly if the queue is idle. `None`
    /// means "nothing right now", not end-of-stream.
    async fn poll(&self, queue: QueueName) -> QueueResult<Option<Job>>;

    /// Acknowledge successful processing.
    async fn ack(&self, job_id: &str) -> QueueResult<()>;

    /// Return a job to its queue after `requeue_after`.
    async fn nack(&self, job_id: &str, requeue_after: Duration) -> QueueResult<()>;

    /// Cancel a job by id; pending deliveries are discarded.
    async fn cancel(&self, job_id: &str) -> QueueResult<()>;

    /// Whether the job is currently being processed by some worker. The
    /// recovery sweeper uses this to avoid re-enqueueing live work.
    async fn is_active(&self, job_id: &str) -> QueueResult<bool>;
}

/// How long a poll waits before reporting an idle queue.
const POLL_WAIT: Duration = Duration::from_millis(250);

struct Channel {
    tx: flume::Sender<Job>,
    rx: flume::Receiver<Job>,
}

impl Channel {
    fn new() -> Self {
        let (tx, rx) = flume::unbounded();
        Self { tx, rx }
    }
}

/// In-process queue backend.
pub struct InProcessQueue {
    logs: Channel,
    content: Channel,
    in_flight: Mutex<FxHashMap<String, Job>>,
    cancelled: Mutex<HashSet<String>>,
}

impl Default for InProcessQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl InProcessQueue {
    #[must_use]
    pub fn new() -> Self {
        Self {
            logs: Channel::new(),
            content: Channel::new(),
            in_flight: Mutex::new(FxHashMap::default()),
            cancelled: Mutex::new(HashSet::new()),
        }
    }

    fn channel(&self, queue: QueueName) -> &Channel {
        match queue {
            QueueName::Logs => &self.logs,
            QueueName::Content => &self.content,
        }
    }

    fn is_cancelled(&self, job_id: &str) -> bool {
        self.cancelled
            .lock()
            .expect("cancelled mutex poisoned")
            .contains(job_id)
    }

    /// Number of jobs currently in flight across both queues.
    #[must_use]
    pub fn in_flight_count(&self) -> usize {
        self.in_flight.lock().expect("in_flight mutex poisoned").len()
    }
}

#[async_trait]
impl TaskQueue for InProcessQueue {
    async fn enqueue(&self, queue: QueueName, payload: JobPayload) -> QueueResult<String> {
        let job = Job {
            job_id: Uuid::new_v4().to_string(),
            queue,
            payload,
            attempt: 1,
        };
        let job_id = job.job_id.clone();
        self.channel(queue)
            .tx
            .send(job)
            .map_err(|_| QueueError::Closed)?;
        Ok(job_id)
    }

    async fn poll(&self, queue: QueueName) -> QueueResult<Option<Job>> {
        let rx = self.channel(queue).rx.clone();
        loop {
            let job = match tokio::time::timeout(POLL_WAIT, rx.recv_async()).await {
                Ok(Ok(job)) => job,
                Ok(Err(_)) => return Err(QueueError::Closed),
                Err(_) => return Ok(None),
            };
            if self.is_cancelled(&job.job_id) {
                continue;
            }
            self.in_flight
                .lock()
                .expect("in_flight mutex poisoned")
                .insert(job.job_id.clone(), job.clone());
            return Ok(Some(job));
        }
    }

    async fn ack(&self, job_id: &str) -> QueueResult<()> {
        self.in_flight
            .lock()
            .expect("in_flight mutex poisoned")
            .remove(job_id);
        Ok(())
    }

    async fn nack(&self, job_id: &str, requeue_after: Duration) -> QueueResult<()> {
        let job = self
            .in_flight
            .lock()
            .expect("in_flight mutex poisoned")
            .remove(job_id);
        let Some(mut job) = job else {
            return Ok(());
        };
        job.attempt += 1;
        let tx = self.channel(job.queue).tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(requeue_after).await;
            let _ = tx.send(job);
        });
        Ok(())
    }

    async fn cancel(&self, job_id: &str) -> QueueResult<()> {
        self.cancelled
            .lock()
            .expect("cancelled mutex poisoned")
            .insert(job_id.to_string());
        self.in_flight
            .lock()
            .expect("in_flight mutex poisoned")
            .remove(job_id);
        Ok(())
    }

    async fn is_active(&self, job_id: &str) -> QueueResult<bool> {
        Ok(self
            .in_flight
            .lock()
            .expect("in_flight mutex poisoned")
            .contains_key(job_id))
    }
}

/// Shared handle alias used across the engine.
pub type SharedQueue = Arc<dyn TaskQueue>;
