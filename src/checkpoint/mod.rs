//! Checkpoint infrastructure.
//!
//! A checkpoint is a durable snapshot of [`WorkflowState`] taken after every
//! node, keyed by `(workflow_id, step)`. The store is an append-only log;
//! resume always reads the latest entry. Serialization is opaque to the rest
//! of the engine; nodes and the executor never see the persisted shape.
//!
//! Two backends ship with the crate:
//! - [`InMemoryCheckpointer`]: volatile, for tests and ephemeral runs;
//! - [`sqlite::SqliteCheckpointStore`]: durable, with its own small
//!   connection pool opened explicitly via `connect` (never in a
//!   constructor).
//!
//! The same backing store also keeps the advisory [`LeaseStore`] the
//! recovery sweeper uses to guarantee at most one live executor per
//! workflow id.

pub mod sqlite;

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use miette::Diagnostic;
use rustc_hash::FxHashMap;
use std::sync::RwLock;
use std::time::Duration;
use thiserror::Error;

use crate::state::WorkflowState;
use crate::types::WorkflowStep;

pub use sqlite::SqliteCheckpointStore;

/// A durable snapshot of workflow state at a node boundary.
#[derive(Debug, Clone)]
pub struct Checkpoint {
    pub workflow_id: String,
    /// The node that just completed (or suspended) when this was taken.
    pub step: WorkflowStep,
    pub state: WorkflowState,
    pub created_at: DateTime<Utc>,
}

impl Checkpoint {
    /// Snapshot the given state at a step boundary.
    #[must_use]
    pub fn capture(workflow_id: &str, step: WorkflowStep, state: &WorkflowState) -> Self {
        Self {
            workflow_id: workflow_id.to_string(),
            step,
            state: state.clone(),
            created_at: Utc::now(),
        }
    }
}

/// Errors from checkpoint store operations.
#[derive(Debug, Error, Diagnostic)]
pub enum CheckpointerError {
    /// Backend storage error (database, filesystem).
    #[error("backend error: {message}")]
    #[diagnostic(
        code(roadweave::checkpoint::backend),
        help("Check backend connectivity and permissions; backend message: {message}.")
    )]
    Backend { message: String },

    /// Snapshot (de)serialization failure.
    #[error("snapshot codec error: {message}")]
    #[diagnostic(code(roadweave::checkpoint::codec))]
    Codec { message: String },
}

pub type Result<T> = std::result::Result<T, CheckpointerError>;

/// Persistent storage for workflow checkpoints.
///
/// Implementations must make `save` idempotent (re-saving the same step is
/// safe; the content queue is at-least-once) and keep `load_latest`
/// consistent with the most recent `save`.
#[async_trait]
pub trait Checkpointer: Send + Sync {
    /// Append a checkpoint to the workflow's log.
    async fn save(&self, checkpoint: Checkpoint) -> Result<()>;

    /// The most recent checkpoint for a workflow, if any.
    async fn load_latest(&self, workflow_id: &str) -> Result<Option<Checkpoint>>;

    /// Full checkpoint log for a workflow, oldest first.
    async fn list(&self, workflow_id: &str) -> Result<Vec<Checkpoint>>;
}

/// Advisory, TTL-bounded claim of a workflow id by one worker.
///
/// Leases prevent two executors from driving the same workflow at once; an
/// expired lease may be reclaimed by any worker.
#[async_trait]
pub trait LeaseStore: Send + Sync {
    /// Try to claim the workflow. Returns `false` when another worker holds
    /// an unexpired lease.
    async fn try_acquire(&self, workflow_id: &str, worker_id: &str, ttl: Duration)
    -> Result<bool>;

    /// Release a claim. Releasing a lease held by someone else is a no-op.
    async fn release(&self, workflow_id: &str, worker_id: &str) -> Result<()>;
}

/// Volatile checkpoint log + lease table for tests and ephemeral runs.
#[derive(Default)]
pub struct InMemoryCheckpointer {
    log: RwLock<FxHashMap<String, Vec<Checkpoint>>>,
    leases: RwLock<FxHashMap<String, (String, DateTime<Utc>)>>,
}

impl InMemoryCheckpointer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Checkpointer for InMemoryCheckpointer {
    async fn save(&self, checkpoint: Checkpoint) -> Result<()> {
        let mut log = self.log.write().map_err(|e| CheckpointerError::Backend {
            message: format!("lock poisoned: {e}"),
        })?;
        log.entry(checkpoint.workflow_id.clone())
            .or_default()
            .push(checkpoint);
        Ok(())
    }

    async fn load_latest(&self, workflow_id: &str) -> Result<Option<Checkpoint>> {
        let log = self.log.read().map_err(|e| CheckpointerError::Backend {
            message: format!("lock poisoned: {e}"),
        })?;
        Ok(log.get(workflow_id).and_then(|entries| entries.last().cloned()))
    }

    async fn list(&self, workflow_id: &str) -> Result<Vec<Checkpoint>> {
        let log = self.log.read().map_err(|e| CheckpointerError::Backend {
            message: format!("lock poisoned: {e}"),
        })?;
        Ok(log.get(workflow_id).cloned().unwrap_or_default())
    }
}

#[async_trait]
impl LeaseStore for InMemoryCheckpointer {
    async fn try_acquire(
        &self,
        workflow_id: &str,
        worker_id: &str,
        ttl: Duration,
    ) -> Result<bool> {
        let mut leases = self.leases.write().map_err(|e| CheckpointerError::Backend {
            message: format!("lock poisoned: {e}"),
        })?;
        let now = Utc::now();
        if let Some((holder, expires_at)) = leases.get(workflow_id) {
            if *expires_at > now && holder != worker_id {
                return Ok(false);
            }
        }
        let expires_at = now
            + ChronoDuration::from_std(ttl).unwrap_or_else(|_| ChronoDuration::seconds(900));
        leases.insert(
            workflow_id.to_string(),
            (worker_id.to_string(), expires_at),
        );
        Ok(true)
    }

    async fn release(&self, workflow_id: &str, worker_id: &str) -> Result<()> {
        let mut leases = self.leases.write().map_err(|e| CheckpointerError::Backend {
            message: format!("lock poisoned: {e}"),
        })?;
        if let Some((holder, _)) = leases.get(workflow_id) {
            if holder == worker_id {
                leases.remove(workflow_id);
            }
        }
        Ok(())
    }
}
