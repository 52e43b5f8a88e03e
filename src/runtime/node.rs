//! Node execution contract.
//!
//! A [`NodeRunner`] is one step of the workflow: it receives the current
//! [`WorkflowState`] read-only plus a [`NodeContext`] with every service it
//! may touch, and returns the patch it produced. Runners never call one
//! another and never commit transactions beyond persisting their own node's
//! result. Sequencing belongs to the router and the executor.

use async_trait::async_trait;
use miette::Diagnostic;
use serde_json::Value;
use std::sync::Arc;
use thiserror::Error;

use crate::agents::{AgentError, Agents};
use crate::checkpoint::CheckpointerError;
use crate::config::EngineConfig;
use crate::events::{NotificationBus, ProgressEvent};
use crate::model::ExecutionLogEntry;
use crate::queue::{JobPayload, QueueError, QueueName, TaskQueue};
use crate::repo::{RepoError, RepoFactory};
use crate::state::{StatePatch, WorkflowState};
use crate::types::WorkflowStep;

use super::cancel::CancelToken;

/// What a runner hands back to the executor.
#[derive(Debug)]
pub enum NodeOutcome {
    /// Merge the patch and let the router pick the next node.
    Advance(StatePatch),
    /// Merge the patch, checkpoint, and suspend the workflow until an
    /// external `resume` call (human review).
    Suspend(StatePatch),
    /// Merge the patch, checkpoint, and return: an enqueued child job now
    /// owns the run (content fan-out). No terminal event is emitted so
    /// progress streams stay open.
    Handoff(StatePatch),
}

/// Errors a runner can raise. The error handler classifies these into the
/// retry taxonomy; see [`super::error_handler::classify`].
#[derive(Debug, Error, Diagnostic)]
pub enum NodeError {
    /// A field the runner depends on is missing from the state. Always a
    /// routing bug, so it classifies as fatal.
    #[error("missing expected input: {what}")]
    #[diagnostic(
        code(roadweave::node::missing_input),
        help("Check that the router ran the producing node first: {what}.")
    )]
    MissingInput { what: &'static str },

    /// Agent execution failed.
    #[error(transparent)]
    #[diagnostic(code(roadweave::node::agent))]
    Agent(#[from] AgentError),

    /// Repository access failed.
    #[error(transparent)]
    #[diagnostic(code(roadweave::node::repo))]
    Repo(#[from] RepoError),

    /// Checkpoint store access failed.
    #[error(transparent)]
    #[diagnostic(code(roadweave::node::checkpoint))]
    Checkpoint(#[from] CheckpointerError),

    /// Queue access failed.
    #[error(transparent)]
    #[diagnostic(code(roadweave::node::queue))]
    Queue(#[from] QueueError),

    /// The runner rejected a structurally invalid document.
    #[error("validation failed: {0}")]
    #[diagnostic(code(roadweave::node::validation))]
    Validation(String),

    /// The workflow was cancelled while this runner held the turn.
    #[error("node execution cancelled")]
    #[diagnostic(code(roadweave::node::cancelled))]
    Cancelled,
}

/// Services and identity handed to every runner invocation.
#[derive(Clone)]
pub struct NodeContext {
    /// Workflow id; equal to the task id.
    pub workflow_id: String,
    pub repos: Arc<RepoFactory>,
    pub agents: Arc<Agents>,
    pub queue: Arc<dyn TaskQueue>,
    pub bus: Arc<NotificationBus>,
    pub config: Arc<EngineConfig>,
    pub cancel: CancelToken,
}

impl NodeContext {
    /// Fail fast when the workflow has been cancelled.
    pub fn ensure_live(&self) -> Result<(), NodeError> {
        if self.cancel.is_cancelled() {
            Err(NodeError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Publish a progress event for this workflow.
    pub fn publish(&self, event: ProgressEvent) {
        self.bus.publish(event);
    }

    /// Enqueue an execution-log write on the logs queue. Best effort: a
    /// full or closed queue loses the log line, never the workflow.
    pub async fn log(&self, level: &str, category: &str, payload: Value) {
        let entry = ExecutionLogEntry::new(&self.workflow_id, level, category, payload);
        if let Err(err) = self
            .queue
            .enqueue(QueueName::Logs, JobPayload::AppendLog { entry })
            .await
        {
            tracing::debug!(
                workflow_id = %self.workflow_id,
                error = %err,
                "dropping execution log entry"
            );
        }
    }
}

/// One step of the workflow state machine.
#[async_trait]
pub trait NodeRunner: Send + Sync {
    /// Which step this runner implements.
    fn step(&self) -> WorkflowStep;

    /// Execute against a read-only state snapshot.
    async fn run(&self, state: &WorkflowState, ctx: &NodeContext)
    -> Result<NodeOutcome, NodeError>;
}
