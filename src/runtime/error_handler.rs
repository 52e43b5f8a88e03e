//! Failure classification and the retry policy wrapping every runner.
//!
//! Taxonomy and policy (see also the crate-level docs):
//!
//! | kind        | source                               | policy                     |
//! |-------------|--------------------------------------|----------------------------|
//! | Transient   | provider/network/pool/backend errors | 3 attempts, exp. backoff   |
//! | Parse       | unrecoverable model output           | 1 re-prompt, then surface  |
//! | Validation  | structurally invalid document        | surface immediately        |
//! | Cancelled   | cancellation token fired             | propagate, status untouched|
//! | Fatal       | programmer error / missing input     | surface, task → failed     |
//!
//! Integrity conflicts never reach here: the repository upsert paths absorb
//! them by design of the SQL.
//!
//! [`handle_node_execution`] is the single wrapper the executor calls: it
//! classifies, retries where the policy allows, records the error payload on
//! the task row, and publishes `node_failed` before handing the failure
//! back.

use rand::Rng;
use serde_json::json;
use std::time::Duration;

use crate::agents::AgentError;
use crate::events::ProgressEvent;
use crate::repo::{RepoError, TaskRepo};
use crate::state::WorkflowState;
use crate::types::TaskStatus;

use super::node::{NodeContext, NodeError, NodeOutcome, NodeRunner};

/// The five failure kinds the engine distinguishes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FailureKind {
    Transient,
    Parse,
    Validation,
    Cancelled,
    Fatal,
}

/// Classify a node error into the retry taxonomy.
#[must_use]
pub fn classify(error: &NodeError) -> FailureKind {
    match error {
        NodeError::Agent(agent) => match agent {
            AgentError::Provider { .. } | AgentError::Timeout { .. } => FailureKind::Transient,
            AgentError::Parse { .. } => FailureKind::Parse,
            AgentError::InvalidDocument { .. } => FailureKind::Validation,
            AgentError::Cancelled => FailureKind::Cancelled,
            AgentError::Unconfigured { .. } => FailureKind::Fatal,
        },
        NodeError::Repo(RepoError::Backend(_)) => FailureKind::Transient,
        NodeError::Repo(_) => FailureKind::Fatal,
        NodeError::Checkpoint(_) | NodeError::Queue(_) => FailureKind::Transient,
        NodeError::Validation(_) => FailureKind::Validation,
        NodeError::Cancelled => FailureKind::Cancelled,
        NodeError::MissingInput { .. } => FailureKind::Fatal,
    }
}

/// Exponential backoff: `base * 2^(attempt-1)`, capped, with up to 25%
/// uniform jitter so retry storms decorrelate.
#[derive(Clone, Copy, Debug)]
pub struct RetryPolicy {
    pub base: Duration,
    pub cap: Duration,
    /// Total attempts for transient failures (first try included).
    pub max_transient_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_millis(500),
            cap: Duration::from_secs(8),
            max_transient_attempts: 3,
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `attempt` (1-based).
    #[must_use]
    pub fn delay(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(16);
        let raw = self.base.saturating_mul(1u32 << exp).min(self.cap);
        let jitter = rand::thread_rng().gen_range(0.0..=0.25);
        raw.mul_f64(1.0 + jitter)
    }
}

/// A failure that survived the retry policy.
#[derive(Debug)]
pub struct NodeFailure {
    pub kind: FailureKind,
    pub message: String,
}

/// Run one node under the retry policy.
///
/// On exhaustion this records the error payload on the task row, publishes
/// `node_failed`, and returns the failure; deciding what the workflow does
/// next (checkpoint-and-exit, task → failed, re-raise) is the executor's
/// job.
pub async fn handle_node_execution(
    runner: &dyn NodeRunner,
    state: &WorkflowState,
    ctx: &NodeContext,
    policy: &RetryPolicy,
) -> Result<NodeOutcome, NodeFailure> {
    let step = runner.step();
    let mut transient_attempts = 0u32;
    let mut reprompted = false;

    let failure = loop {
        match runner.run(state, ctx).await {
            Ok(outcome) => return Ok(outcome),
            Err(error) => {
                let kind = classify(&error);
                match kind {
                    FailureKind::Transient => {
                        transient_attempts += 1;
                        if transient_attempts < policy.max_transient_attempts {
                            let delay = policy.delay(transient_attempts);
                            tracing::warn!(
                                workflow_id = %ctx.workflow_id,
                                step = %step,
                                attempt = transient_attempts,
                                delay_ms = delay.as_millis() as u64,
                                error = %error,
                                "transient node failure; retrying"
                            );
                            tokio::time::sleep(delay).await;
                            continue;
                        }
                    }
                    FailureKind::Parse if !reprompted => {
                        // One fresh call with the same input stands in for
                        // the re-prompt; the models are sampled, not cached.
                        reprompted = true;
                        tracing::warn!(
                            workflow_id = %ctx.workflow_id,
                            step = %step,
                            error = %error,
                            "unparseable model output; re-prompting once"
                        );
                        continue;
                    }
                    _ => {}
                }
                break NodeFailure {
                    kind,
                    message: error.to_string(),
                };
            }
        }
    };

    // Cancellation is not an error condition: leave the task row alone.
    if failure.kind != FailureKind::Cancelled {
        record_failure(ctx, &failure, step).await;
    }
    ctx.publish(ProgressEvent::NodeFailed {
        workflow_id: ctx.workflow_id.clone(),
        step,
        error: failure.message.clone(),
    });
    Err(failure)
}

/// Record the step and error payload on the task row. For fatal failures
/// the status moves to `failed` here so the terminal transition and the
/// payload land in one commit.
async fn record_failure(
    ctx: &NodeContext,
    failure: &NodeFailure,
    step: crate::types::WorkflowStep,
) {
    let payload = json!({
        "step": step.encode(),
        "kind": format!("{:?}", failure.kind).to_lowercase(),
        "message": failure.message,
    });
    let status = if failure.kind == FailureKind::Fatal {
        TaskStatus::Failed
    } else {
        TaskStatus::Processing
    };
    let result = async {
        let mut scope = ctx.repos.begin().await?;
        TaskRepo::set_status(&mut scope, &ctx.workflow_id, status, Some(step), Some(&payload))
            .await?;
        scope.commit().await
    }
    .await;
    if let Err(err) = result {
        tracing::error!(
            workflow_id = %ctx.workflow_id,
            error = %err,
            "failed to record node failure on task row"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checkpoint::CheckpointerError;

    #[test]
    fn classification_table() {
        assert_eq!(
            classify(&NodeError::Agent(AgentError::Provider {
                provider: "http".into(),
                message: "503".into(),
            })),
            FailureKind::Transient
        );
        assert_eq!(
            classify(&NodeError::Agent(AgentError::Timeout { seconds: 120 })),
            FailureKind::Transient
        );
        assert_eq!(
            classify(&NodeError::Agent(AgentError::Parse {
                reason: "not json".into(),
            })),
            FailureKind::Parse
        );
        assert_eq!(
            classify(&NodeError::Agent(AgentError::InvalidDocument {
                what: "framework",
                message: "no stages".into(),
            })),
            FailureKind::Validation
        );
        assert_eq!(classify(&NodeError::Cancelled), FailureKind::Cancelled);
        assert_eq!(
            classify(&NodeError::MissingInput { what: "intent" }),
            FailureKind::Fatal
        );
        assert_eq!(
            classify(&NodeError::Checkpoint(CheckpointerError::Backend {
                message: "down".into(),
            })),
            FailureKind::Transient
        );
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let policy = RetryPolicy::default();
        // Jitter adds at most 25%.
        let d1 = policy.delay(1);
        let d2 = policy.delay(2);
        let d10 = policy.delay(10);
        assert!(d1 >= Duration::from_millis(500) && d1 <= Duration::from_millis(625));
        assert!(d2 >= Duration::from_millis(1000) && d2 <= Duration::from_millis(1250));
        assert!(d10 >= Duration::from_secs(8) && d10 <= Duration::from_secs(10));
    }
}
