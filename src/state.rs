//! Workflow state and the patch model node runners communicate with.
//!
//! A [`WorkflowState`] is the single document the executor threads through a
//! run: everything a node needs to decide what to do next, and everything the
//! checkpoint store must persist to make the run resumable. Runners never
//! mutate it directly; they return a [`StatePatch`] describing the fields
//! they produced and the executor merges it with [`WorkflowState::apply`].
//! This keeps runners pure and independently testable.
//!
//! The struct is serde-serializable and every field carries
//! `#[serde(default)]`, so snapshots written by older builds keep loading
//! after fields are added.
//!
//! # Examples
//!
//! ```rust
//! use roadweave::state::{StatePatch, WorkflowState};
//! use roadweave::model::IntentAnalysis;
//!
//! let mut state = WorkflowState::new("task-1", "user-1", serde_json::json!({"goal": "Learn Rust"}));
//! assert!(state.intent.is_none());
//!
//! state.apply(StatePatch::new().with_intent(IntentAnalysis {
//!     goal: "Learn Rust".into(),
//!     ..Default::default()
//! }));
//! assert!(state.intent.is_some());
//! ```

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::model::{Framework, IntentAnalysis, ValidationReport};
use crate::types::{ArtifactKind, ReviewDecision, TaskStatus};

/// Complete per-run workflow state.
///
/// The workflow id is the task id; the two terms are interchangeable
/// throughout the engine.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkflowState {
    #[serde(default)]
    pub task_id: String,
    #[serde(default)]
    pub user_id: String,
    /// Opaque input document as submitted.
    #[serde(default)]
    pub user_request: Value,
    #[serde(default)]
    pub intent: Option<IntentAnalysis>,
    #[serde(default)]
    pub roadmap_id: Option<String>,
    #[serde(default)]
    pub framework: Option<Framework>,
    #[serde(default)]
    pub validation: Option<ValidationReport>,
    /// Number of editor passes taken so far (bounded by `max_edit_cycles`).
    #[serde(default)]
    pub edit_cycles: u32,
    #[serde(default)]
    pub review: Option<ReviewDecision>,
    /// Set by the content worker once fan-out has resolved.
    #[serde(default)]
    pub content: Option<ContentReport>,
}

impl WorkflowState {
    /// Initial state for a freshly submitted task.
    #[must_use]
    pub fn new(task_id: &str, user_id: &str, user_request: Value) -> Self {
        Self {
            task_id: task_id.to_string(),
            user_id: user_id.to_string(),
            user_request,
            ..Default::default()
        }
    }

    /// Merge a node's patch into this state.
    ///
    /// `clear_validation` is applied before `validation` so an editor patch
    /// can drop a stale report in the same merge that installs the revised
    /// framework.
    pub fn apply(&mut self, patch: StatePatch) {
        if patch.clear_validation {
            self.validation = None;
        }
        if let Some(intent) = patch.intent {
            self.intent = Some(intent);
        }
        if let Some(roadmap_id) = patch.roadmap_id {
            self.roadmap_id = Some(roadmap_id);
        }
        if let Some(framework) = patch.framework {
            self.framework = Some(framework);
        }
        if let Some(validation) = patch.validation {
            self.validation = Some(validation);
        }
        if let Some(cycles) = patch.edit_cycles {
            self.edit_cycles = cycles;
        }
        if let Some(review) = patch.review {
            self.review = Some(review);
        }
        if let Some(content) = patch.content {
            self.content = Some(content);
        }
    }
}

/// Partial state update returned by node execution.
///
/// All fields are optional; a node sets only what it produced.
#[derive(Clone, Debug, Default)]
pub struct StatePatch {
    pub intent: Option<IntentAnalysis>,
    pub roadmap_id: Option<String>,
    pub framework: Option<Framework>,
    pub validation: Option<ValidationReport>,
    /// Drop any existing validation report (set by the editor so the router
    /// sends the revised framework back through validation).
    pub clear_validation: bool,
    pub edit_cycles: Option<u32>,
    pub review: Option<ReviewDecision>,
    pub content: Option<ContentReport>,
}

impl StatePatch {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_intent(mut self, intent: IntentAnalysis) -> Self {
        self.intent = Some(intent);
        self
    }

    #[must_use]
    pub fn with_roadmap_id(mut self, roadmap_id: impl Into<String>) -> Self {
        self.roadmap_id = Some(roadmap_id.into());
        self
    }

    #[must_use]
    pub fn with_framework(mut self, framework: Framework) -> Self {
        self.framework = Some(framework);
        self
    }

    #[must_use]
    pub fn with_validation(mut self, report: ValidationReport) -> Self {
        self.validation = Some(report);
        self
    }

    #[must_use]
    pub fn with_clear_validation(mut self) -> Self {
        self.clear_validation = true;
        self
    }

    #[must_use]
    pub fn with_edit_cycles(mut self, cycles: u32) -> Self {
        self.edit_cycles = Some(cycles);
        self
    }

    #[must_use]
    pub fn with_review(mut self, decision: ReviewDecision) -> Self {
        self.review = Some(decision);
        self
    }

    #[must_use]
    pub fn with_content(mut self, report: ContentReport) -> Self {
        self.content = Some(report);
        self
    }

    /// Whether the patch carries no changes at all.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.intent.is_none()
            && self.roadmap_id.is_none()
            && self.framework.is_none()
            && self.validation.is_none()
            && !self.clear_validation
            && self.edit_cycles.is_none()
            && self.review.is_none()
            && self.content.is_none()
    }
}

/// Outcome of content fan-out, recorded when the content worker resolves.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ContentReport {
    /// Final status the fan-out resolved to
    /// (completed / partial_failure / failed).
    #[serde(default = "ContentReport::default_status")]
    pub status: TaskStatus,
    /// Concept ids that failed, keyed by artifact kind. Kinds with no
    /// failures are absent.
    #[serde(default)]
    pub failed_concepts: FxHashMap<ArtifactKind, Vec<String>>,
    /// Number of artifacts successfully persisted.
    #[serde(default)]
    pub succeeded: u32,
}

impl Default for ContentReport {
    fn default() -> Self {
        Self {
            status: TaskStatus::Completed,
            failed_concepts: FxHashMap::default(),
            succeeded: 0,
        }
    }
}

impl ContentReport {
    fn default_status() -> TaskStatus {
        TaskStatus::Completed
    }

    /// Record one failed artifact.
    pub fn record_failure(&mut self, kind: ArtifactKind, concept_id: &str) {
        self.failed_concepts
            .entry(kind)
            .or_default()
            .push(concept_id.to_string());
    }

    /// Resolve the final task status from the all/any/none rule.
    #[must_use]
    pub fn resolve_status(succeeded: u32, failed: u32) -> TaskStatus {
        match (succeeded, failed) {
            (_, 0) => TaskStatus::Completed,
            (0, _) => TaskStatus::Failed,
            _ => TaskStatus::PartialFailure,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{IssueSeverity, ValidationIssue};

    #[test]
    fn apply_merges_only_set_fields() {
        let mut state = WorkflowState::new("t", "u", Value::Null);
        state.apply(StatePatch::new().with_roadmap_id("r1"));
        assert_eq!(state.roadmap_id.as_deref(), Some("r1"));
        assert!(state.intent.is_none());

        // An unrelated patch leaves the roadmap id alone.
        state.apply(StatePatch::new().with_edit_cycles(1));
        assert_eq!(state.roadmap_id.as_deref(), Some("r1"));
        assert_eq!(state.edit_cycles, 1);
    }

    #[test]
    fn clear_validation_runs_before_install() {
        let mut state = WorkflowState::new("t", "u", Value::Null);
        state.apply(StatePatch::new().with_validation(ValidationReport {
            issues: vec![ValidationIssue {
                severity: IssueSeverity::Major,
                location: String::new(),
                message: "bad".into(),
            }],
            score: 0.2,
        }));
        assert!(state.validation.is_some());

        // Editor patch: drop the stale report.
        state.apply(StatePatch::new().with_clear_validation().with_edit_cycles(1));
        assert!(state.validation.is_none());
        assert_eq!(state.edit_cycles, 1);
    }

    #[test]
    fn snapshot_roundtrip_tolerates_added_fields() {
        let state = WorkflowState::new("t", "u", serde_json::json!({"goal": "x"}));
        let mut snapshot = serde_json::to_value(&state).unwrap();
        // A field written by some future build.
        snapshot["future_field"] = serde_json::json!({"nested": true});
        let restored: WorkflowState = serde_json::from_value(snapshot).unwrap();
        assert_eq!(restored.task_id, "t");
    }

    #[test]
    fn status_resolution_rule() {
        assert_eq!(ContentReport::resolve_status(3, 0), TaskStatus::Completed);
        assert_eq!(
            ContentReport::resolve_status(2, 1),
            TaskStatus::PartialFailure
        );
        assert_eq!(ContentReport::resolve_status(0, 3), TaskStatus::Failed);
        // Degenerate empty roadmap counts as completed.
        assert_eq!(ContentReport::resolve_status(0, 0), TaskStatus::Completed);
    }
}
