//! Core identifier types for the roadmap workflow engine.
//!
//! This module defines the small closed vocabularies the rest of the system
//! is written against: the workflow step a run is at, the lifecycle status of
//! a task, the kind of content artifact being produced, and the decision a
//! human reviewer can hand back.
//!
//! Every type here carries a stable string form via `encode`/`decode` so it
//! can be stored in database columns and checkpoint snapshots without tying
//! the schema to serde enum representations.
//!
//! # Examples
//!
//! ```rust
//! use roadweave::types::{TaskStatus, WorkflowStep};
//!
//! let step = WorkflowStep::Curriculum;
//! assert_eq!(step.encode(), "curriculum_design");
//! assert_eq!(WorkflowStep::decode("curriculum_design"), Some(step));
//!
//! assert!(TaskStatus::PartialFailure.is_terminal());
//! assert!(!TaskStatus::Processing.is_terminal());
//! ```

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// A node of the roadmap-generation state machine.
///
/// The router (see [`crate::runtime::router`]) is a pure total function over
/// this set; `End` is a virtual terminal step and never has a runner.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStep {
    /// Parse the raw user request into a structured learning goal.
    #[serde(rename = "intent_analysis")]
    Intent,
    /// Design the stages → modules → concepts framework.
    #[serde(rename = "curriculum_design")]
    Curriculum,
    /// Score the framework and collect structural issues.
    Validation,
    /// Revise the framework when validation found blocking issues.
    Editor,
    /// Suspend for an external approve/reject/edit decision.
    HumanReview,
    /// Fan out tutorial/resource/quiz generation to the content worker.
    ContentGeneration,
    /// Virtual terminal step.
    End,
}

impl WorkflowStep {
    /// Encode into the persisted string form used in `tasks.current_step`
    /// and checkpoint rows.
    #[must_use]
    pub fn encode(&self) -> &'static str {
        match self {
            WorkflowStep::Intent => "intent_analysis",
            WorkflowStep::Curriculum => "curriculum_design",
            WorkflowStep::Validation => "validation",
            WorkflowStep::Editor => "editor",
            WorkflowStep::HumanReview => "human_review",
            WorkflowStep::ContentGeneration => "content_generation",
            WorkflowStep::End => "end",
        }
    }

    /// Decode a persisted string form. Unknown strings yield `None` so that
    /// readers can treat them as a forward-compatibility signal rather than
    /// a hard error.
    #[must_use]
    pub fn decode(s: &str) -> Option<Self> {
        match s {
            "intent_analysis" => Some(WorkflowStep::Intent),
            "curriculum_design" => Some(WorkflowStep::Curriculum),
            "validation" => Some(WorkflowStep::Validation),
            "editor" => Some(WorkflowStep::Editor),
            "human_review" => Some(WorkflowStep::HumanReview),
            "content_generation" => Some(WorkflowStep::ContentGeneration),
            "end" => Some(WorkflowStep::End),
            _ => None,
        }
    }

    /// Returns `true` for the virtual terminal step.
    #[must_use]
    pub fn is_end(&self) -> bool {
        matches!(self, WorkflowStep::End)
    }
}

impl fmt::Display for WorkflowStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.encode())
    }
}

impl From<&str> for WorkflowStep {
    fn from(s: &str) -> Self {
        WorkflowStep::decode(s).unwrap_or(WorkflowStep::End)
    }
}

/// Lifecycle status of a [`crate::model::Task`].
///
/// `Completed`, `PartialFailure`, `Failed` and `Rejected` are terminal:
/// once a task reaches one of them no executor turn may transition it back
/// (the task repository enforces this at the write path).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Processing,
    HumanReviewPending,
    Completed,
    PartialFailure,
    Failed,
    Rejected,
}

impl TaskStatus {
    /// Whether this status is terminal (no further transitions allowed).
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Completed
                | TaskStatus::PartialFailure
                | TaskStatus::Failed
                | TaskStatus::Rejected
        )
    }

    #[must_use]
    pub fn encode(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Processing => "processing",
            TaskStatus::HumanReviewPending => "human_review_pending",
            TaskStatus::Completed => "completed",
            TaskStatus::PartialFailure => "partial_failure",
            TaskStatus::Failed => "failed",
            TaskStatus::Rejected => "rejected",
        }
    }

    #[must_use]
    pub fn decode(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(TaskStatus::Pending),
            "processing" => Some(TaskStatus::Processing),
            "human_review_pending" => Some(TaskStatus::HumanReviewPending),
            "completed" => Some(TaskStatus::Completed),
            "partial_failure" => Some(TaskStatus::PartialFailure),
            "failed" => Some(TaskStatus::Failed),
            "rejected" => Some(TaskStatus::Rejected),
            _ => None,
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.encode())
    }
}

/// One of the three content artifacts a concept can own.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactKind {
    Tutorial,
    Resources,
    Quiz,
}

impl ArtifactKind {
    /// All kinds, in the order content fan-out schedules them.
    pub const ALL: [ArtifactKind; 3] = [
        ArtifactKind::Tutorial,
        ArtifactKind::Resources,
        ArtifactKind::Quiz,
    ];

    #[must_use]
    pub fn encode(&self) -> &'static str {
        match self {
            ArtifactKind::Tutorial => "tutorial",
            ArtifactKind::Resources => "resources",
            ArtifactKind::Quiz => "quiz",
        }
    }

    #[must_use]
    pub fn decode(s: &str) -> Option<Self> {
        match s {
            "tutorial" => Some(ArtifactKind::Tutorial),
            "resources" => Some(ArtifactKind::Resources),
            "quiz" => Some(ArtifactKind::Quiz),
            _ => None,
        }
    }
}

impl fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.encode())
    }
}

/// Per-artifact status recorded on a concept inside `framework_data`.
///
/// This is a projection of the detail rows; the detail rows are the source
/// of truth (readers asking "does this concept have a tutorial?" query the
/// tutorial table, not this field).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentStatus {
    #[default]
    Pending,
    Completed,
    Failed,
}

impl ContentStatus {
    #[must_use]
    pub fn encode(&self) -> &'static str {
        match self {
            ContentStatus::Pending => "pending",
            ContentStatus::Completed => "completed",
            ContentStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for ContentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.encode())
    }
}

/// Decision handed back by the external reviewer when a workflow is
/// suspended at [`WorkflowStep::HumanReview`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum ReviewDecision {
    /// Continue with the framework as designed.
    Approve,
    /// Terminate the task; no content generation runs.
    Reject,
    /// Continue with a caller-edited framework document.
    Edit { framework: Value },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn workflow_step_roundtrip() {
        for step in [
            WorkflowStep::Intent,
            WorkflowStep::Curriculum,
            WorkflowStep::Validation,
            WorkflowStep::Editor,
            WorkflowStep::HumanReview,
            WorkflowStep::ContentGeneration,
            WorkflowStep::End,
        ] {
            assert_eq!(WorkflowStep::decode(step.encode()), Some(step));
        }
        assert_eq!(WorkflowStep::decode("no_such_step"), None);
    }

    #[test]
    fn terminal_statuses() {
        assert!(TaskStatus::Completed.is_terminal());
        assert!(TaskStatus::PartialFailure.is_terminal());
        assert!(TaskStatus::Failed.is_terminal());
        assert!(TaskStatus::Rejected.is_terminal());
        assert!(!TaskStatus::Pending.is_terminal());
        assert!(!TaskStatus::Processing.is_terminal());
        assert!(!TaskStatus::HumanReviewPending.is_terminal());
    }

    #[test]
    fn task_status_roundtrip() {
        for status in [
            TaskStatus::Pending,
            TaskStatus::Processing,
            TaskStatus::HumanReviewPending,
            TaskStatus::Completed,
            TaskStatus::PartialFailure,
            TaskStatus::Failed,
            TaskStatus::Rejected,
        ] {
            assert_eq!(TaskStatus::decode(status.encode()), Some(status));
        }
    }

    #[test]
    fn artifact_kinds_are_exhaustive_and_ordered() {
        assert_eq!(ArtifactKind::ALL.len(), 3);
        assert_eq!(ArtifactKind::ALL[0], ArtifactKind::Tutorial);
        for kind in ArtifactKind::ALL {
            assert_eq!(ArtifactKind::decode(kind.encode()), Some(kind));
        }
    }

    #[test]
    fn review_decision_serde_shape() {
        let approve = serde_json::to_value(ReviewDecision::Approve).unwrap();
        assert_eq!(approve["decision"], "approve");

        let edit: ReviewDecision = serde_json::from_value(serde_json::json!({
            "decision": "edit",
            "framework": {"stages": []},
        }))
        .unwrap();
        assert!(matches!(edit, ReviewDecision::Edit { .. }));
    }
}
