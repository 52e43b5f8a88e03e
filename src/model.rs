//! Domain documents for the roadmap engine.
//!
//! Two families live here:
//!
//! - **Structural metadata**: [`Task`], [`RoadmapMetadata`] and the
//!   [`Framework`] tree it embeds (Stages → Modules → Concepts, each concept
//!   carrying its artifact status triplet and reference ids).
//! - **Detail rows**: [`TutorialMetadata`], [`ResourceRecommendationMetadata`]
//!   and [`QuizMetadata`], the per-concept source of truth that the framework
//!   statuses project.
//!
//! All documents are plain serde structs; persistence-specific concerns
//! (column mapping, upsert rules) live in [`crate::repo`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::types::{ArtifactKind, ContentStatus, TaskStatus, WorkflowStep};

/// A single roadmap-generation request and its lifecycle.
///
/// Created by the request handler on submission; mutated only by the
/// executor, the content worker, or the error handler.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub task_id: String,
    pub user_id: String,
    pub task_type: String,
    /// Opaque input document as submitted by the caller.
    pub user_request: Value,
    pub status: TaskStatus,
    pub current_step: Option<WorkflowStep>,
    /// Assigned once the intent step runs.
    pub roadmap_id: Option<String>,
    /// Handle of the queue job currently (or last) driving this task.
    pub queue_job_id: Option<String>,
    /// Error payload recorded by the error handler on node failure.
    pub error: Option<Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Task {
    /// Build a fresh pending task for a submitted request.
    #[must_use]
    pub fn new(task_id: String, user_id: String, task_type: &str, user_request: Value) -> Self {
        let now = Utc::now();
        Self {
            task_id,
            user_id,
            task_type: task_type.to_string(),
            user_request,
            status: TaskStatus::Pending,
            current_step: None,
            roadmap_id: None,
            queue_job_id: None,
            error: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Structural half of the dual store: the framework tree plus ownership.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RoadmapMetadata {
    pub roadmap_id: String,
    pub task_id: String,
    pub user_id: String,
    pub framework: Framework,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// The Stages → Modules → Concepts tree produced by the curriculum agent.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Framework {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub stages: Vec<Stage>,
    #[serde(default)]
    pub total_estimated_hours: f64,
    #[serde(default)]
    pub recommended_completion_weeks: u32,
}

impl Framework {
    /// Concepts in framework traversal order (stage, then module, then
    /// concept position). Content fan-out schedules in exactly this order.
    pub fn concepts(&self) -> impl Iterator<Item = &Concept> {
        self.stages
            .iter()
            .flat_map(|s| s.modules.iter())
            .flat_map(|m| m.concepts.iter())
    }

    /// Mutable traversal, same order as [`Framework::concepts`].
    pub fn concepts_mut(&mut self) -> impl Iterator<Item = &mut Concept> {
        self.stages
            .iter_mut()
            .flat_map(|s| s.modules.iter_mut())
            .flat_map(|m| m.concepts.iter_mut())
    }

    /// Find a concept by id.
    #[must_use]
    pub fn concept(&self, concept_id: &str) -> Option<&Concept> {
        self.concepts().find(|c| c.concept_id == concept_id)
    }

    #[must_use]
    pub fn concept_mut(&mut self, concept_id: &str) -> Option<&mut Concept> {
        self.concepts_mut().find(|c| c.concept_id == concept_id)
    }

    /// Progress projection over all concepts and artifact kinds.
    #[must_use]
    pub fn progress(&self) -> Progress {
        let mut progress = Progress::default();
        for concept in self.concepts() {
            for kind in ArtifactKind::ALL {
                match concept.artifact_status(kind) {
                    ContentStatus::Pending => progress.pending += 1,
                    ContentStatus::Completed => progress.completed += 1,
                    ContentStatus::Failed => progress.failed += 1,
                }
            }
        }
        progress
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Stage {
    #[serde(default)]
    pub title: String,
    /// 1-based position; filled by the parser when the model omits it.
    #[serde(default)]
    pub order: u32,
    #[serde(default)]
    pub modules: Vec<Module>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Module {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub concepts: Vec<Concept>,
}

/// A single learning unit, the target of the three content artifacts.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Concept {
    #[serde(default)]
    pub concept_id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub estimated_hours: f64,
    #[serde(default)]
    pub content_status: ContentStatus,
    #[serde(default)]
    pub resources_status: ContentStatus,
    #[serde(default)]
    pub quiz_status: ContentStatus,
    #[serde(default)]
    pub tutorial_id: Option<String>,
    #[serde(default)]
    pub resources_id: Option<String>,
    #[serde(default)]
    pub quiz_id: Option<String>,
    /// Pointer into the object store once a tutorial body is uploaded.
    #[serde(default)]
    pub content_url: Option<String>,
}

impl Concept {
    /// Projected status for one artifact kind.
    #[must_use]
    pub fn artifact_status(&self, kind: ArtifactKind) -> ContentStatus {
        match kind {
            ArtifactKind::Tutorial => self.content_status,
            ArtifactKind::Resources => self.resources_status,
            ArtifactKind::Quiz => self.quiz_status,
        }
    }

    /// Record the outcome of one artifact generation on this concept.
    pub fn set_artifact(&mut self, kind: ArtifactKind, status: ContentStatus, id: Option<String>) {
        match kind {
            ArtifactKind::Tutorial => {
                self.content_status = status;
                if id.is_some() {
                    self.tutorial_id = id;
                }
            }
            ArtifactKind::Resources => {
                self.resources_status = status;
                if id.is_some() {
                    self.resources_id = id;
                }
            }
            ArtifactKind::Quiz => {
                self.quiz_status = status;
                if id.is_some() {
                    self.quiz_id = id;
                }
            }
        }
    }

    /// Reference id recorded for one artifact kind, if any.
    #[must_use]
    pub fn artifact_id(&self, kind: ArtifactKind) -> Option<&str> {
        match kind {
            ArtifactKind::Tutorial => self.tutorial_id.as_deref(),
            ArtifactKind::Resources => self.resources_id.as_deref(),
            ArtifactKind::Quiz => self.quiz_id.as_deref(),
        }
    }
}

/// Artifact counters projected from a framework, exposed by `GetStatus`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Progress {
    pub completed: u32,
    pub failed: u32,
    pub pending: u32,
}

/// Detail row for a generated tutorial. At most one row per
/// (roadmap_id, concept_id) has `is_latest = true`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TutorialMetadata {
    pub tutorial_id: String,
    pub concept_id: String,
    pub roadmap_id: String,
    /// Strictly increasing per (roadmap_id, concept_id), starting at 1.
    pub content_version: i64,
    pub is_latest: bool,
    pub content_url: Option<String>,
    pub summary: Option<String>,
    pub content_status: ContentStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TutorialMetadata {
    /// Draft row for a freshly generated tutorial; the repository assigns
    /// the version and latest flag on upsert.
    #[must_use]
    pub fn draft(
        concept_id: &str,
        roadmap_id: &str,
        content_url: Option<String>,
        summary: Option<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            tutorial_id: Uuid::new_v4().to_string(),
            concept_id: concept_id.to_string(),
            roadmap_id: roadmap_id.to_string(),
            content_version: 1,
            is_latest: true,
            content_url,
            summary,
            content_status: ContentStatus::Completed,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Detail row for recommended external resources, unique per
/// (concept_id, roadmap_id).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ResourceRecommendationMetadata {
    pub id: String,
    pub concept_id: String,
    pub roadmap_id: String,
    /// Embedded resource list document.
    pub resources: Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ResourceRecommendationMetadata {
    #[must_use]
    pub fn draft(concept_id: &str, roadmap_id: &str, resources: Value) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            concept_id: concept_id.to_string(),
            roadmap_id: roadmap_id.to_string(),
            resources,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Detail row for a generated quiz, unique per (concept_id, roadmap_id).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct QuizMetadata {
    pub quiz_id: String,
    pub concept_id: String,
    pub roadmap_id: String,
    /// Embedded question list document.
    pub questions: Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl QuizMetadata {
    #[must_use]
    pub fn draft(concept_id: &str, roadmap_id: &str, questions: Value) -> Self {
        let now = Utc::now();
        Self {
            quiz_id: Uuid::new_v4().to_string(),
            concept_id: concept_id.to_string(),
            roadmap_id: roadmap_id.to_string(),
            questions,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Parsed learning goal produced by the intent analyzer.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct IntentAnalysis {
    #[serde(default)]
    pub goal: String,
    #[serde(default)]
    pub experience_level: String,
    #[serde(default)]
    pub target_hours_per_week: f64,
    #[serde(default)]
    pub focus_areas: Vec<String>,
    #[serde(default)]
    pub constraints: Vec<String>,
}

/// Full parsed-goal document keyed by task.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct IntentAnalysisMetadata {
    pub task_id: String,
    pub analysis: IntentAnalysis,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Stored learner preferences, consulted by curriculum and content agents.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct UserProfile {
    #[serde(default)]
    pub user_id: String,
    #[serde(default)]
    pub experience_level: String,
    #[serde(default)]
    pub weekly_hours: f64,
    #[serde(default)]
    pub preferred_formats: Vec<String>,
    #[serde(default)]
    pub language: Option<String>,
}

/// Append-only execution log entry; `trace_id` is the owning task id.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ExecutionLogEntry {
    pub trace_id: String,
    pub level: String,
    pub category: String,
    pub payload: Value,
    pub created_at: DateTime<Utc>,
}

impl ExecutionLogEntry {
    #[must_use]
    pub fn new(trace_id: &str, level: &str, category: &str, payload: Value) -> Self {
        Self {
            trace_id: trace_id.to_string(),
            level: level.to_string(),
            category: category.to_string(),
            payload,
            created_at: Utc::now(),
        }
    }
}

/// Severity of a structural issue reported by the validator agent.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueSeverity {
    Minor,
    Major,
    Critical,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ValidationIssue {
    pub severity: IssueSeverity,
    #[serde(default)]
    pub location: String,
    pub message: String,
}

/// Validator output: issue list plus an overall structure score in [0, 1].
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ValidationReport {
    #[serde(default)]
    pub issues: Vec<ValidationIssue>,
    #[serde(default)]
    pub score: f64,
}

impl ValidationReport {
    /// Whether the framework needs an editor pass: any issue at `Major`
    /// severity or above, or an overall score below `min_score`.
    #[must_use]
    pub fn needs_revision(&self, min_score: f64) -> bool {
        self.score < min_score
            || self
                .issues
                .iter()
                .any(|i| i.severity >= IssueSeverity::Major)
    }
}
