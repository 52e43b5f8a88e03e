//! Workflow routing.
//!
//! [`next_step`] is a pure, total function of `(state, config)`. Ties break
//! in the listed rule order, so routing is deterministic for any state,
//! including states restored from old checkpoints.

use crate::config::WorkflowConfig;
use crate::state::WorkflowState;
use crate::types::WorkflowStep;

/// Decide the next node for a workflow state.
///
/// Rules, in order:
/// 1. no intent → intent;
/// 2. no framework → curriculum;
/// 3. validation enabled and no report → validation;
/// 4. report demands revision and edit budget remains → editor (the editor
///    clears the report, so rule 3 re-runs validation afterwards);
/// 5. review enabled and no decision recorded → human review;
/// 6. content generation enabled and not resolved → content;
/// 7. otherwise → end.
#[must_use]
pub fn next_step(state: &WorkflowState, config: &WorkflowConfig) -> WorkflowStep {
    if state.intent.is_none() {
        return WorkflowStep::Intent;
    }
    if state.framework.is_none() {
        return WorkflowStep::Curriculum;
    }
    if !config.skip_validation && state.validation.is_none() {
        return WorkflowStep::Validation;
    }
    if let Some(report) = &state.validation {
        if report.needs_revision(config.min_validation_score)
            && state.edit_cycles < config.max_edit_cycles
        {
            return WorkflowStep::Editor;
        }
    }
    if !config.skip_human_review && state.review.is_none() {
        return WorkflowStep::HumanReview;
    }
    if !config.skip_content_generation && state.content.is_none() {
        return WorkflowStep::ContentGeneration;
    }
    WorkflowStep::End
}
