//! Process-local live-step registry.
//!
//! Tracks which node each workflow is executing *right now*, as opposed to
//! where it last checkpointed. UI projections read this to distinguish
//! "running validation" from "checkpointed after curriculum". Nothing here
//! is persisted.

use rustc_hash::FxHashMap;
use std::sync::RwLock;

use crate::types::WorkflowStep;

#[derive(Default)]
pub struct StateManager {
    live: RwLock<FxHashMap<String, WorkflowStep>>,
}

impl StateManager {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, workflow_id: &str, step: WorkflowStep) {
        self.live
            .write()
            .expect("state manager lock poisoned")
            .insert(workflow_id.to_string(), step);
    }

    #[must_use]
    pub fn get(&self, workflow_id: &str) -> Option<WorkflowStep> {
        self.live
            .read()
            .expect("state manager lock poisoned")
            .get(workflow_id)
            .copied()
    }

    pub fn clear(&self, workflow_id: &str) {
        self.live
            .write()
            .expect("state manager lock poisoned")
            .remove(workflow_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_get_clear() {
        let manager = StateManager::new();
        assert_eq!(manager.get("w1"), None);
        manager.set("w1", WorkflowStep::Validation);
        assert_eq!(manager.get("w1"), Some(WorkflowStep::Validation));
        manager.set("w1", WorkflowStep::Editor);
        assert_eq!(manager.get("w1"), Some(WorkflowStep::Editor));
        manager.clear("w1");
        assert_eq!(manager.get("w1"), None);
    }
}
