//! Signals a task runner can emit in its output.

use crate::deviation::Deviation;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// An explicit blocker, emitted as `<blocker>description</blocker>`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlockerSignal {
    pub description: String,
    pub timestamp: DateTime<Utc>,
}

impl BlockerSignal {
    pub fn new(description: impl Into<String>) -> Self {
        Self {
            description: description.into(),
            timestamp: Utc::now(),
        }
    }

    /// A blocker is reported to the engine as a progress-blocking deviation.
    pub fn to_deviation(&self) -> Deviation {
        Deviation::new(&self.description, "blocker").blocking()
    }
}

/// Everything extracted from one task run's output.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskSignals {
    pub deviations: Vec<Deviation>,
    pub blockers: Vec<BlockerSignal>,
    /// Last `<verification>` verdict, if any
    pub verification: Option<bool>,
    pub files_modified: Vec<String>,
    /// Ids named in `<task-complete>` tags
    pub completed_tasks: Vec<String>,
}

impl TaskSignals {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.deviations.is_empty()
            && self.blockers.is_empty()
            && self.verification.is_none()
            && self.files_modified.is_empty()
            && self.completed_tasks.is_empty()
    }

    pub fn completes(&self, task_id: &str) -> bool {
        self.completed_tasks.iter().any(|id| id == task_id)
    }

    /// Reported deviations followed by blockers converted to deviations.
    pub fn all_deviations(&self) -> Vec<Deviation> {
        self.deviations
            .iter()
            .cloned()
            .chain(self.blockers.iter().map(BlockerSignal::to_deviation))
            .collect()
    }
}
