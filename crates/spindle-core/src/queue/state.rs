//! Task state as tracked by the broker.

use serde::{Deserialize, Serialize};

/// State transitions:
/// - Pending -> Active -> Completed
/// - Pending -> Active -> Scheduled -> Pending (until retries run out)
/// - Pending -> Active -> Archived
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    /// Ready to be dequeued.
    Pending,

    /// Handed to a worker.
    Active,

    /// Waiting for its retry delay to pass.
    Scheduled,

    Completed,

    /// Permanent failure store (failed or cancelled).
    Archived,
}

impl TaskState {
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskState::Completed | TaskState::Archived)
    }
}
