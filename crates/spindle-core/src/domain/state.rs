//! Attempt state machine.

use serde::{Deserialize, Serialize};

use super::{Outcome, OutcomeKind};

/// State of one task attempt inside the Processor.
///
/// Transitions:
/// - Dequeued -> Running -> Succeeded
/// - Dequeued -> Running -> Failed
/// - Dequeued -> Running -> Cancelled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptState {
    /// Pulled from the broker, not yet running.
    Dequeued,

    /// Handler invoked, holding a worker slot.
    Running,

    Succeeded,

    /// Handler returned an error or panicked.
    Failed,

    /// Cancellation fired while the handler was running.
    Cancelled,
}

impl AttemptState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            AttemptState::Succeeded | AttemptState::Failed | AttemptState::Cancelled
        )
    }

    /// Terminal state reached by an attempt with this outcome.
    pub fn terminal_for(outcome: &Outcome) -> Self {
        match outcome.kind() {
            OutcomeKind::Success => AttemptState::Succeeded,
            OutcomeKind::Failure => AttemptState::Failed,
            OutcomeKind::Cancelled => AttemptState::Cancelled,
        }
    }
}
