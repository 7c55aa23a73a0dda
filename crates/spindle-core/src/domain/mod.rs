//! Domain model (ids, task messages, outcomes, decisions, attempt states).

pub mod codec;
pub mod decision;
pub mod ids;
pub mod outcome;
pub mod state;
pub mod task;

pub use decision::{Action, ArchiveKind, Decider, DefaultDecider};
pub use ids::TaskId;
pub use outcome::{CancelCause, Outcome, OutcomeKind};
pub use state::AttemptState;
pub use task::{TaskMessage, TaskType};
