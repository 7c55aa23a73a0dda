//! Broker port + in-memory reference broker + retry policy.

mod memory;
mod record;
mod retry;
mod state;

pub use memory::{AttemptReport, InMemoryBroker};
pub use record::TaskRecord;
pub use retry::RetryPolicy;
pub use state::TaskState;

use async_trait::async_trait;

use crate::domain::{Action, TaskId, TaskMessage};
use crate::error::BrokerError;

/// Broker port (interface).
///
/// Design intent:
/// - Broker owns task state and persistence.
/// - Processor executes handlers and reports the `Action` it decided on.
/// - The broker applies the action (mark done / reschedule / archive) and is
///   the only place where `retried` is incremented.
#[async_trait]
pub trait Broker: Send + Sync {
    /// Wait for the next eligible task. `Ok(None)` once the broker is closed.
    ///
    /// Must be cancel-safe: the Processor races it against shutdown.
    async fn dequeue(&self) -> Result<Option<TaskMessage>, BrokerError>;

    /// Persist the decision for the attempt of `task_id`.
    async fn report(&self, task_id: TaskId, action: &Action) -> Result<(), BrokerError>;
}
