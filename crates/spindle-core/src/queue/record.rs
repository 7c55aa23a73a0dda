//! Task record: broker-side metadata + message.

use tokio::time::Instant;

use super::TaskState;
use crate::domain::{ArchiveKind, TaskMessage};

/// Single source of truth for a task inside `InMemoryBroker`.
///
/// Queue structures (ready/scheduled) hold `TaskId` only.
#[derive(Debug, Clone)]
pub struct TaskRecord {
    pub message: TaskMessage,
    pub state: TaskState,

    /// Set once archived.
    pub archive_kind: Option<ArchiveKind>,

    /// Reason carried by the last retry or archive action.
    pub last_error: Option<String>,

    /// When to run next (Scheduled only).
    pub next_run_at: Option<Instant>,

    pub updated_at: Instant,
}

impl TaskRecord {
    pub fn new(message: TaskMessage) -> Self {
        Self {
            message,
            state: TaskState::Pending,
            archive_kind: None,
            last_error: None,
            next_run_at: None,
            updated_at: Instant::now(),
        }
    }

    pub fn mark_active(&mut self) {
        self.state = TaskState::Active;
        self.updated_at = Instant::now();
    }

    pub fn mark_completed(&mut self) {
        self.state = TaskState::Completed;
        self.updated_at = Instant::now();
    }

    /// Consume one retry and wait until `next_run_at`.
    pub fn schedule_retry(&mut self, next_run_at: Instant, reason: String) {
        self.message.retried += 1;
        self.state = TaskState::Scheduled;
        self.next_run_at = Some(next_run_at);
        self.last_error = Some(reason);
        self.updated_at = Instant::now();
    }

    pub fn archive(&mut self, kind: ArchiveKind, reason: String) {
        self.state = TaskState::Archived;
        self.archive_kind = Some(kind);
        self.last_error = Some(reason);
        self.next_run_at = None;
        self.updated_at = Instant::now();
    }

    /// Move from Scheduled back to Pending.
    pub fn requeue(&mut self) {
        self.state = TaskState::Pending;
        self.next_run_at = None;
        self.updated_at = Instant::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn record() -> TaskRecord {
        TaskRecord::new(TaskMessage::new("noop", serde_json::Value::Null).with_retry(3))
    }

    #[test]
    fn retry_consumes_an_attempt() {
        let mut r = record();
        r.mark_active();
        r.schedule_retry(Instant::now() + Duration::from_secs(1), "boom".into());

        assert_eq!(r.state, TaskState::Scheduled);
        assert_eq!(r.message.retried, 1);
        assert!(r.next_run_at.is_some());

        r.requeue();
        assert_eq!(r.state, TaskState::Pending);
        assert_eq!(r.next_run_at, None);
    }

    #[test]
    fn archive_keeps_retry_count() {
        let mut r = record();
        r.mark_active();
        r.archive(ArchiveKind::Cancelled, "cancelled on request".into());

        assert_eq!(r.state, TaskState::Archived);
        assert_eq!(r.archive_kind, Some(ArchiveKind::Cancelled));
        assert_eq!(r.message.retried, 0);
        assert!(r.state.is_terminal());
    }
}
