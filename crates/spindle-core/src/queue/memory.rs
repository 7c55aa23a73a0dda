//! In-memory broker implementation.

use std::collections::{BinaryHeap, HashMap, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{Mutex, Notify};
use tokio::time::Instant;
use tracing::debug;

use super::{Broker, TaskRecord, TaskState};
use crate::domain::{Action, ArchiveKind, TaskId, TaskMessage};
use crate::error::BrokerError;
use crate::observability::QueueCounts;

/// Scheduled task entry for priority queue.
///
/// We use Reverse ordering so BinaryHeap acts as a min-heap (earliest first).
#[derive(Debug, Clone, PartialEq, Eq)]
struct ScheduledTask {
    next_run_at: Instant,
    task_id: TaskId,
}

impl PartialOrd for ScheduledTask {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ScheduledTask {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        other
            .next_run_at
            .cmp(&self.next_run_at)
            .then_with(|| other.task_id.cmp(&self.task_id))
    }
}

/// One reported action, in the order the broker received them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttemptReport {
    pub task_id: TaskId,
    /// `retried` of the message when the attempt ran.
    pub retried: u32,
    pub action: Action,
}

#[derive(Default)]
struct BrokerState {
    /// All task records (single source of truth).
    records: HashMap<TaskId, TaskRecord>,

    /// Ready queue (TaskIds only).
    ready: VecDeque<TaskId>,

    /// Retry backoff queue.
    scheduled: BinaryHeap<ScheduledTask>,

    reports: Vec<AttemptReport>,

    closed: bool,
}

impl BrokerState {
    /// Move tasks from scheduled to ready if their time has come.
    fn promote_scheduled_tasks(&mut self) {
        let now = Instant::now();
        while let Some(entry) = self.scheduled.peek() {
            if entry.next_run_at > now {
                break;
            }
            let Some(entry) = self.scheduled.pop() else {
                break;
            };
            if let Some(record) = self.records.get_mut(&entry.task_id) {
                if record.state == TaskState::Scheduled {
                    record.requeue();
                    self.ready.push_back(entry.task_id);
                }
            }
        }
    }

    fn counts(&self) -> QueueCounts {
        let mut counts = QueueCounts::default();
        for record in self.records.values() {
            match (record.state, record.archive_kind) {
                (TaskState::Pending, _) => counts.pending += 1,
                (TaskState::Active, _) => counts.active += 1,
                (TaskState::Scheduled, _) => counts.scheduled += 1,
                (TaskState::Completed, _) => counts.completed += 1,
                (TaskState::Archived, Some(ArchiveKind::Cancelled)) => counts.cancelled += 1,
                (TaskState::Archived, _) => counts.archived += 1,
            }
        }
        counts
    }
}

/// Reference broker kept entirely in memory.
///
/// Applies actions the way a real broker would: `RetryAfter` bumps `retried`
/// and delays the task, `Archive` keeps the task for inspection.
#[derive(Clone, Default)]
pub struct InMemoryBroker {
    state: Arc<Mutex<BrokerState>>,
    notify: Arc<Notify>,
}

impl InMemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a task to the ready queue.
    ///
    /// Task ids are unique for the broker's lifetime: an id that is already
    /// stored is rejected, even when its record is terminal.
    pub async fn enqueue(&self, message: TaskMessage) -> Result<TaskId, BrokerError> {
        let task_id = message.id;
        {
            let mut state = self.state.lock().await;
            if state.closed {
                return Err(BrokerError::Closed);
            }
            if state.records.contains_key(&task_id) {
                return Err(BrokerError::DuplicateTask(task_id));
            }
            state.records.insert(task_id, TaskRecord::new(message));
            state.ready.push_back(task_id);
        }
        self.notify.notify_one();
        Ok(task_id)
    }

    /// Stop handing out tasks. Waiting `dequeue` calls return `Ok(None)`.
    pub async fn close(&self) {
        self.state.lock().await.closed = true;
        self.notify.notify_waiters();
    }

    pub async fn get(&self, task_id: TaskId) -> Option<TaskRecord> {
        self.state.lock().await.records.get(&task_id).cloned()
    }

    pub async fn counts(&self) -> QueueCounts {
        self.state.lock().await.counts()
    }

    pub async fn reports(&self) -> Vec<AttemptReport> {
        self.state.lock().await.reports.clone()
    }

    /// Every task has reached Completed or Archived.
    pub async fn is_settled(&self) -> bool {
        let state = self.state.lock().await;
        state.records.values().all(|r| r.state.is_terminal())
    }
}

#[async_trait]
impl Broker for InMemoryBroker {
    async fn dequeue(&self) -> Result<Option<TaskMessage>, BrokerError> {
        loop {
            // notified を lock 中に登録しておき、close/enqueue の通知を取りこぼさない
            let notified = self.notify.notified();
            tokio::pin!(notified);

            let next_wake = {
                let mut state = self.state.lock().await;
                notified.as_mut().enable();

                if state.closed {
                    return Ok(None);
                }
                state.promote_scheduled_tasks();

                while let Some(task_id) = state.ready.pop_front() {
                    if let Some(record) = state.records.get_mut(&task_id) {
                        record.mark_active();
                        return Ok(Some(record.message.clone()));
                    }
                }

                state.scheduled.peek().map(|entry| entry.next_run_at)
            };

            match next_wake {
                Some(wake_at) => {
                    tokio::select! {
                        _ = &mut notified => {},
                        _ = tokio::time::sleep_until(wake_at) => {},
                    }
                }
                None => notified.await,
            }
        }
    }

    async fn report(&self, task_id: TaskId, action: &Action) -> Result<(), BrokerError> {
        let wake_workers = {
            let mut state = self.state.lock().await;
            let record = state
                .records
                .get_mut(&task_id)
                .ok_or(BrokerError::UnknownTask(task_id))?;
            let retried = record.message.retried;

            let wake = match action {
                Action::Complete => {
                    record.mark_completed();
                    false
                }
                Action::RetryAfter { delay, reason } => {
                    let next_run_at = Instant::now() + *delay;
                    record.schedule_retry(next_run_at, reason.clone());
                    state.scheduled.push(ScheduledTask {
                        next_run_at,
                        task_id,
                    });
                    true
                }
                Action::Archive { kind, reason } => {
                    record.archive(*kind, reason.clone());
                    false
                }
            };
            debug!(%task_id, action = action.label(), "broker applied action");

            state.reports.push(AttemptReport {
                task_id,
                retried,
                action: action.clone(),
            });
            wake
        };

        // 新しい wake 時刻を待機中の worker に知らせる
        if wake_workers {
            self.notify.notify_one();
        }
        Ok(())
    }
}
