use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::TaskId;
use super::codec::{deadline_text, timeout_text};

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskType(String);

impl TaskType {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TaskType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// A task as handed over by the broker.
///
/// The broker owns this record; the execution core only reads it for the
/// duration of one attempt. `retried` is bumped by the broker after a retry is
/// scheduled, never by a running worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskMessage {
    #[serde(rename = "type")]
    pub task_type: TaskType,

    pub id: TaskId,

    #[serde(default)]
    pub payload: serde_json::Value,

    /// Relative time budget per attempt. Zero means no timeout.
    #[serde(with = "timeout_text", default)]
    pub timeout: Duration,

    /// Absolute cut-off. `None` means no deadline.
    #[serde(with = "deadline_text", default)]
    pub deadline: Option<DateTime<Utc>>,

    /// Maximum number of retries.
    #[serde(default)]
    pub retry: u32,

    /// Retries already consumed.
    #[serde(default)]
    pub retried: u32,
}

impl TaskMessage {
    pub fn new(task_type: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            task_type: TaskType::new(task_type),
            id: TaskId::generate(),
            payload,
            timeout: Duration::ZERO,
            deadline: None,
            retry: 0,
            retried: 0,
        }
    }

    pub fn with_id(mut self, id: TaskId) -> Self {
        self.id = id;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_deadline(mut self, deadline: DateTime<Utc>) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn with_retry(mut self, retry: u32) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_retried(mut self, retried: u32) -> Self {
        self.retried = retried;
        self
    }

    /// Relative timeout, or `None` when unset.
    pub fn timeout(&self) -> Option<Duration> {
        (!self.timeout.is_zero()).then_some(self.timeout)
    }

    /// Are further retries allowed after a failure of the current attempt?
    pub fn has_retries_left(&self) -> bool {
        self.retried < self.retry
    }
}
