//! Decision model: what the broker should do with a task after an attempt.
//!
//! `Action` is the only thing that crosses from the execution core to the
//! broker. `Decider` computes it from the attempt's `Outcome` and the task's
//! retry counters.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::{CancelCause, Outcome};
use crate::queue::RetryPolicy;

/// Why a task ended up in the archive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArchiveKind {
    /// Retries exhausted, or the handler asked not to be retried.
    Failed,

    /// Cancelled on request; no retry was consumed.
    Cancelled,
}

/// Terminal decision for one attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// Mark done and drop from active state.
    Complete,

    /// Bump `retried` and run again after `delay`.
    RetryAfter { delay: Duration, reason: String },

    /// Move to the permanent failure store.
    Archive { kind: ArchiveKind, reason: String },
}

impl Action {
    pub fn is_retry(&self) -> bool {
        matches!(self, Action::RetryAfter { .. })
    }

    pub fn is_archive(&self) -> bool {
        matches!(self, Action::Archive { .. })
    }

    pub fn label(&self) -> &'static str {
        match self {
            Action::Complete => "complete",
            Action::RetryAfter { .. } => "retry",
            Action::Archive { .. } => "archive",
        }
    }
}

/// Pure function from (outcome, retried, max_retry) to an `Action`.
///
/// Deciders have no side effects; applying the action is the broker's job.
pub trait Decider: Send + Sync {
    fn decide(&self, outcome: &Outcome, retried: u32, max_retry: u32) -> Action;
}

/// Retry-count based decider with exponential backoff.
///
/// - success → Complete
/// - failure with retries left → RetryAfter(policy delay)
/// - failure without retries left, or skip-retry → Archive(failed)
/// - cancelled by deadline → same as failure
/// - cancelled on request → Archive(cancelled)
#[derive(Debug, Clone, Default)]
pub struct DefaultDecider {
    retry_policy: RetryPolicy,
}

impl DefaultDecider {
    pub fn new(retry_policy: RetryPolicy) -> Self {
        Self { retry_policy }
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry_policy
    }

    fn on_failure(&self, reason: String, retried: u32, max_retry: u32) -> Action {
        if retried >= max_retry {
            return Action::Archive {
                kind: ArchiveKind::Failed,
                reason: format!("retries exhausted ({retried}/{max_retry}): {reason}"),
            };
        }
        let delay = self.retry_policy.next_delay(retried);
        Action::RetryAfter {
            delay,
            reason: format!(
                "retry {}/{} after {:?}: {reason}",
                retried + 1,
                max_retry,
                delay
            ),
        }
    }
}

impl Decider for DefaultDecider {
    fn decide(&self, outcome: &Outcome, retried: u32, max_retry: u32) -> Action {
        match outcome {
            Outcome::Success => Action::Complete,
            Outcome::Failure {
                reason,
                skip_retry: true,
            } => Action::Archive {
                kind: ArchiveKind::Failed,
                reason: format!("skip retry: {reason}"),
            },
            Outcome::Failure { reason, .. } => self.on_failure(reason.clone(), retried, max_retry),
            Outcome::Cancelled {
                cause: CancelCause::DeadlineExceeded,
                ..
            } => self.on_failure(outcome.reason().unwrap_or_default(), retried, max_retry),
            Outcome::Cancelled {
                cause: CancelCause::Requested,
                late,
            } => Action::Archive {
                kind: ArchiveKind::Cancelled,
                reason: match late {
                    Some(late) => format!("cancelled on request; handler returned afterwards: {late}"),
                    None => "cancelled on request".to_string(),
                },
            },
        }
    }
}
