//! Outcome model: how one handler invocation ended.
//!
//! This module does not know about retries or brokers. It only classifies the
//! attempt; `decision` turns that classification into an `Action`.

use serde::{Deserialize, Serialize};

use crate::error::HandlerError;

/// Which trigger fired an execution scope's cancellation signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CancelCause {
    /// The effective deadline elapsed.
    DeadlineExceeded,

    /// The cancel handle was invoked (administrative cancel or scope release).
    Requested,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OutcomeKind {
    Success,
    Failure,
    Cancelled,
}

/// Result of one attempt as seen by the Processor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Outcome {
    Success,

    /// Handler error or panic. `skip_retry` means the handler asked not to be
    /// retried.
    Failure { reason: String, skip_retry: bool },

    /// The scope was cancelled while the handler was still running.
    ///
    /// `late` is what the handler returned afterwards, if it was not a
    /// success.
    Cancelled {
        cause: CancelCause,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        late: Option<String>,
    },
}

impl Outcome {
    pub fn success() -> Self {
        Outcome::Success
    }

    pub fn failure(reason: impl Into<String>) -> Self {
        Outcome::Failure {
            reason: reason.into(),
            skip_retry: false,
        }
    }

    pub fn skip_retry(reason: impl Into<String>) -> Self {
        Outcome::Failure {
            reason: reason.into(),
            skip_retry: true,
        }
    }

    pub fn panicked(message: impl AsRef<str>) -> Self {
        Outcome::failure(format!("panic: {}", message.as_ref()))
    }

    pub fn cancelled(cause: CancelCause) -> Self {
        Outcome::Cancelled { cause, late: None }
    }

    /// Cancelled, then the handler still returned `late`.
    pub fn cancelled_then(cause: CancelCause, late: Outcome) -> Self {
        let late = match late {
            Outcome::Success => None,
            other => other.reason(),
        };
        Outcome::Cancelled { cause, late }
    }

    pub fn kind(&self) -> OutcomeKind {
        match self {
            Outcome::Success => OutcomeKind::Success,
            Outcome::Failure { .. } => OutcomeKind::Failure,
            Outcome::Cancelled { .. } => OutcomeKind::Cancelled,
        }
    }

    pub fn reason(&self) -> Option<String> {
        match self {
            Outcome::Success => None,
            Outcome::Failure { reason, .. } => Some(reason.clone()),
            Outcome::Cancelled { cause, late } => {
                let base = match cause {
                    CancelCause::DeadlineExceeded => "deadline exceeded",
                    CancelCause::Requested => "cancelled",
                };
                Some(match late {
                    Some(late) => format!("{base}; handler returned afterwards: {late}"),
                    None => base.to_string(),
                })
            }
        }
    }
}

impl From<Result<(), HandlerError>> for Outcome {
    fn from(result: Result<(), HandlerError>) -> Self {
        match result {
            Ok(()) => Outcome::success(),
            Err(HandlerError::SkipRetry(reason)) => Outcome::skip_retry(reason),
            Err(err) => Outcome::failure(err.to_string()),
        }
    }
}
