use thiserror::Error;

use crate::domain::{TaskId, TaskType};

#[derive(Debug, Error)]
pub enum SpindleError {
    #[error("handler not found for task_type={0}")]
    HandlerNotFound(TaskType),

    #[error("duplicate handler for task_type={0}")]
    DuplicateHandler(TaskType),

    #[error(transparent)]
    Broker(#[from] BrokerError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Error returned by a task handler.
///
/// `SkipRetry` archives the task right away instead of scheduling a retry.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HandlerError {
    #[error("{0}")]
    Failed(String),

    #[error("skip retry: {0}")]
    SkipRetry(String),
}

impl HandlerError {
    pub fn failed(reason: impl Into<String>) -> Self {
        HandlerError::Failed(reason.into())
    }

    pub fn skip_retry(reason: impl Into<String>) -> Self {
        HandlerError::SkipRetry(reason.into())
    }
}

#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("broker is closed")]
    Closed,

    #[error("unknown task id={0}")]
    UnknownTask(TaskId),

    #[error("task id={0} is already enqueued")]
    DuplicateTask(TaskId),

    /// Backend-specific failure of an external broker.
    #[error("{0}")]
    Other(String),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}
