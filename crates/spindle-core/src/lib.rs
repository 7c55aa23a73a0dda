//! spindle-core
//!
//! Execution core of a task-queue worker.
//!
//! # モジュール構成
//! - **domain**: タスクメッセージ、Outcome、Decider（retry / archive の判定）
//! - **scope**: 1 attempt ごとの実行スコープ（deadline 解決、cancel signal、registry）
//! - **queue**: Broker trait、RetryPolicy、開発用の InMemoryBroker
//! - **runtime**: Handler trait とパターンによるルーティング
//! - **processor**: ワーカープール本体
//! - **ports**: Clock などの外部依存の抽象

pub mod config;
pub mod domain;
pub mod error;
pub mod observability;
pub mod ports;
pub mod processor;
pub mod queue;
pub mod runtime;
pub mod scope;

pub use config::{ProcessorConfig, RetryConfig};
pub use domain::{Action, ArchiveKind, CancelCause, Outcome, TaskId, TaskMessage, TaskType};
pub use error::{BrokerError, ConfigError, HandlerError, SpindleError};
pub use processor::{Processor, ProcessorHandle};
pub use queue::{Broker, InMemoryBroker, RetryPolicy};
pub use runtime::{Handler, HandlerRegistry, handler_fn};
pub use scope::{CancelHandle, CancellationRegistry, TaskContext};
