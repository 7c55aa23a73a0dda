//! Processor: the worker pool that runs task attempts.
//!
//! 1 attempt の流れ:
//! dequeue → scope 作成 → registry 登録 → handler 実行 → Outcome → Decider → report

use std::any::Any;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::{JoinError, JoinHandle};
use tracing::{debug, error, info, warn};

use crate::config::ProcessorConfig;
use crate::domain::{Action, AttemptState, Decider, DefaultDecider, Outcome, TaskId, TaskMessage};
use crate::error::{HandlerError, SpindleError};
use crate::ports::{Clock, SystemClock};
use crate::queue::{Broker, RetryPolicy};
use crate::runtime::HandlerRegistry;
use crate::scope::{CancellationRegistry, TaskContext, create_scope};

/// Pause before asking the broker again after a dequeue error.
const DEQUEUE_ERROR_BACKOFF: Duration = Duration::from_secs(1);

/// Executes task attempts against a broker.
///
/// Cheap to clone; clones share the broker, handlers and the cancellation
/// registry.
#[derive(Clone)]
pub struct Processor {
    broker: Arc<dyn Broker>,
    handlers: Arc<HandlerRegistry>,
    decider: Arc<dyn Decider>,
    clock: Arc<dyn Clock>,
    cancellations: Arc<CancellationRegistry>,
    concurrency: usize,
}

impl Processor {
    pub fn new(
        broker: Arc<dyn Broker>,
        handlers: Arc<HandlerRegistry>,
        config: &ProcessorConfig,
    ) -> Result<Self, SpindleError> {
        config.validate()?;
        Ok(Self {
            broker,
            handlers,
            decider: Arc::new(DefaultDecider::new(RetryPolicy::from(&config.retry))),
            clock: Arc::new(SystemClock),
            cancellations: Arc::new(CancellationRegistry::new()),
            concurrency: config.concurrency,
        })
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_decider(mut self, decider: Arc<dyn Decider>) -> Self {
        self.decider = decider;
        self
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    pub fn cancellations(&self) -> &CancellationRegistry {
        &self.cancellations
    }

    /// Cancel the running attempt of `task_id`, if there is one.
    ///
    /// Unknown or already finished tasks are ignored.
    pub fn cancel_task(&self, task_id: &TaskId) {
        if self.cancellations.trigger(task_id) {
            info!(%task_id, "cancel requested for running task");
        } else {
            debug!(%task_id, "cancel requested for task that is not running");
        }
    }

    /// Spawn `concurrency` workers.
    pub fn start(self) -> ProcessorHandle {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let mut joins = Vec::with_capacity(self.concurrency);
        for worker_id in 0..self.concurrency {
            let processor = self.clone();
            let rx = shutdown_rx.clone();
            joins.push(tokio::spawn(async move {
                processor.worker_loop(worker_id, rx).await;
            }));
        }
        info!(concurrency = self.concurrency, "processor started");

        ProcessorHandle {
            processor: self,
            shutdown_tx,
            joins,
        }
    }

    async fn worker_loop(&self, worker_id: usize, mut shutdown_rx: watch::Receiver<bool>) {
        loop {
            if *shutdown_rx.borrow() {
                break;
            }

            // dequeue は待つ可能性があるので shutdown と競合させる
            let next = tokio::select! {
                changed = shutdown_rx.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    continue;
                }
                next = self.broker.dequeue() => next,
            };

            match next {
                Ok(Some(msg)) => {
                    self.process(msg).await;
                }
                Ok(None) => {
                    debug!(worker_id, "broker closed, worker exiting");
                    break;
                }
                Err(e) => {
                    error!(worker_id, "dequeue failed: {e}");
                    tokio::select! {
                        changed = shutdown_rx.changed() => {
                            if changed.is_err() {
                                break;
                            }
                        }
                        _ = tokio::time::sleep(DEQUEUE_ERROR_BACKOFF) => {}
                    }
                }
            }
        }
        debug!(worker_id, "worker stopped");
    }

    /// Run one attempt of `msg` to completion and report the decision.
    ///
    /// Entry point for custom drivers and tests. Workers started by `start`
    /// call it from their own slot; calling it directly runs the attempt on
    /// the caller's task, outside the pool's `concurrency` limit. It returns
    /// only after the handler has returned, even when cancellation fired
    /// earlier.
    pub async fn process(&self, msg: TaskMessage) -> Action {
        let task_id = msg.id;
        debug!(%task_id, state = ?AttemptState::Dequeued, "attempt dequeued");

        let (ctx, cancel) = create_scope(&msg, self.clock.as_ref());
        let registration = self.cancellations.register_scoped(task_id, cancel.clone());

        info!(
            %task_id,
            state = ?AttemptState::Running,
            task_type = %msg.task_type,
            attempt = msg.retried + 1,
            max_retry = msg.retry,
            deadline = ?ctx.deadline(),
            "attempt started"
        );

        let outcome = self.run_handler(&msg, &ctx).await;

        // handler が戻った後でのみ登録を外す
        drop(registration);
        cancel.cancel();

        let state = AttemptState::terminal_for(&outcome);
        let action = self.decider.decide(&outcome, msg.retried, msg.retry);
        match &action {
            Action::Complete => info!(%task_id, ?state, "attempt succeeded"),
            Action::RetryAfter { delay, reason } => {
                warn!(%task_id, ?state, ?delay, "attempt failed, retrying: {reason}")
            }
            Action::Archive { kind, reason } => {
                warn!(%task_id, ?state, ?kind, "task archived: {reason}")
            }
        }

        if let Err(e) = self.broker.report(task_id, &action).await {
            error!(%task_id, action = action.label(), "report failed: {e}");
        }
        action
    }

    async fn run_handler(&self, msg: &TaskMessage, ctx: &TaskContext) -> Outcome {
        let Some(handler) = self.handlers.resolve(&msg.task_type) else {
            return Outcome::failure(SpindleError::HandlerNotFound(msg.task_type.clone()).to_string());
        };

        // 別タスクで動かして panic を JoinError として受け取る
        let mut join: JoinHandle<Result<(), HandlerError>> = tokio::spawn({
            let ctx = ctx.clone();
            let msg = msg.clone();
            async move { handler.process(&ctx, &msg).await }
        });

        tokio::select! {
            biased;
            joined = &mut join => outcome_from_join(joined),
            cause = ctx.cancelled() => {
                warn!(task_id = %msg.id, ?cause, "cancellation fired, waiting for handler to return");
                let late = outcome_from_join(join.await);
                debug!(task_id = %msg.id, ?late, "handler returned after cancellation");
                Outcome::cancelled_then(cause, late)
            }
        }
    }
}

fn outcome_from_join(joined: Result<Result<(), HandlerError>, JoinError>) -> Outcome {
    match joined {
        Ok(result) => Outcome::from(result),
        Err(e) if e.is_panic() => Outcome::panicked(panic_message(e.into_panic())),
        Err(e) => Outcome::failure(format!("handler task aborted: {e}")),
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

/// Handle to a running worker pool.
/// - `request_shutdown()` でワーカーは新しいタスクを取らなくなる
/// - `shutdown_and_join()` で実行中の attempt の終了を待てる
pub struct ProcessorHandle {
    processor: Processor,
    shutdown_tx: watch::Sender<bool>,
    joins: Vec<JoinHandle<()>>,
}

impl ProcessorHandle {
    pub fn cancel_task(&self, task_id: &TaskId) {
        self.processor.cancel_task(task_id);
    }

    pub fn processor(&self) -> &Processor {
        &self.processor
    }

    /// Stop taking new tasks. In-flight attempts are not cancelled.
    pub fn request_shutdown(&self) {
        // ignore send error: receivers may already be dropped
        let _ = self.shutdown_tx.send(true);
    }

    pub async fn shutdown_and_join(self) {
        self.request_shutdown();
        for join in self.joins {
            if let Err(e) = join.await {
                error!("worker task ended abnormally: {e}");
            }
        }
        info!("processor stopped");
    }
}
