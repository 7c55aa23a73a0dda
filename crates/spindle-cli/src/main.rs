use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use tokio::time::{Duration, sleep};
use tracing::info;

use spindle_core::observability::init_tracing;
use spindle_core::{
    Handler, HandlerError, HandlerRegistry, InMemoryBroker, Processor, ProcessorConfig,
    RetryConfig, SpindleError, TaskContext, TaskMessage, handler_fn,
};

#[derive(Debug, Deserialize)]
struct HelloPayload {
    name: String,
}

/// 最初の n 回は失敗する handler
struct FlakyHandler {
    remaining_failures: AtomicU32,
}

impl FlakyHandler {
    fn new(n: u32) -> Self {
        Self {
            remaining_failures: AtomicU32::new(n),
        }
    }
}

#[async_trait]
impl Handler for FlakyHandler {
    async fn process(&self, ctx: &TaskContext, msg: &TaskMessage) -> Result<(), HandlerError> {
        let p: HelloPayload = serde_json::from_value(msg.payload.clone())
            .map_err(|e| HandlerError::skip_retry(format!("json decode: {e}")))?;

        let left = self.remaining_failures.load(Ordering::Relaxed);
        if left > 0 {
            self.remaining_failures.fetch_sub(1, Ordering::Relaxed);
            return Err(HandlerError::failed(format!(
                "intentional failure (left={left}, retry_count={:?})",
                ctx.retry_count()
            )));
        }

        println!("Hello again, {}!", p.name);
        Ok(())
    }
}

async fn hello(_ctx: TaskContext, msg: TaskMessage) -> Result<(), HandlerError> {
    let p: HelloPayload = serde_json::from_value(msg.payload)
        .map_err(|e| HandlerError::skip_retry(format!("json decode: {e}")))?;
    println!("Hello, {}!", p.name);
    Ok(())
}

/// ctx.cancelled() を見て途中で諦める handler
async fn slow(ctx: TaskContext, _msg: TaskMessage) -> Result<(), HandlerError> {
    tokio::select! {
        cause = ctx.cancelled() => Err(HandlerError::failed(format!("stopped early: {cause:?}"))),
        _ = sleep(Duration::from_secs(30)) => Ok(()),
    }
}

fn load_config() -> Result<ProcessorConfig, SpindleError> {
    match std::env::args().nth(1) {
        Some(path) => Ok(ProcessorConfig::from_file(path)?),
        // デモなので retry 間隔を短くする
        None => Ok(ProcessorConfig {
            concurrency: 4,
            retry: RetryConfig {
                base_delay_ms: 100,
                max_delay_ms: 1_000,
                ..RetryConfig::default()
            },
        }),
    }
}

#[tokio::main]
async fn main() -> Result<(), SpindleError> {
    init_tracing();
    let config = load_config()?;

    // (A) Broker と HandlerRegistry を用意
    let broker = InMemoryBroker::new();
    let handlers = HandlerRegistry::new()
        .with("hello", Arc::new(handler_fn(hello)))?
        .with("greet:", Arc::new(FlakyHandler::new(2)))?
        .with("slow", Arc::new(handler_fn(slow)))?;

    // (B) processor を起動
    let processor = Processor::new(Arc::new(broker.clone()), Arc::new(handlers), &config)?;
    let handle = processor.start();

    // (C) タスク投入
    broker
        .enqueue(TaskMessage::new("hello", serde_json::json!({ "name": "spindle" })))
        .await?;
    broker
        .enqueue(
            TaskMessage::new("greet:flaky", serde_json::json!({ "name": "retry" })).with_retry(3),
        )
        .await?;
    broker
        .enqueue(
            TaskMessage::new("slow", serde_json::Value::Null)
                .with_timeout(Duration::from_millis(200)),
        )
        .await?;
    let waiting = broker
        .enqueue(TaskMessage::new("slow", serde_json::Value::Null).with_retry(5))
        .await?;
    broker
        .enqueue(TaskMessage::new("unknown", serde_json::Value::Null))
        .await?;

    // (D) 実行中のタスクを外から cancel する
    sleep(Duration::from_millis(100)).await;
    handle.cancel_task(&waiting);

    // (E) 全タスクが Completed / Archived になるまでポーリング
    while !broker.is_settled().await {
        sleep(Duration::from_millis(50)).await;
    }
    for report in broker.reports().await {
        info!(
            task_id = %report.task_id,
            retried = report.retried,
            action = report.action.label(),
            "reported"
        );
    }
    println!("counts: {:?}", broker.counts().await);

    // (F) 停止
    broker.close().await;
    handle.shutdown_and_join().await;
    Ok(())
}
