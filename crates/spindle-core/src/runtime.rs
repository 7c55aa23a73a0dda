use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;

use crate::domain::{TaskMessage, TaskType};
use crate::error::{HandlerError, SpindleError};
use crate::scope::TaskContext;

/// User-supplied task logic.
///
/// Cancellation is cooperative: long-running handlers should watch
/// `ctx.cancelled()` (or poll `ctx.is_cancelled()`) and return promptly once
/// it fires. The Processor keeps the worker slot until the handler returns.
#[async_trait]
pub trait Handler: Send + Sync {
    async fn process(&self, ctx: &TaskContext, msg: &TaskMessage) -> Result<(), HandlerError>;
}

/// Adapter turning an async closure into a `Handler`.
///
/// The closure receives owned clones of the context and the message.
pub struct HandlerFn<F>(F);

pub fn handler_fn<F, Fut>(f: F) -> HandlerFn<F>
where
    F: Fn(TaskContext, TaskMessage) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
{
    HandlerFn(f)
}

#[async_trait]
impl<F, Fut> Handler for HandlerFn<F>
where
    F: Fn(TaskContext, TaskMessage) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
{
    async fn process(&self, ctx: &TaskContext, msg: &TaskMessage) -> Result<(), HandlerError> {
        (self.0)(ctx.clone(), msg.clone()).await
    }
}

/// Registry of handlers (pattern -> handler).
///
/// Design:
/// - Built during initialization (mutable).
/// - Used during runtime (immutable, shared behind `Arc`).
///
/// Routing: an exact pattern match wins. Otherwise the longest registered
/// pattern ending in `:` that prefixes the task type is used, so `email:`
/// handles `email:welcome` and `email:digest:weekly`.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: HashMap<String, Arc<dyn Handler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    pub fn register(
        &mut self,
        pattern: impl Into<String>,
        handler: Arc<dyn Handler>,
    ) -> Result<(), SpindleError> {
        let pattern = pattern.into();
        if self.handlers.contains_key(&pattern) {
            return Err(SpindleError::DuplicateHandler(TaskType::new(pattern)));
        }
        self.handlers.insert(pattern, handler);
        Ok(())
    }

    /// Builder-style `register`.
    pub fn with(
        mut self,
        pattern: impl Into<String>,
        handler: Arc<dyn Handler>,
    ) -> Result<Self, SpindleError> {
        self.register(pattern, handler)?;
        Ok(self)
    }

    pub fn resolve(&self, task_type: &TaskType) -> Option<Arc<dyn Handler>> {
        let name = task_type.as_str();
        if let Some(handler) = self.handlers.get(name) {
            return Some(Arc::clone(handler));
        }
        self.handlers
            .iter()
            .filter(|(pattern, _)| pattern.ends_with(':') && name.starts_with(pattern.as_str()))
            .max_by_key(|(pattern, _)| pattern.len())
            .map(|(_, handler)| Arc::clone(handler))
    }

    pub fn patterns(&self) -> Vec<String> {
        let mut patterns: Vec<String> = self.handlers.keys().cloned().collect();
        patterns.sort();
        patterns
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}
