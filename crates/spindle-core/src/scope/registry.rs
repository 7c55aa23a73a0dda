//! Cancellation registry: task id -> cancel handle of the running attempt.
//!
//! DashMap のシャードロックで key ごとに直列化する。無関係な key はブロックしない。

use dashmap::DashMap;
use tracing::debug;

use super::context::CancelHandle;
use crate::domain::TaskId;

/// Lets an outside actor reach into a running attempt and cancel it.
///
/// Owned by a Processor instance, so independent processors never share
/// cancellation state.
#[derive(Debug, Default)]
pub struct CancellationRegistry {
    entries: DashMap<TaskId, CancelHandle>,
}

impl CancellationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `handle` for `task_id`. A newer registration replaces an older
    /// one; the replaced handle is returned.
    pub fn register(&self, task_id: TaskId, handle: CancelHandle) -> Option<CancelHandle> {
        self.entries.insert(task_id, handle)
    }

    /// Register and get a guard that removes the entry when dropped.
    pub fn register_scoped(&self, task_id: TaskId, handle: CancelHandle) -> Registration<'_> {
        if self.register(task_id, handle.clone()).is_some() {
            debug!(%task_id, "replaced an existing cancellation entry");
        }
        Registration {
            registry: self,
            task_id,
            handle,
        }
    }

    /// Cancel the attempt registered for `task_id`. Returns whether one was
    /// found; an unknown id is not an error.
    pub fn trigger(&self, task_id: &TaskId) -> bool {
        // cancel はシャードの読み取りロック中に行う。remove と競合しても
        // 終了済みの scope に届くことはない
        match self.entries.get(task_id) {
            Some(entry) => {
                entry.value().cancel();
                true
            }
            None => false,
        }
    }

    /// Drop the entry for `task_id`, whoever registered it.
    pub fn remove(&self, task_id: &TaskId) -> bool {
        self.entries.remove(task_id).is_some()
    }

    pub fn contains(&self, task_id: &TaskId) -> bool {
        self.entries.contains_key(task_id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Removes its registry entry on drop, including during unwinding.
#[derive(Debug)]
pub struct Registration<'a> {
    registry: &'a CancellationRegistry,
    task_id: TaskId,
    handle: CancelHandle,
}

impl Registration<'_> {
    pub fn task_id(&self) -> TaskId {
        self.task_id
    }
}

impl Drop for Registration<'_> {
    fn drop(&mut self) {
        // 別の attempt に置き換えられていたらそちらは残す
        self.registry
            .entries
            .remove_if(&self.task_id, |_, current| current.same_scope(&self.handle));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::TaskMessage;
    use crate::ports::SystemClock;
    use crate::scope::create_scope;
    use std::sync::Arc;

    fn scope() -> (TaskMessage, crate::scope::TaskContext, CancelHandle) {
        let msg = TaskMessage::new("noop", serde_json::Value::Null);
        let (ctx, handle) = create_scope(&msg, &SystemClock);
        (msg, ctx, handle)
    }

    #[test]
    fn trigger_cancels_registered_scope() {
        let registry = CancellationRegistry::new();
        let (msg, ctx, handle) = scope();
        registry.register(msg.id, handle);

        assert!(registry.trigger(&msg.id));
        assert!(ctx.is_cancelled());
    }

    #[test]
    fn trigger_on_unknown_id_is_a_noop() {
        let registry = CancellationRegistry::new();
        assert!(!registry.trigger(&TaskId::generate()));
    }

    #[test]
    fn remove_is_idempotent() {
        let registry = CancellationRegistry::new();
        let (msg, ctx, handle) = scope();
        registry.register(msg.id, handle);

        assert!(registry.remove(&msg.id));
        assert!(!registry.remove(&msg.id));
        assert!(!registry.trigger(&msg.id));
        assert!(!ctx.is_cancelled());
    }

    #[test]
    fn newer_registration_replaces_older() {
        let registry = CancellationRegistry::new();
        let (msg, old_ctx, old) = scope();
        let (_, new_ctx, new) = scope();

        registry.register(msg.id, old);
        let replaced = registry.register(msg.id, new);
        assert!(replaced.is_some());

        registry.trigger(&msg.id);
        assert!(new_ctx.is_cancelled());
        assert!(!old_ctx.is_cancelled());
    }

    #[test]
    fn cancelling_one_task_leaves_others_alone() {
        let registry = CancellationRegistry::new();
        let (x, x_ctx, x_handle) = scope();
        let (y, y_ctx, y_handle) = scope();
        registry.register(x.id, x_handle);
        registry.register(y.id, y_handle);

        registry.trigger(&x.id);

        assert!(x_ctx.is_cancelled());
        assert!(!y_ctx.is_cancelled());
        assert!(registry.contains(&y.id));
    }

    #[test]
    fn guard_removes_entry_on_drop() {
        let registry = CancellationRegistry::new();
        let (msg, _ctx, handle) = scope();
        {
            let _registration = registry.register_scoped(msg.id, handle);
            assert!(registry.contains(&msg.id));
        }
        assert!(registry.is_empty());
    }

    #[test]
    fn guard_removes_entry_on_panic() {
        let registry = Arc::new(CancellationRegistry::new());
        let (msg, _ctx, handle) = scope();

        let r = Arc::clone(&registry);
        let result = std::thread::spawn(move || {
            let _registration = r.register_scoped(msg.id, handle);
            panic!("handler blew up");
        })
        .join();

        assert!(result.is_err());
        assert!(registry.is_empty());
    }

    #[test]
    fn stale_guard_keeps_newer_entry() {
        let registry = CancellationRegistry::new();
        let (msg, _old_ctx, old) = scope();
        let (_, new_ctx, new) = scope();

        let stale = registry.register_scoped(msg.id, old);
        registry.register(msg.id, new);
        drop(stale);

        assert!(registry.trigger(&msg.id));
        assert!(new_ctx.is_cancelled());
    }

    #[test]
    fn concurrent_register_trigger_remove() {
        let registry = Arc::new(CancellationRegistry::new());
        let mut threads = Vec::new();
        for _ in 0..8 {
            let registry = Arc::clone(&registry);
            threads.push(std::thread::spawn(move || {
                for _ in 0..200 {
                    let (msg, ctx, handle) = scope();
                    let registration = registry.register_scoped(msg.id, handle);
                    assert!(registry.trigger(&registration.task_id()));
                    assert!(ctx.is_cancelled());
                }
            }));
        }
        for t in threads {
            t.join().unwrap();
        }
        assert!(registry.is_empty());
    }
}
