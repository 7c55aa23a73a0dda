//! Execution scope for one task attempt.
//!
//! A scope carries a single cancellation signal with two triggers: the
//! effective deadline and an explicit `CancelHandle`. Whichever fires first
//! records the cause; the signal never fires twice.
//!
//! The deadline trigger is lazy. It fires when someone waits on
//! `TaskContext::cancelled` or checks `TaskContext::is_cancelled` after the
//! deadline has passed. The Processor waits on it for the whole attempt.

use std::sync::{Arc, OnceLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::deadline;
use crate::domain::{CancelCause, TaskId, TaskMessage};
use crate::ports::Clock;

#[derive(Debug, Default)]
struct Signal {
    token: CancellationToken,
    cause: OnceLock<CancelCause>,
}

impl Signal {
    fn fire(&self, cause: CancelCause) {
        // cause を先に確定させてから token を閉じる
        let _ = self.cause.set(cause);
        self.token.cancel();
    }
}

/// Read-only task metadata attached to a managed scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaskMetadata {
    pub task_id: TaskId,
    pub retry_count: u32,
    pub max_retry: u32,
}

/// What a handler sees while it runs.
///
/// Cheap to clone; clones share the same signal.
#[derive(Debug, Clone)]
pub struct TaskContext {
    signal: Arc<Signal>,
    deadline: Option<DateTime<Utc>>,
    expires_at: Option<Instant>,
    metadata: Option<TaskMetadata>,
}

impl TaskContext {
    /// A scope with no deadline, no metadata and nobody able to cancel it.
    ///
    /// Useful for calling handler logic directly, outside a Processor.
    pub fn background() -> Self {
        Self {
            signal: Arc::new(Signal::default()),
            deadline: None,
            expires_at: None,
            metadata: None,
        }
    }

    /// Effective deadline, if any.
    pub fn deadline(&self) -> Option<DateTime<Utc>> {
        self.deadline
    }

    pub fn metadata(&self) -> Option<&TaskMetadata> {
        self.metadata.as_ref()
    }

    pub fn task_id(&self) -> Option<TaskId> {
        self.metadata.map(|m| m.task_id)
    }

    /// Retries already consumed before this attempt.
    pub fn retry_count(&self) -> Option<u32> {
        self.metadata.map(|m| m.retry_count)
    }

    pub fn max_retry(&self) -> Option<u32> {
        self.metadata.map(|m| m.max_retry)
    }

    /// Non-blocking check. Fires the deadline trigger if it has passed.
    pub fn is_cancelled(&self) -> bool {
        if self.signal.token.is_cancelled() {
            return true;
        }
        match self.expires_at {
            Some(at) if Instant::now() >= at => {
                self.signal.fire(CancelCause::DeadlineExceeded);
                true
            }
            _ => false,
        }
    }

    /// Cause of cancellation, `None` while the signal has not fired.
    pub fn cause(&self) -> Option<CancelCause> {
        if !self.is_cancelled() {
            return None;
        }
        self.signal.cause.get().copied()
    }

    /// Wait until the signal fires and return its cause.
    pub async fn cancelled(&self) -> CancelCause {
        match self.expires_at {
            None => self.signal.token.cancelled().await,
            Some(at) => {
                tokio::select! {
                    _ = self.signal.token.cancelled() => {}
                    _ = tokio::time::sleep_until(at) => {
                        self.signal.fire(CancelCause::DeadlineExceeded);
                    }
                }
            }
        }
        self.signal
            .cause
            .get()
            .copied()
            .unwrap_or(CancelCause::Requested)
    }

    /// Token cancelled together with this scope, for handing to sub-tasks.
    ///
    /// The deadline reaches child tokens only while someone is waiting on
    /// `cancelled()`, which the Processor does for every attempt.
    pub fn child_token(&self) -> CancellationToken {
        self.signal.token.child_token()
    }

    /// Time left until the deadline, zero once it has passed.
    pub fn remaining(&self) -> Option<Duration> {
        self.expires_at
            .map(|at| at.saturating_duration_since(Instant::now()))
    }
}

/// Explicit cancel control for a scope. Idempotent and non-blocking.
#[derive(Debug, Clone)]
pub struct CancelHandle {
    signal: Arc<Signal>,
}

impl CancelHandle {
    pub fn cancel(&self) {
        self.signal.fire(CancelCause::Requested);
    }

    pub fn is_cancelled(&self) -> bool {
        self.signal.token.is_cancelled()
    }

    /// Do both handles control the same scope?
    pub fn same_scope(&self, other: &CancelHandle) -> bool {
        Arc::ptr_eq(&self.signal, &other.signal)
    }
}

/// Build the scope for one attempt of `msg`, resolving its deadline against
/// `clock.now()`.
pub fn create_scope(msg: &TaskMessage, clock: &dyn Clock) -> (TaskContext, CancelHandle) {
    let now = clock.now();
    let deadline = deadline::resolve(msg.timeout(), msg.deadline, now);
    let expires_at = deadline.map(|at| {
        let left = (at - now).to_std().unwrap_or(Duration::ZERO);
        Instant::now()
            .checked_add(left)
            .unwrap_or_else(far_future)
    });

    let signal = Arc::new(Signal::default());
    let ctx = TaskContext {
        signal: Arc::clone(&signal),
        deadline,
        expires_at,
        metadata: Some(TaskMetadata {
            task_id: msg.id,
            retry_count: msg.retried,
            max_retry: msg.retry,
        }),
    };
    (ctx, CancelHandle { signal })
}

// tokio の Instant は巨大な値を足すと overflow するので上限を丸める
fn far_future() -> Instant {
    Instant::now() + Duration::from_secs(86_400 * 365 * 30)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::{FixedClock, SystemClock};
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap()
    }

    fn msg() -> TaskMessage {
        TaskMessage::new("something", serde_json::Value::Null)
    }

    fn approx_eq(a: DateTime<Utc>, b: DateTime<Utc>) -> bool {
        (a - b).num_milliseconds().abs() <= 1_000
    }

    #[tokio::test]
    async fn scope_with_time_restrictions() {
        let now = Utc::now();
        let cases = [
            ("only timeout", Duration::from_secs(10), None, now + chrono::Duration::seconds(10)),
            ("only deadline", Duration::ZERO, Some(now + chrono::Duration::hours(1)), now + chrono::Duration::hours(1)),
            ("timeout < deadline", Duration::from_secs(10), Some(now + chrono::Duration::hours(1)), now + chrono::Duration::seconds(10)),
            ("timeout > deadline", Duration::from_secs(600), Some(now + chrono::Duration::seconds(30)), now + chrono::Duration::seconds(30)),
        ];

        for (desc, timeout, deadline, want) in cases {
            let mut m = msg().with_timeout(timeout);
            m.deadline = deadline;

            let (ctx, cancel) = create_scope(&m, &SystemClock);
            assert!(!ctx.is_cancelled(), "{desc}: fired before cancel");

            let got = ctx.deadline().unwrap_or_else(|| panic!("{desc}: deadline not set"));
            assert!(approx_eq(got, want), "{desc}: deadline {got}, want {want}");

            cancel.cancel();
            assert!(ctx.is_cancelled(), "{desc}: still blocked after cancel");
            assert_eq!(ctx.cause(), Some(CancelCause::Requested));
        }
    }

    #[tokio::test]
    async fn scope_without_time_restrictions() {
        let (ctx, cancel) = create_scope(&msg(), &SystemClock);

        assert!(!ctx.is_cancelled());
        assert_eq!(ctx.deadline(), None);
        assert_eq!(ctx.remaining(), None);

        cancel.cancel();
        assert!(ctx.is_cancelled());
        let cause = tokio::time::timeout(Duration::from_millis(100), ctx.cancelled())
            .await
            .unwrap();
        assert_eq!(cause, CancelCause::Requested);
    }

    #[tokio::test]
    async fn fixed_clock_makes_deadline_exact() {
        let clock = FixedClock::new(t0());
        let m = msg()
            .with_timeout(Duration::from_secs(600))
            .with_deadline(t0() + chrono::Duration::seconds(30));

        let (ctx, _cancel) = create_scope(&m, &clock);
        assert_eq!(ctx.deadline(), Some(t0() + chrono::Duration::seconds(30)));
    }

    #[tokio::test]
    async fn cancel_is_idempotent() {
        let (ctx, cancel) = create_scope(&msg(), &SystemClock);
        cancel.cancel();
        cancel.cancel();
        cancel.clone().cancel();

        assert!(cancel.is_cancelled());
        assert_eq!(ctx.cancelled().await, CancelCause::Requested);
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_fires_the_signal() {
        let m = msg().with_timeout(Duration::from_millis(100));
        let (ctx, cancel) = create_scope(&m, &SystemClock);

        assert!(!ctx.is_cancelled());
        assert_eq!(ctx.cancelled().await, CancelCause::DeadlineExceeded);

        // 後から cancel しても cause は変わらない
        cancel.cancel();
        assert_eq!(ctx.cause(), Some(CancelCause::DeadlineExceeded));
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_before_deadline_wins() {
        let m = msg().with_timeout(Duration::from_secs(10));
        let (ctx, cancel) = create_scope(&m, &SystemClock);

        cancel.cancel();
        tokio::time::advance(Duration::from_secs(20)).await;
        assert_eq!(ctx.cancelled().await, CancelCause::Requested);
    }

    #[tokio::test]
    async fn past_deadline_is_already_cancelled() {
        let clock = FixedClock::new(t0());
        let m = msg().with_deadline(t0() - chrono::Duration::seconds(1));

        let (ctx, _cancel) = create_scope(&m, &clock);
        assert!(ctx.is_cancelled());
        assert_eq!(ctx.cause(), Some(CancelCause::DeadlineExceeded));
    }

    #[tokio::test]
    async fn child_tokens_follow_the_scope() {
        let (ctx, cancel) = create_scope(&msg(), &SystemClock);
        let child = ctx.child_token();
        assert!(!child.is_cancelled());
        cancel.cancel();
        assert!(child.is_cancelled());
    }

    #[test]
    fn metadata_matches_message() {
        let cases = [(25, 0), (10, 5)];
        for (retry, retried) in cases {
            let m = msg().with_retry(retry).with_retried(retried);
            let (ctx, _cancel) = create_scope(&m, &SystemClock);

            assert_eq!(ctx.task_id(), Some(m.id));
            assert_eq!(ctx.retry_count(), Some(retried));
            assert_eq!(ctx.max_retry(), Some(retry));
        }
    }

    #[test]
    fn background_scope_has_no_metadata() {
        let ctx = TaskContext::background();
        assert_eq!(ctx.task_id(), None);
        assert_eq!(ctx.retry_count(), None);
        assert_eq!(ctx.max_retry(), None);
        assert!(!ctx.is_cancelled());
    }

    #[test]
    fn handles_know_their_scope() {
        let (_a_ctx, a) = create_scope(&msg(), &SystemClock);
        let (_b_ctx, b) = create_scope(&msg(), &SystemClock);
        assert!(a.same_scope(&a.clone()));
        assert!(!a.same_scope(&b));
    }
}
