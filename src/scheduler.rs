//! Delayed-task scheduling for the async executor.
//!
//! The executor treats scheduling as an external collaborator behind a
//! minimal interface: run a task once, no earlier than a delay, and hand
//! back a cancellable handle. The default implementation wraps a tokio
//! runtime handle; tests substitute manual schedulers for deterministic
//! timing.

use futures::future::BoxFuture;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;

/// Cancellable handle to a scheduled task.
pub trait ScheduledHandle: Send + Sync {
    /// Cancel the task if it has not started running. A task already past
    /// its delay runs to completion.
    fn cancel(&self);
    fn is_cancelled(&self) -> bool;
    fn is_done(&self) -> bool;
}

/// Schedules tasks to run after a delay.
///
/// Contract: the task runs exactly once, no earlier than `delay`, on a
/// thread the scheduler provides. Implementations must be safe under
/// concurrent `schedule` and `cancel`.
pub trait Scheduler: Send + Sync + std::fmt::Debug {
    fn schedule(&self, delay: Duration, task: BoxFuture<'static, ()>) -> Box<dyn ScheduledHandle>;
}

const WAITING: u8 = 0;
const RUNNING: u8 = 1;
const CANCELLED: u8 = 2;

/// Default scheduler backed by a tokio runtime handle.
///
/// The handle is captured at construction, so tasks can be scheduled (and
/// retries re-scheduled) from threads outside the runtime, such as a
/// contextual completion callback.
#[derive(Debug, Clone)]
pub struct TokioScheduler {
    handle: Handle,
}

impl TokioScheduler {
    /// Capture the current runtime's handle.
    ///
    /// # Panics
    ///
    /// Panics when called outside a tokio runtime; use
    /// [`TokioScheduler::from_handle`] there.
    pub fn new() -> Self {
        Self::from_handle(Handle::current())
    }

    pub fn from_handle(handle: Handle) -> Self {
        Self { handle }
    }
}

impl Default for TokioScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Scheduler for TokioScheduler {
    fn schedule(&self, delay: Duration, task: BoxFuture<'static, ()>) -> Box<dyn ScheduledHandle> {
        let state = Arc::new(AtomicU8::new(WAITING));
        let task_state = state.clone();
        let join = self.handle.spawn(async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            // The waiting -> running transition is the cancellation point:
            // whoever loses the exchange stands down.
            if task_state
                .compare_exchange(WAITING, RUNNING, Ordering::AcqRel, Ordering::Acquire)
                .is_err()
            {
                return;
            }
            task.await;
        });
        Box::new(TokioHandle { state, join })
    }
}

struct TokioHandle {
    state: Arc<AtomicU8>,
    join: JoinHandle<()>,
}

impl ScheduledHandle for TokioHandle {
    fn cancel(&self) {
        if self
            .state
            .compare_exchange(WAITING, CANCELLED, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            self.join.abort();
        }
    }

    fn is_cancelled(&self) -> bool {
        self.state.load(Ordering::Acquire) == CANCELLED
    }

    fn is_done(&self) -> bool {
        self.join.is_finished()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[tokio::test]
    async fn task_runs_once_after_delay() {
        let scheduler = TokioScheduler::new();
        let runs = Arc::new(AtomicUsize::new(0));
        let runs_clone = runs.clone();

        let handle = scheduler.schedule(
            Duration::from_millis(20),
            Box::pin(async move {
                runs_clone.fetch_add(1, Ordering::SeqCst);
            }),
        );

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert!(handle.is_done());
        assert!(!handle.is_cancelled());
    }

    #[tokio::test]
    async fn cancel_during_delay_prevents_the_run() {
        let scheduler = TokioScheduler::new();
        let runs = Arc::new(AtomicUsize::new(0));
        let runs_clone = runs.clone();

        let handle = scheduler.schedule(
            Duration::from_secs(60),
            Box::pin(async move {
                runs_clone.fetch_add(1, Ordering::SeqCst);
            }),
        );
        handle.cancel();
        assert!(handle.is_cancelled());

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(runs.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn cancel_after_start_lets_the_task_finish() {
        let scheduler = TokioScheduler::new();
        let finished = Arc::new(AtomicUsize::new(0));
        let finished_clone = finished.clone();
        let (started_tx, started_rx) = tokio::sync::oneshot::channel();
        let (release_tx, release_rx) = tokio::sync::oneshot::channel::<()>();

        let handle = scheduler.schedule(
            Duration::ZERO,
            Box::pin(async move {
                let _ = started_tx.send(());
                let _ = release_rx.await;
                finished_clone.fetch_add(1, Ordering::SeqCst);
            }),
        );

        started_rx.await.expect("task started");
        handle.cancel();
        assert!(!handle.is_cancelled(), "a running task is not cancellable");

        let _ = release_tx.send(());
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(finished.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn zero_delay_runs_immediately() {
        let scheduler = TokioScheduler::new();
        let (tx, rx) = tokio::sync::oneshot::channel();

        scheduler.schedule(
            Duration::ZERO,
            Box::pin(async move {
                let _ = tx.send(42);
            }),
        );

        assert_eq!(rx.await.expect("task ran"), 42);
    }
}
