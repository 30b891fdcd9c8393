//! The handle returned by asynchronous entry points.
//!
//! A `RetryFuture` is shared between the caller, the execution driving it,
//! and any registered listeners; cloning clones the handle, not the
//! execution. Every terminal path converges on one transition guarded by
//! the future's monitor: `complete` and `cancel` race, and whoever first
//! acquires the lock and finds the future still pending wins. Listener
//! callbacks fire after the lock is released, so a listener may freely
//! register further listeners or cancel.

use crate::error::RetryError;
use crate::invocation::InvocationStats;
use crate::listeners::Listeners;
use crate::scheduler::{ScheduledHandle, Scheduler};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::Notify;

pub(crate) struct FutureState<T, E> {
    pub(crate) done: bool,
    pub(crate) cancelled: bool,
    pub(crate) success: bool,
    pub(crate) result: Option<T>,
    pub(crate) failure: Option<RetryError<E>>,
    pub(crate) stats: InvocationStats,
    pub(crate) delegate: Option<Box<dyn ScheduledHandle>>,
    pub(crate) listeners: Listeners<T, E>,
}

pub(crate) struct FutureCore<T, E> {
    state: Mutex<FutureState<T, E>>,
    notify: Notify,
    scheduler: Arc<dyn Scheduler>,
}

impl<T, E> FutureCore<T, E> {
    pub(crate) fn new(scheduler: Arc<dyn Scheduler>, listeners: Listeners<T, E>) -> Self {
        Self {
            state: Mutex::new(FutureState {
                done: false,
                cancelled: false,
                success: false,
                result: None,
                failure: None,
                stats: InvocationStats::default(),
                delegate: None,
                listeners,
            }),
            notify: Notify::new(),
            scheduler,
        }
    }

    pub(crate) fn state(&self) -> MutexGuard<'_, FutureState<T, E>> {
        self.state.lock().expect("retry future lock poisoned")
    }

    pub(crate) fn is_terminal(&self) -> bool {
        self.state().done
    }

    pub(crate) fn listeners_snapshot(&self) -> Listeners<T, E> {
        self.state().listeners.clone()
    }

    /// Install the handle for the currently pending trial, releasing the
    /// previous one. A handle arriving after terminal completion is
    /// cancelled on the spot.
    pub(crate) fn set_delegate(&self, handle: Box<dyn ScheduledHandle>) {
        let mut state = self.state();
        if state.done {
            drop(state);
            handle.cancel();
            return;
        }
        state.delegate = Some(handle);
    }
}

impl<T, E> FutureCore<T, E>
where
    T: Clone + Send + 'static,
    E: Send + Sync + 'static,
{
    /// Terminal transition. Returns false when the future was already done
    /// (the caller lost the race) and fires no listeners then.
    pub(crate) fn complete(
        &self,
        result: Option<T>,
        failure: Option<RetryError<E>>,
        success: bool,
        stats: InvocationStats,
    ) -> bool {
        let result_snapshot = result.clone();
        let failure_snapshot = failure.clone();
        let listeners = {
            let mut state = self.state();
            if state.done {
                return false;
            }
            state.done = true;
            state.success = success;
            state.result = result;
            state.failure = failure;
            state.stats = stats;
            state.delegate = None;
            state.listeners.clone()
        };
        self.notify.notify_waiters();
        listeners.fire_terminal(
            result_snapshot.as_ref(),
            failure_snapshot.as_ref(),
            success,
            &stats,
            Some(&self.scheduler),
        );
        true
    }
}

/// A future result of an asynchronous retryable execution.
pub struct RetryFuture<T, E> {
    core: Arc<FutureCore<T, E>>,
}

impl<T, E> Clone for RetryFuture<T, E> {
    fn clone(&self) -> Self {
        Self { core: self.core.clone() }
    }
}

impl<T, E> fmt::Debug for RetryFuture<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.core.state();
        f.debug_struct("RetryFuture")
            .field("done", &state.done)
            .field("cancelled", &state.cancelled)
            .field("success", &state.success)
            .finish()
    }
}

impl<T, E> RetryFuture<T, E> {
    pub(crate) fn new(scheduler: Arc<dyn Scheduler>, listeners: Listeners<T, E>) -> Self {
        Self { core: Arc::new(FutureCore::new(scheduler, listeners)) }
    }

    pub(crate) fn core(&self) -> Arc<FutureCore<T, E>> {
        self.core.clone()
    }

    /// Whether the future has reached terminal completion.
    pub fn is_done(&self) -> bool {
        self.core.state().done
    }

    /// Whether the future was cancelled.
    pub fn is_cancelled(&self) -> bool {
        self.core.state().cancelled
    }

    /// Whether the terminal completion was successful. False while pending,
    /// and false for an execution that exhausted its policy even when a
    /// final value was stored.
    pub fn is_success(&self) -> bool {
        self.core.state().success
    }
}

impl<T, E> RetryFuture<T, E>
where
    T: Clone + Send + 'static,
    E: Send + Sync + 'static,
{
    /// Await terminal completion.
    ///
    /// Returns the stored value when no terminal failure was recorded
    /// (including the exhausted-with-a-legal-value case) and the terminal
    /// `RetryError` otherwise. May be called repeatedly.
    pub async fn get(&self) -> Result<T, RetryError<E>> {
        loop {
            let notified = self.core.notify.notified();
            {
                let state = self.core.state();
                if state.done {
                    if let Some(failure) = &state.failure {
                        return Err(failure.clone());
                    }
                    match &state.result {
                        Some(result) => return Ok(result.clone()),
                        None => unreachable!("terminal completion stores a result or a failure"),
                    }
                }
            }
            notified.await;
        }
    }

    /// Await terminal completion for at most `timeout`.
    ///
    /// `None` signals the timeout elapsed; the execution is unaffected.
    pub async fn get_timeout(&self, timeout: Duration) -> Option<Result<T, RetryError<E>>> {
        tokio::time::timeout(timeout, self.get()).await.ok()
    }

    /// Cancel the execution: the pending scheduled trial (if any) is
    /// cancelled and the future completes with `RetryError::Cancelled`. A
    /// trial already running its user code is not interrupted; its outcome
    /// is discarded against the cancelled future.
    ///
    /// Returns whether this call performed the transition.
    pub fn cancel(&self) -> bool {
        let (listeners, stats) = {
            let mut state = self.core.state();
            if state.done {
                return false;
            }
            state.done = true;
            state.cancelled = true;
            state.success = false;
            state.failure = Some(RetryError::Cancelled);
            if let Some(delegate) = state.delegate.take() {
                delegate.cancel();
            }
            (state.listeners.clone(), state.stats)
        };
        self.core.notify.notify_waiters();
        tracing::debug!("retry execution cancelled");
        listeners.fire_terminal(
            None,
            Some(&RetryError::Cancelled),
            false,
            &stats,
            Some(&self.core.scheduler),
        );
        true
    }

    /// Register a success listener; fires immediately when the future
    /// already completed successfully.
    pub fn when_success(&self, f: impl Fn(&T) + Send + Sync + 'static) -> &Self {
        let pending = {
            let mut state = self.core.state();
            if state.done {
                if state.success {
                    state.result.clone()
                } else {
                    None
                }
            } else {
                state.listeners = std::mem::take(&mut state.listeners).on_success(f);
                return self;
            }
        };
        if let Some(result) = pending {
            f(&result);
        }
        self
    }

    /// Offloaded variant of [`RetryFuture::when_success`].
    pub fn when_success_async(&self, f: impl Fn(&T) + Send + Sync + 'static) -> &Self {
        let pending = {
            let mut state = self.core.state();
            if state.done {
                if state.success {
                    state.result.clone()
                } else {
                    None
                }
            } else {
                state.listeners = std::mem::take(&mut state.listeners).on_success_async(f);
                return self;
            }
        };
        if let Some(result) = pending {
            let _ = self
                .core
                .scheduler
                .schedule(Duration::ZERO, Box::pin(async move { f(&result) }));
        }
        self
    }

    /// Register a failure listener; fires immediately when the future
    /// already completed with a terminal failure.
    pub fn when_failure(&self, f: impl Fn(&RetryError<E>) + Send + Sync + 'static) -> &Self {
        let pending = {
            let mut state = self.core.state();
            if state.done {
                state.failure.clone()
            } else {
                state.listeners = std::mem::take(&mut state.listeners).on_failure(f);
                return self;
            }
        };
        if let Some(failure) = pending {
            f(&failure);
        }
        self
    }

    /// Offloaded variant of [`RetryFuture::when_failure`].
    pub fn when_failure_async(&self, f: impl Fn(&RetryError<E>) + Send + Sync + 'static) -> &Self {
        let pending = {
            let mut state = self.core.state();
            if state.done {
                state.failure.clone()
            } else {
                state.listeners = std::mem::take(&mut state.listeners).on_failure_async(f);
                return self;
            }
        };
        if let Some(failure) = pending {
            let _ = self
                .core
                .scheduler
                .schedule(Duration::ZERO, Box::pin(async move { f(&failure) }));
        }
        self
    }

    /// Register a completion listener; fires immediately with the stored
    /// outcome when the future already completed.
    pub fn when_complete(
        &self,
        f: impl Fn(Option<&T>, Option<&RetryError<E>>) + Send + Sync + 'static,
    ) -> &Self {
        let pending = {
            let mut state = self.core.state();
            if state.done {
                Some((state.result.clone(), state.failure.clone()))
            } else {
                state.listeners = std::mem::take(&mut state.listeners).on_complete(f);
                return self;
            }
        };
        if let Some((result, failure)) = pending {
            f(result.as_ref(), failure.as_ref());
        }
        self
    }

    /// Offloaded variant of [`RetryFuture::when_complete`].
    pub fn when_complete_async(
        &self,
        f: impl Fn(Option<&T>, Option<&RetryError<E>>) + Send + Sync + 'static,
    ) -> &Self {
        let pending = {
            let mut state = self.core.state();
            if state.done {
                Some((state.result.clone(), state.failure.clone()))
            } else {
                state.listeners = std::mem::take(&mut state.listeners).on_complete_async(f);
                return self;
            }
        };
        if let Some((result, failure)) = pending {
            let _ = self.core.scheduler.schedule(
                Duration::ZERO,
                Box::pin(async move { f(result.as_ref(), failure.as_ref()) }),
            );
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::TokioScheduler;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn future() -> RetryFuture<i32, &'static str> {
        let scheduler: Arc<dyn Scheduler> = Arc::new(TokioScheduler::new());
        RetryFuture::new(scheduler, Listeners::new())
    }

    #[tokio::test]
    async fn completes_exactly_once() {
        let fut = future();
        assert!(fut.core().complete(Some(1), None, true, InvocationStats::default()));
        assert!(!fut.core().complete(Some(2), None, true, InvocationStats::default()));
        assert_eq!(fut.get().await, Ok(1));
        assert!(fut.is_done());
        assert!(fut.is_success());
        assert!(!fut.is_cancelled());
    }

    #[tokio::test]
    async fn cancel_races_with_complete() {
        let fut = future();
        assert!(fut.cancel());
        assert!(!fut.core().complete(Some(1), None, true, InvocationStats::default()));
        assert!(fut.is_done());
        assert!(fut.is_cancelled());
        assert!(matches!(fut.get().await, Err(RetryError::Cancelled)));
    }

    #[tokio::test]
    async fn cancel_after_completion_reports_false() {
        let fut = future();
        fut.core().complete(Some(1), None, true, InvocationStats::default());
        assert!(!fut.cancel());
        assert!(!fut.is_cancelled());
    }

    #[tokio::test]
    async fn get_blocks_until_completion() {
        let fut = future();
        let waiter = fut.clone();
        let task = tokio::spawn(async move { waiter.get().await });

        tokio::time::sleep(Duration::from_millis(20)).await;
        fut.core().complete(Some(7), None, true, InvocationStats::default());
        assert_eq!(task.await.expect("waiter"), Ok(7));
    }

    #[tokio::test]
    async fn get_timeout_signals_elapsed_without_effect() {
        let fut = future();
        assert!(fut.get_timeout(Duration::from_millis(20)).await.is_none());
        assert!(!fut.is_done());

        fut.core().complete(Some(3), None, true, InvocationStats::default());
        assert_eq!(fut.get_timeout(Duration::from_millis(20)).await, Some(Ok(3)));
    }

    #[tokio::test]
    async fn listeners_registered_after_completion_fire_immediately() {
        let fut = future();
        fut.core().complete(Some(5), None, true, InvocationStats::default());

        let fired = Arc::new(AtomicUsize::new(0));
        let on_success = fired.clone();
        let on_complete = fired.clone();
        let on_failure = fired.clone();
        fut.when_success(move |result| {
            assert_eq!(*result, 5);
            on_success.fetch_add(1, Ordering::SeqCst);
        })
        .when_complete(move |result, failure| {
            assert_eq!(result, Some(&5));
            assert!(failure.is_none());
            on_complete.fetch_add(1, Ordering::SeqCst);
        })
        .when_failure(move |_| {
            on_failure.fetch_add(100, Ordering::SeqCst);
        });

        assert_eq!(fired.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn exhausted_with_value_fires_neither_success_nor_failure() {
        let fut = future();
        let fired = Arc::new(AtomicUsize::new(0));
        let on_success = fired.clone();
        let on_failure = fired.clone();
        let on_complete = fired.clone();
        fut.when_success(move |_| {
            on_success.fetch_add(100, Ordering::SeqCst);
        })
        .when_failure(move |_| {
            on_failure.fetch_add(100, Ordering::SeqCst);
        })
        .when_complete(move |result, failure| {
            assert_eq!(result, Some(&4));
            assert!(failure.is_none());
            on_complete.fetch_add(1, Ordering::SeqCst);
        });

        fut.core().complete(Some(4), None, false, InvocationStats::default());
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert_eq!(fut.get().await, Ok(4));
        assert!(!fut.is_success());
    }

    #[tokio::test]
    async fn delegate_arriving_after_completion_is_cancelled() {
        let fut = future();
        fut.cancel();

        let scheduler = TokioScheduler::new();
        let ran = Arc::new(AtomicUsize::new(0));
        let ran_clone = ran.clone();
        let handle = scheduler.schedule(
            Duration::from_secs(60),
            Box::pin(async move {
                ran_clone.fetch_add(1, Ordering::SeqCst);
            }),
        );

        fut.core().set_delegate(handle);
        let state_has_delegate = fut.core().state().delegate.is_some();
        assert!(!state_has_delegate);
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(ran.load(Ordering::SeqCst), 0);
    }
}
