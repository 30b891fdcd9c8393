//! Lifecycle listener registry and dispatch.
//!
//! Five event kinds: `failed_attempt` (a trial whose outcome the policy
//! would retry, or any trial that produced a failure), `retry` (a successor
//! trial was scheduled), and the terminal `success`, `failure`, and
//! `complete`. Each kind has a plain slot and a stats-receiving slot, and
//! each slot can be registered for inline dispatch (the thread that
//! resolved the event) or offloaded dispatch (scheduled through the
//! execution's `Scheduler` with zero delay).
//!
//! The blocking executor has no scheduler; offloaded slots fire inline
//! there. Listener storage is per execution: async executions keep theirs
//! inside the `RetryFuture`, the blocking executor borrows a `Listeners`
//! value for the duration of the call.

use crate::error::RetryError;
use crate::invocation::InvocationStats;
use crate::scheduler::Scheduler;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

type AttemptCallback<T, E> = dyn Fn(Option<&T>, Option<&E>) + Send + Sync;
type AttemptStatsCallback<T, E> = dyn Fn(Option<&T>, Option<&E>, &InvocationStats) + Send + Sync;
type SuccessCallback<T> = dyn Fn(&T) + Send + Sync;
type SuccessStatsCallback<T> = dyn Fn(&T, &InvocationStats) + Send + Sync;
type FailureCallback<E> = dyn Fn(&RetryError<E>) + Send + Sync;
type FailureStatsCallback<E> = dyn Fn(&RetryError<E>, &InvocationStats) + Send + Sync;
type CompleteCallback<T, E> = dyn Fn(Option<&T>, Option<&RetryError<E>>) + Send + Sync;
type CompleteStatsCallback<T, E> =
    dyn Fn(Option<&T>, Option<&RetryError<E>>, &InvocationStats) + Send + Sync;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Dispatch {
    Inline,
    Offloaded,
}

struct Slot<F: ?Sized> {
    callback: Arc<F>,
    dispatch: Dispatch,
}

impl<F: ?Sized> Clone for Slot<F> {
    fn clone(&self) -> Self {
        Self { callback: self.callback.clone(), dispatch: self.dispatch }
    }
}

impl<F: ?Sized> Slot<F> {
    fn new(callback: Arc<F>, dispatch: Dispatch) -> Self {
        Self { callback, dispatch }
    }
}

/// Typed slots for lifecycle callbacks of one execution.
pub struct Listeners<T, E> {
    failed_attempt: Option<Slot<AttemptCallback<T, E>>>,
    failed_attempt_stats: Option<Slot<AttemptStatsCallback<T, E>>>,
    retry: Option<Slot<AttemptCallback<T, E>>>,
    retry_stats: Option<Slot<AttemptStatsCallback<T, E>>>,
    success: Option<Slot<SuccessCallback<T>>>,
    success_stats: Option<Slot<SuccessStatsCallback<T>>>,
    failure: Option<Slot<FailureCallback<E>>>,
    failure_stats: Option<Slot<FailureStatsCallback<E>>>,
    complete: Option<Slot<CompleteCallback<T, E>>>,
    complete_stats: Option<Slot<CompleteStatsCallback<T, E>>>,
}

impl<T, E> Default for Listeners<T, E> {
    fn default() -> Self {
        Self {
            failed_attempt: None,
            failed_attempt_stats: None,
            retry: None,
            retry_stats: None,
            success: None,
            success_stats: None,
            failure: None,
            failure_stats: None,
            complete: None,
            complete_stats: None,
        }
    }
}

impl<T, E> Clone for Listeners<T, E> {
    fn clone(&self) -> Self {
        Self {
            failed_attempt: self.failed_attempt.clone(),
            failed_attempt_stats: self.failed_attempt_stats.clone(),
            retry: self.retry.clone(),
            retry_stats: self.retry_stats.clone(),
            success: self.success.clone(),
            success_stats: self.success_stats.clone(),
            failure: self.failure.clone(),
            failure_stats: self.failure_stats.clone(),
            complete: self.complete.clone(),
            complete_stats: self.complete_stats.clone(),
        }
    }
}

impl<T, E> fmt::Debug for Listeners<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Listeners")
            .field("failed_attempt", &self.failed_attempt.is_some())
            .field("retry", &self.retry.is_some())
            .field("success", &self.success.is_some())
            .field("failure", &self.failure.is_some())
            .field("complete", &self.complete.is_some())
            .finish()
    }
}

impl<T, E> Listeners<T, E> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Called on every retry-eligible trial and on any trial that produced a
    /// failure, before a successor is scheduled.
    pub fn on_failed_attempt(
        mut self,
        f: impl Fn(Option<&T>, Option<&E>) + Send + Sync + 'static,
    ) -> Self {
        self.failed_attempt = Some(Slot::new(Arc::new(f), Dispatch::Inline));
        self
    }

    pub fn on_failed_attempt_async(
        mut self,
        f: impl Fn(Option<&T>, Option<&E>) + Send + Sync + 'static,
    ) -> Self {
        self.failed_attempt = Some(Slot::new(Arc::new(f), Dispatch::Offloaded));
        self
    }

    pub fn on_failed_attempt_stats(
        mut self,
        f: impl Fn(Option<&T>, Option<&E>, &InvocationStats) + Send + Sync + 'static,
    ) -> Self {
        self.failed_attempt_stats = Some(Slot::new(Arc::new(f), Dispatch::Inline));
        self
    }

    pub fn on_failed_attempt_stats_async(
        mut self,
        f: impl Fn(Option<&T>, Option<&E>, &InvocationStats) + Send + Sync + 'static,
    ) -> Self {
        self.failed_attempt_stats = Some(Slot::new(Arc::new(f), Dispatch::Offloaded));
        self
    }

    /// Called on every trial that will be retried, after the wait for the
    /// successor has been adjusted.
    pub fn on_retry(mut self, f: impl Fn(Option<&T>, Option<&E>) + Send + Sync + 'static) -> Self {
        self.retry = Some(Slot::new(Arc::new(f), Dispatch::Inline));
        self
    }

    pub fn on_retry_async(
        mut self,
        f: impl Fn(Option<&T>, Option<&E>) + Send + Sync + 'static,
    ) -> Self {
        self.retry = Some(Slot::new(Arc::new(f), Dispatch::Offloaded));
        self
    }

    pub fn on_retry_stats(
        mut self,
        f: impl Fn(Option<&T>, Option<&E>, &InvocationStats) + Send + Sync + 'static,
    ) -> Self {
        self.retry_stats = Some(Slot::new(Arc::new(f), Dispatch::Inline));
        self
    }

    pub fn on_retry_stats_async(
        mut self,
        f: impl Fn(Option<&T>, Option<&E>, &InvocationStats) + Send + Sync + 'static,
    ) -> Self {
        self.retry_stats = Some(Slot::new(Arc::new(f), Dispatch::Offloaded));
        self
    }

    /// Called once at terminal completion when the outcome is acceptable.
    pub fn on_success(mut self, f: impl Fn(&T) + Send + Sync + 'static) -> Self {
        self.success = Some(Slot::new(Arc::new(f), Dispatch::Inline));
        self
    }

    pub fn on_success_async(mut self, f: impl Fn(&T) + Send + Sync + 'static) -> Self {
        self.success = Some(Slot::new(Arc::new(f), Dispatch::Offloaded));
        self
    }

    pub fn on_success_stats(
        mut self,
        f: impl Fn(&T, &InvocationStats) + Send + Sync + 'static,
    ) -> Self {
        self.success_stats = Some(Slot::new(Arc::new(f), Dispatch::Inline));
        self
    }

    pub fn on_success_stats_async(
        mut self,
        f: impl Fn(&T, &InvocationStats) + Send + Sync + 'static,
    ) -> Self {
        self.success_stats = Some(Slot::new(Arc::new(f), Dispatch::Offloaded));
        self
    }

    /// Called once at terminal completion when a terminal failure was
    /// recorded (exhaustion with a failure, cancellation, interruption).
    pub fn on_failure(mut self, f: impl Fn(&RetryError<E>) + Send + Sync + 'static) -> Self {
        self.failure = Some(Slot::new(Arc::new(f), Dispatch::Inline));
        self
    }

    pub fn on_failure_async(mut self, f: impl Fn(&RetryError<E>) + Send + Sync + 'static) -> Self {
        self.failure = Some(Slot::new(Arc::new(f), Dispatch::Offloaded));
        self
    }

    pub fn on_failure_stats(
        mut self,
        f: impl Fn(&RetryError<E>, &InvocationStats) + Send + Sync + 'static,
    ) -> Self {
        self.failure_stats = Some(Slot::new(Arc::new(f), Dispatch::Inline));
        self
    }

    pub fn on_failure_stats_async(
        mut self,
        f: impl Fn(&RetryError<E>, &InvocationStats) + Send + Sync + 'static,
    ) -> Self {
        self.failure_stats = Some(Slot::new(Arc::new(f), Dispatch::Offloaded));
        self
    }

    /// Called once at terminal completion, unconditionally, after `success`
    /// or `failure`.
    pub fn on_complete(
        mut self,
        f: impl Fn(Option<&T>, Option<&RetryError<E>>) + Send + Sync + 'static,
    ) -> Self {
        self.complete = Some(Slot::new(Arc::new(f), Dispatch::Inline));
        self
    }

    pub fn on_complete_async(
        mut self,
        f: impl Fn(Option<&T>, Option<&RetryError<E>>) + Send + Sync + 'static,
    ) -> Self {
        self.complete = Some(Slot::new(Arc::new(f), Dispatch::Offloaded));
        self
    }

    pub fn on_complete_stats(
        mut self,
        f: impl Fn(Option<&T>, Option<&RetryError<E>>, &InvocationStats) + Send + Sync + 'static,
    ) -> Self {
        self.complete_stats = Some(Slot::new(Arc::new(f), Dispatch::Inline));
        self
    }

    pub fn on_complete_stats_async(
        mut self,
        f: impl Fn(Option<&T>, Option<&RetryError<E>>, &InvocationStats) + Send + Sync + 'static,
    ) -> Self {
        self.complete_stats = Some(Slot::new(Arc::new(f), Dispatch::Offloaded));
        self
    }
}

impl<T, E> Listeners<T, E>
where
    T: Clone + Send + 'static,
    E: Send + Sync + 'static,
{
    pub(crate) fn fire_failed_attempt(
        &self,
        result: Option<&T>,
        failure: Option<&Arc<E>>,
        stats: &InvocationStats,
        scheduler: Option<&Arc<dyn Scheduler>>,
    ) {
        if let Some(slot) = &self.failed_attempt {
            match (slot.dispatch, scheduler) {
                (Dispatch::Offloaded, Some(scheduler)) => {
                    let callback = slot.callback.clone();
                    let result = result.cloned();
                    let failure = failure.cloned();
                    let _ = scheduler.schedule(
                        Duration::ZERO,
                        Box::pin(async move { callback(result.as_ref(), failure.as_deref()) }),
                    );
                }
                _ => (slot.callback)(result, failure.map(|f| f.as_ref())),
            }
        }
        if let Some(slot) = &self.failed_attempt_stats {
            match (slot.dispatch, scheduler) {
                (Dispatch::Offloaded, Some(scheduler)) => {
                    let callback = slot.callback.clone();
                    let result = result.cloned();
                    let failure = failure.cloned();
                    let stats = *stats;
                    let _ = scheduler.schedule(
                        Duration::ZERO,
                        Box::pin(
                            async move { callback(result.as_ref(), failure.as_deref(), &stats) },
                        ),
                    );
                }
                _ => (slot.callback)(result, failure.map(|f| f.as_ref()), stats),
            }
        }
    }

    pub(crate) fn fire_retry(
        &self,
        result: Option<&T>,
        failure: Option<&Arc<E>>,
        stats: &InvocationStats,
        scheduler: Option<&Arc<dyn Scheduler>>,
    ) {
        if let Some(slot) = &self.retry {
            match (slot.dispatch, scheduler) {
                (Dispatch::Offloaded, Some(scheduler)) => {
                    let callback = slot.callback.clone();
                    let result = result.cloned();
                    let failure = failure.cloned();
                    let _ = scheduler.schedule(
                        Duration::ZERO,
                        Box::pin(async move { callback(result.as_ref(), failure.as_deref()) }),
                    );
                }
                _ => (slot.callback)(result, failure.map(|f| f.as_ref())),
            }
        }
        if let Some(slot) = &self.retry_stats {
            match (slot.dispatch, scheduler) {
                (Dispatch::Offloaded, Some(scheduler)) => {
                    let callback = slot.callback.clone();
                    let result = result.cloned();
                    let failure = failure.cloned();
                    let stats = *stats;
                    let _ = scheduler.schedule(
                        Duration::ZERO,
                        Box::pin(
                            async move { callback(result.as_ref(), failure.as_deref(), &stats) },
                        ),
                    );
                }
                _ => (slot.callback)(result, failure.map(|f| f.as_ref()), stats),
            }
        }
    }

    /// Fire the terminal listeners in order: `success` or `failure` first,
    /// then `complete`.
    pub(crate) fn fire_terminal(
        &self,
        result: Option<&T>,
        failure: Option<&RetryError<E>>,
        success: bool,
        stats: &InvocationStats,
        scheduler: Option<&Arc<dyn Scheduler>>,
    ) {
        if success {
            if let Some(value) = result {
                self.fire_success(value, stats, scheduler);
            }
        } else if let Some(error) = failure {
            self.fire_failure(error, stats, scheduler);
        }
        self.fire_complete(result, failure, stats, scheduler);
    }

    fn fire_success(
        &self,
        result: &T,
        stats: &InvocationStats,
        scheduler: Option<&Arc<dyn Scheduler>>,
    ) {
        if let Some(slot) = &self.success {
            match (slot.dispatch, scheduler) {
                (Dispatch::Offloaded, Some(scheduler)) => {
                    let callback = slot.callback.clone();
                    let result = result.clone();
                    let _ = scheduler
                        .schedule(Duration::ZERO, Box::pin(async move { callback(&result) }));
                }
                _ => (slot.callback)(result),
            }
        }
        if let Some(slot) = &self.success_stats {
            match (slot.dispatch, scheduler) {
                (Dispatch::Offloaded, Some(scheduler)) => {
                    let callback = slot.callback.clone();
                    let result = result.clone();
                    let stats = *stats;
                    let _ = scheduler.schedule(
                        Duration::ZERO,
                        Box::pin(async move { callback(&result, &stats) }),
                    );
                }
                _ => (slot.callback)(result, stats),
            }
        }
    }

    fn fire_failure(
        &self,
        failure: &RetryError<E>,
        stats: &InvocationStats,
        scheduler: Option<&Arc<dyn Scheduler>>,
    ) {
        if let Some(slot) = &self.failure {
            match (slot.dispatch, scheduler) {
                (Dispatch::Offloaded, Some(scheduler)) => {
                    let callback = slot.callback.clone();
                    let failure = failure.clone();
                    let _ = scheduler
                        .schedule(Duration::ZERO, Box::pin(async move { callback(&failure) }));
                }
                _ => (slot.callback)(failure),
            }
        }
        if let Some(slot) = &self.failure_stats {
            match (slot.dispatch, scheduler) {
                (Dispatch::Offloaded, Some(scheduler)) => {
                    let callback = slot.callback.clone();
                    let failure = failure.clone();
                    let stats = *stats;
                    let _ = scheduler.schedule(
                        Duration::ZERO,
                        Box::pin(async move { callback(&failure, &stats) }),
                    );
                }
                _ => (slot.callback)(failure, stats),
            }
        }
    }

    fn fire_complete(
        &self,
        result: Option<&T>,
        failure: Option<&RetryError<E>>,
        stats: &InvocationStats,
        scheduler: Option<&Arc<dyn Scheduler>>,
    ) {
        if let Some(slot) = &self.complete {
            match (slot.dispatch, scheduler) {
                (Dispatch::Offloaded, Some(scheduler)) => {
                    let callback = slot.callback.clone();
                    let result = result.cloned();
                    let failure = failure.cloned();
                    let _ = scheduler.schedule(
                        Duration::ZERO,
                        Box::pin(async move { callback(result.as_ref(), failure.as_ref()) }),
                    );
                }
                _ => (slot.callback)(result, failure),
            }
        }
        if let Some(slot) = &self.complete_stats {
            match (slot.dispatch, scheduler) {
                (Dispatch::Offloaded, Some(scheduler)) => {
                    let callback = slot.callback.clone();
                    let result = result.cloned();
                    let failure = failure.cloned();
                    let stats = *stats;
                    let _ = scheduler.schedule(
                        Duration::ZERO,
                        Box::pin(
                            async move { callback(result.as_ref(), failure.as_ref(), &stats) },
                        ),
                    );
                }
                _ => (slot.callback)(result, failure, stats),
            }
        }
    }
}
