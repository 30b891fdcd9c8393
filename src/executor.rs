//! Async executor: trial, policy evaluation, schedule-next.
//!
//! An execution drives one `RetryFuture` through strictly sequential trials.
//! Trial N+1 is scheduled only after trial N's outcome has been recorded,
//! and every recording path funnels through `record_result`: the trial
//! task's own return (automatic mode) and the user's `Invocation` signals
//! (contextual mode) alike. The first recording for a trial wins; stale
//! recordings are discarded by the trial epoch, so a late callback from
//! trial N cannot affect trial N+1.
//!
//! Contextual operations return `Some(outcome)` to commit the automatic
//! path, or `None` to defer the decision to a later `retry`/`complete`
//! signal. Signals latched before the operation returns win over its
//! automatic outcome.

use crate::clock::MonotonicClock;
use crate::error::RetryError;
use crate::future::{FutureCore, RetryFuture};
use crate::invocation::{Invocation, Signal};
use crate::listeners::Listeners;
use crate::policy::RetryPolicy;
use crate::scheduler::Scheduler;
use futures::future::BoxFuture;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

type Operation<T, E> =
    Box<dyn FnMut(Invocation<T, E>) -> BoxFuture<'static, Option<Result<T, E>>> + Send>;

struct Execution<T, E> {
    invocation: Invocation<T, E>,
    future: Arc<FutureCore<T, E>>,
    scheduler: Arc<dyn Scheduler>,
    operation: Mutex<Operation<T, E>>,
}

/// Transition decided under the future's monitor, applied after it is
/// released (listener callbacks must not run inside the lock).
enum Step<T, E> {
    Discard,
    Reschedule {
        result: Option<T>,
        failure: Option<Arc<E>>,
    },
    Finish {
        result: Option<T>,
        attempt_failure: Option<Arc<E>>,
        error: Option<RetryError<E>>,
        success: bool,
        failed_attempt: bool,
    },
}

impl<T, E> Execution<T, E>
where
    T: Clone + Send + Sync + 'static,
    E: Send + Sync + 'static,
{
    fn launch(
        policy: RetryPolicy<T, E>,
        scheduler: Arc<dyn Scheduler>,
        listeners: Listeners<T, E>,
        operation: Operation<T, E>,
    ) -> RetryFuture<T, E> {
        let future = RetryFuture::new(scheduler.clone(), listeners);
        let invocation = Invocation::new(policy, Arc::new(MonotonicClock::new()));
        let execution = Arc::new(Self {
            invocation: invocation.clone(),
            future: future.core(),
            scheduler: scheduler.clone(),
            operation: Mutex::new(operation),
        });

        // Contextual signals re-enter record_result from the signalling
        // thread. Weak: the hook must not keep the execution alive after
        // the future is dropped.
        let weak = Arc::downgrade(&execution);
        invocation.set_signal_hook(Box::new(move |epoch| {
            if let Some(execution) = weak.upgrade() {
                Execution::record_result(&execution, epoch, None);
            }
        }));

        let task = Self::trial_task(execution.clone(), invocation.epoch());
        let handle = scheduler.schedule(Duration::ZERO, task);
        execution.future.set_delegate(handle);
        future
    }

    fn trial_task(execution: Arc<Self>, epoch: u64) -> BoxFuture<'static, ()> {
        Box::pin(async move {
            if execution.future.is_terminal() || execution.invocation.epoch() != epoch {
                return;
            }
            let trial = {
                let mut operation =
                    execution.operation.lock().expect("operation lock poisoned");
                (*operation)(execution.invocation.clone())
            };
            let auto = trial.await.map(|outcome| outcome.map_err(Arc::new));
            Self::record_result(&execution, epoch, auto);
        })
    }

    /// The single re-entry point for trial outcomes and user signals.
    ///
    /// Under the future's monitor: discard when the future is already
    /// terminal or the epoch is stale; otherwise a latched signal wins over
    /// the automatic outcome, which in turn goes through the policy.
    fn record_result(execution: &Arc<Self>, epoch: u64, auto: Option<Result<T, Arc<E>>>) {
        let invocation = &execution.invocation;
        let step = {
            let state = execution.future.state();
            if state.done || invocation.epoch() != epoch {
                Step::Discard
            } else {
                match invocation.take_signal() {
                    Some(Signal::Complete(result, failure)) => {
                        let success = failure.is_none();
                        let error = failure.map(|f| {
                            RetryError::exhausted(invocation.attempt_count(), Some(Arc::new(f)))
                        });
                        Step::Finish {
                            result,
                            attempt_failure: None,
                            error,
                            success,
                            failed_attempt: false,
                        }
                    }
                    Some(Signal::Retry(failure)) => {
                        let failure = failure.map(Arc::new);
                        invocation.record_failed_attempt();
                        if invocation.policy_exceeded() {
                            let error = Some(RetryError::exhausted(
                                invocation.attempt_count(),
                                failure.clone(),
                            ));
                            Step::Finish {
                                result: None,
                                attempt_failure: failure,
                                error,
                                success: false,
                                failed_attempt: true,
                            }
                        } else {
                            Step::Reschedule { result: None, failure }
                        }
                    }
                    None => match auto {
                        // Contextual trial deferring to a later signal.
                        None => Step::Discard,
                        Some(outcome) => Self::decide(invocation, outcome),
                    },
                }
            }
        };

        match step {
            Step::Discard => {}
            Step::Reschedule { result, failure } => {
                let listeners = execution.future.listeners_snapshot();
                listeners.fire_failed_attempt(
                    result.as_ref(),
                    failure.as_ref(),
                    &invocation.stats(),
                    Some(&execution.scheduler),
                );
                invocation.adjust_wait();
                listeners.fire_retry(
                    result.as_ref(),
                    failure.as_ref(),
                    &invocation.stats(),
                    Some(&execution.scheduler),
                );

                let next_epoch = invocation.advance_epoch();
                let wait = invocation.policy().jitter().apply(invocation.wait_time());
                tracing::debug!(
                    attempt = invocation.attempt_count(),
                    wait_ms = wait.as_millis() as u64,
                    "retry scheduled"
                );
                let task = Self::trial_task(execution.clone(), next_epoch);
                // Re-check under the monitor: a listener may have cancelled,
                // or a signal may have raced the successor in.
                let mut state = execution.future.state();
                if !state.done && invocation.epoch() == next_epoch {
                    state.delegate = Some(execution.scheduler.schedule(wait, task));
                }
            }
            Step::Finish { result, attempt_failure, error, success, failed_attempt } => {
                let stats = invocation.stats();
                if failed_attempt {
                    let listeners = execution.future.listeners_snapshot();
                    listeners.fire_failed_attempt(
                        result.as_ref(),
                        attempt_failure.as_ref(),
                        &stats,
                        Some(&execution.scheduler),
                    );
                }
                tracing::debug!(attempts = stats.attempt_count(), success, "execution complete");
                execution.future.complete(result, error, success, stats);
            }
        }
    }

    /// Apply the policy to an automatic trial outcome.
    fn decide(invocation: &Invocation<T, E>, outcome: Result<T, Arc<E>>) -> Step<T, E> {
        let (result, failure) = match outcome {
            Ok(value) => (Some(value), None),
            Err(error) => (None, Some(error)),
        };
        let eligible =
            invocation.policy().allows_retries_for(result.as_ref(), failure.as_deref());
        if !eligible {
            let success = failure.is_none();
            let error = failure.clone().map(|f| {
                RetryError::exhausted(invocation.attempt_count(), Some(f))
            });
            return Step::Finish {
                result,
                attempt_failure: failure,
                error,
                success,
                failed_attempt: !success,
            };
        }

        invocation.record_failed_attempt();
        if invocation.policy_exceeded() {
            let error = failure
                .clone()
                .map(|f| RetryError::exhausted(invocation.attempt_count(), Some(f)));
            Step::Finish {
                result,
                attempt_failure: failure,
                error,
                success: false,
                failed_attempt: true,
            }
        } else {
            Step::Reschedule { result, failure }
        }
    }
}

/// Invoke the async `operation`, scheduling retries with `scheduler`
/// according to `policy`.
pub fn get_async<T, E, F, Fut>(
    policy: RetryPolicy<T, E>,
    scheduler: Arc<dyn Scheduler>,
    operation: F,
) -> RetryFuture<T, E>
where
    T: Clone + Send + Sync + 'static,
    E: Send + Sync + 'static,
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = Result<T, E>> + Send + 'static,
{
    get_async_with(policy, scheduler, Listeners::new(), operation)
}

/// [`get_async`] with lifecycle listeners.
pub fn get_async_with<T, E, F, Fut>(
    policy: RetryPolicy<T, E>,
    scheduler: Arc<dyn Scheduler>,
    listeners: Listeners<T, E>,
    mut operation: F,
) -> RetryFuture<T, E>
where
    T: Clone + Send + Sync + 'static,
    E: Send + Sync + 'static,
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = Result<T, E>> + Send + 'static,
{
    let operation: Operation<T, E> = Box::new(move |_invocation| {
        let trial = operation();
        Box::pin(async move { Some(trial.await) })
    });
    Execution::launch(policy, scheduler, listeners, operation)
}

/// Invoke the async void `operation`, scheduling retries with `scheduler`
/// according to `policy`.
pub fn run_async<E, F, Fut>(
    policy: RetryPolicy<(), E>,
    scheduler: Arc<dyn Scheduler>,
    operation: F,
) -> RetryFuture<(), E>
where
    E: Send + Sync + 'static,
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = Result<(), E>> + Send + 'static,
{
    get_async(policy, scheduler, operation)
}

/// [`run_async`] with lifecycle listeners.
pub fn run_async_with<E, F, Fut>(
    policy: RetryPolicy<(), E>,
    scheduler: Arc<dyn Scheduler>,
    listeners: Listeners<(), E>,
    operation: F,
) -> RetryFuture<(), E>
where
    E: Send + Sync + 'static,
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = Result<(), E>> + Send + 'static,
{
    get_async_with(policy, scheduler, listeners, operation)
}

/// Invoke the contextual async `operation`, which receives the execution's
/// [`Invocation`] and may drive retries or completion manually from any
/// thread.
///
/// Returning `Some(outcome)` commits the automatic path when no signal was
/// latched during the trial; returning `None` defers the decision to a
/// later `retry`/`complete` signal, typically sent from a completion
/// callback of the underlying async API.
pub fn get_contextual<T, E, F, Fut>(
    policy: RetryPolicy<T, E>,
    scheduler: Arc<dyn Scheduler>,
    operation: F,
) -> RetryFuture<T, E>
where
    T: Clone + Send + Sync + 'static,
    E: Send + Sync + 'static,
    F: FnMut(Invocation<T, E>) -> Fut + Send + 'static,
    Fut: Future<Output = Option<Result<T, E>>> + Send + 'static,
{
    get_contextual_with(policy, scheduler, Listeners::new(), operation)
}

/// [`get_contextual`] with lifecycle listeners.
pub fn get_contextual_with<T, E, F, Fut>(
    policy: RetryPolicy<T, E>,
    scheduler: Arc<dyn Scheduler>,
    listeners: Listeners<T, E>,
    mut operation: F,
) -> RetryFuture<T, E>
where
    T: Clone + Send + Sync + 'static,
    E: Send + Sync + 'static,
    F: FnMut(Invocation<T, E>) -> Fut + Send + 'static,
    Fut: Future<Output = Option<Result<T, E>>> + Send + 'static,
{
    let operation: Operation<T, E> =
        Box::new(move |invocation| Box::pin(operation(invocation)));
    Execution::launch(policy, scheduler, listeners, operation)
}

/// Contextual variant of [`run_async`].
pub fn run_contextual<E, F, Fut>(
    policy: RetryPolicy<(), E>,
    scheduler: Arc<dyn Scheduler>,
    operation: F,
) -> RetryFuture<(), E>
where
    E: Send + Sync + 'static,
    F: FnMut(Invocation<(), E>) -> Fut + Send + 'static,
    Fut: Future<Output = Option<Result<(), E>>> + Send + 'static,
{
    get_contextual(policy, scheduler, operation)
}

/// [`run_contextual`] with lifecycle listeners.
pub fn run_contextual_with<E, F, Fut>(
    policy: RetryPolicy<(), E>,
    scheduler: Arc<dyn Scheduler>,
    listeners: Listeners<(), E>,
    operation: F,
) -> RetryFuture<(), E>
where
    E: Send + Sync + 'static,
    F: FnMut(Invocation<(), E>) -> Fut + Send + 'static,
    Fut: Future<Output = Option<Result<(), E>>> + Send + 'static,
{
    get_contextual_with(policy, scheduler, listeners, operation)
}
