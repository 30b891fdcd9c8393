//! Blocking executor: the call-sleep-call loop on the caller's thread.
//!
//! Each trial invokes the operation, offers the outcome to the policy, and
//! either terminates or sleeps and goes again. Operation failures are `Err`
//! values; they are never surfaced mid-loop, only wrapped into
//! `RetryError::Exhausted` at the terminal boundary with the original
//! failure preserved as the source.

use crate::clock::MonotonicClock;
use crate::error::RetryError;
use crate::invocation::Invocation;
use crate::listeners::Listeners;
use crate::policy::RetryPolicy;
use crate::sleeper::{Sleeper, ThreadSleeper};
use std::sync::Arc;

/// Invoke `operation` until it succeeds or `policy` stops allowing retries,
/// sleeping between attempts on the calling thread.
///
/// Returns the final trial's value even when the policy wanted to retry it
/// but ran out of budget; a final trial that failed yields
/// [`RetryError::Exhausted`].
pub fn get<T, E, F>(policy: &RetryPolicy<T, E>, operation: F) -> Result<T, RetryError<E>>
where
    T: Clone + Send + 'static,
    E: Send + Sync + 'static,
    F: FnMut() -> Result<T, E>,
{
    get_with(policy, &Listeners::new(), &ThreadSleeper, operation)
}

/// [`get`] with lifecycle listeners and a pluggable sleeper.
///
/// The blocking path has no scheduler, so listeners registered for
/// offloaded dispatch fire inline here.
pub fn get_with<T, E, F>(
    policy: &RetryPolicy<T, E>,
    listeners: &Listeners<T, E>,
    sleeper: &dyn Sleeper,
    mut operation: F,
) -> Result<T, RetryError<E>>
where
    T: Clone + Send + 'static,
    E: Send + Sync + 'static,
    F: FnMut() -> Result<T, E>,
{
    let invocation = Invocation::new(policy.clone(), Arc::new(MonotonicClock::new()));

    loop {
        let outcome: Result<T, Arc<E>> = operation().map_err(Arc::new);
        let (result, failure) = match &outcome {
            Ok(value) => (Some(value), None),
            Err(error) => (None, Some(error)),
        };

        let eligible = policy.allows_retries_for(result, failure.map(|f| f.as_ref()));
        if !eligible {
            if outcome.is_err() {
                listeners.fire_failed_attempt(result, failure, &invocation.stats(), None);
            }
            let success = outcome.is_ok();
            return finish(outcome, success, listeners, &invocation);
        }

        invocation.record_failed_attempt();
        if invocation.policy_exceeded() {
            listeners.fire_failed_attempt(result, failure, &invocation.stats(), None);
            tracing::debug!(
                attempts = invocation.attempt_count(),
                "retry policy exceeded"
            );
            return finish(outcome, false, listeners, &invocation);
        }

        listeners.fire_failed_attempt(result, failure, &invocation.stats(), None);
        invocation.adjust_wait();
        listeners.fire_retry(result, failure, &invocation.stats(), None);

        let wait = policy.jitter().apply(invocation.wait_time());
        tracing::trace!(
            attempt = invocation.attempt_count(),
            wait_ms = wait.as_millis() as u64,
            "sleeping before retry"
        );
        if sleeper.sleep(wait).is_err() {
            tracing::debug!("inter-attempt wait interrupted");
            listeners.fire_terminal(
                None,
                Some(&RetryError::Interrupted),
                false,
                &invocation.stats(),
                None,
            );
            return Err(RetryError::Interrupted);
        }
    }
}

/// Invoke a void `operation` until it succeeds or `policy` stops allowing
/// retries, sleeping between attempts on the calling thread.
pub fn run<E, F>(policy: &RetryPolicy<(), E>, operation: F) -> Result<(), RetryError<E>>
where
    E: Send + Sync + 'static,
    F: FnMut() -> Result<(), E>,
{
    get(policy, operation)
}

/// [`run`] with lifecycle listeners and a pluggable sleeper.
pub fn run_with<E, F>(
    policy: &RetryPolicy<(), E>,
    listeners: &Listeners<(), E>,
    sleeper: &dyn Sleeper,
    operation: F,
) -> Result<(), RetryError<E>>
where
    E: Send + Sync + 'static,
    F: FnMut() -> Result<(), E>,
{
    get_with(policy, listeners, sleeper, operation)
}

fn finish<T, E>(
    outcome: Result<T, Arc<E>>,
    success: bool,
    listeners: &Listeners<T, E>,
    invocation: &Invocation<T, E>,
) -> Result<T, RetryError<E>>
where
    T: Clone + Send + 'static,
    E: Send + Sync + 'static,
{
    let stats = invocation.stats();
    match outcome {
        Ok(value) => {
            listeners.fire_terminal(Some(&value), None, success, &stats, None);
            tracing::debug!(attempts = stats.attempt_count(), success, "execution complete");
            Ok(value)
        }
        Err(failure) => {
            let error = RetryError::exhausted(invocation.attempt_count(), Some(failure));
            listeners.fire_terminal(None, Some(&error), false, &stats, None);
            tracing::debug!(attempts = stats.attempt_count(), "execution failed");
            Err(error)
        }
    }
}
