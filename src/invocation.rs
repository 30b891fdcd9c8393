//! Per-execution state threaded through trials.
//!
//! An `Invocation` tracks the attempt counter, the start instant, and the
//! next inter-attempt wait for one execution. Contextual async operations
//! receive a cloned handle and may drive termination manually with
//! [`Invocation::retry`] or [`Invocation::complete_with`] from any thread,
//! typically a completion callback of the underlying async API.
//!
//! Signals latch under the invocation's lock and then re-enter the driving
//! executor through a one-shot hook. The hook is invoked after the lock is
//! released, so the executor is free to take the future's monitor first and
//! this lock second, its only nesting order.

use crate::clock::Clock;
use crate::policy::RetryPolicy;
use std::fmt;
use std::sync::{Arc, Mutex, OnceLock};
use std::time::Duration;

/// User-driven decision latched for the current trial.
pub(crate) enum Signal<T, E> {
    Retry(Option<E>),
    Complete(Option<T>, Option<E>),
}

struct TrialState<T, E> {
    attempts: usize,
    wait: Duration,
    epoch: u64,
    signal: Option<Signal<T, E>>,
}

struct Inner<T, E> {
    policy: RetryPolicy<T, E>,
    clock: Arc<dyn Clock>,
    start: Duration,
    state: Mutex<TrialState<T, E>>,
    hook: OnceLock<Box<dyn Fn(u64) + Send + Sync>>,
}

/// A retryable invocation: per-execution mutable state plus the contextual
/// signalling surface.
pub struct Invocation<T, E> {
    inner: Arc<Inner<T, E>>,
}

impl<T, E> Clone for Invocation<T, E> {
    fn clone(&self) -> Self {
        Self { inner: self.inner.clone() }
    }
}

impl<T, E> fmt::Debug for Invocation<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state.lock().expect("invocation lock poisoned");
        f.debug_struct("Invocation")
            .field("attempts", &state.attempts)
            .field("wait", &state.wait)
            .field("epoch", &state.epoch)
            .field("elapsed", &self.elapsed())
            .finish()
    }
}

impl<T, E> Invocation<T, E> {
    pub(crate) fn new(policy: RetryPolicy<T, E>, clock: Arc<dyn Clock>) -> Self {
        let start = clock.now();
        let wait = policy.delay();
        Self {
            inner: Arc::new(Inner {
                policy,
                clock,
                start,
                state: Mutex::new(TrialState { attempts: 0, wait, epoch: 0, signal: None }),
                hook: OnceLock::new(),
            }),
        }
    }

    /// Number of failed attempts recorded so far.
    pub fn attempt_count(&self) -> usize {
        self.lock().attempts
    }

    /// Wall-clock time elapsed since the first attempt started.
    pub fn elapsed(&self) -> Duration {
        self.inner.clock.now().saturating_sub(self.inner.start)
    }

    /// The wait that will precede the next attempt.
    pub fn wait_time(&self) -> Duration {
        self.lock().wait
    }

    /// Request a retry of the current trial without recording a failure.
    ///
    /// Intended for contextual async operations; the last signal latched
    /// within a trial wins until the executor consumes it.
    pub fn retry(&self) {
        self.signal(Signal::Retry(None));
    }

    /// Request a retry of the current trial, recording `failure` as its
    /// outcome.
    pub fn retry_for(&self, failure: E) {
        self.signal(Signal::Retry(Some(failure)));
    }

    /// Complete the execution with `result`.
    pub fn complete_with(&self, result: T) {
        self.signal(Signal::Complete(Some(result), None));
    }

    /// Complete the execution with `failure` as the terminal outcome.
    pub fn fail(&self, failure: E) {
        self.signal(Signal::Complete(None, Some(failure)));
    }

    pub(crate) fn policy(&self) -> &RetryPolicy<T, E> {
        &self.inner.policy
    }

    /// Snapshot for stats-receiving listeners.
    pub(crate) fn stats(&self) -> InvocationStats {
        let state = self.lock();
        InvocationStats {
            attempt_count: state.attempts,
            elapsed: self.elapsed(),
            wait_time: state.wait,
        }
    }

    /// Count a completed failed attempt. The exceeded check and the
    /// failed-attempt listener both observe the incremented value.
    pub(crate) fn record_failed_attempt(&self) {
        self.lock().attempts += 1;
    }

    /// Re-shape the wait for the next attempt: exponential backoff from the
    /// second failed attempt on (the first wait is the configured delay),
    /// then clamp to what remains of the wall budget, floored at zero.
    pub(crate) fn adjust_wait(&self) {
        let policy = &self.inner.policy;
        let elapsed = self.elapsed();
        let mut state = self.lock();
        if state.attempts > 1 {
            if let Some(max_delay) = policy.max_delay() {
                let scaled = state.wait.as_secs_f64() * policy.delay_multiplier();
                state.wait = if scaled >= max_delay.as_secs_f64() {
                    max_delay
                } else {
                    Duration::from_secs_f64(scaled)
                };
            }
        }
        if let Some(max_duration) = policy.max_duration() {
            let remaining = max_duration.saturating_sub(elapsed);
            state.wait = state.wait.min(remaining);
        }
    }

    /// Whether the retry-count cap or the wall budget has been reached.
    /// Evaluated after the attempt counter was incremented for the trial.
    pub(crate) fn policy_exceeded(&self) -> bool {
        let policy = &self.inner.policy;
        let over_retries = policy.max_retries().is_some_and(|max| self.lock().attempts > max);
        let over_duration = policy.max_duration().is_some_and(|max| self.elapsed() >= max);
        over_retries || over_duration
    }

    pub(crate) fn epoch(&self) -> u64 {
        self.lock().epoch
    }

    /// Start the next trial's epoch. Clears any unconsumed signal: signals
    /// are scoped to the trial that latched them.
    pub(crate) fn advance_epoch(&self) -> u64 {
        let mut state = self.lock();
        state.epoch += 1;
        state.signal = None;
        state.epoch
    }

    pub(crate) fn take_signal(&self) -> Option<Signal<T, E>> {
        self.lock().signal.take()
    }

    /// Install the executor re-entry hook. One execution drives one
    /// invocation; later installs are ignored.
    pub(crate) fn set_signal_hook(&self, hook: Box<dyn Fn(u64) + Send + Sync>) {
        let _ = self.inner.hook.set(hook);
    }

    fn signal(&self, signal: Signal<T, E>) {
        let epoch = {
            let mut state = self.lock();
            state.signal = Some(signal);
            state.epoch
        };
        if let Some(hook) = self.inner.hook.get() {
            hook(epoch);
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, TrialState<T, E>> {
        self.inner.state.lock().expect("invocation lock poisoned")
    }
}

impl<E> Invocation<(), E> {
    /// Complete a void execution successfully.
    pub fn complete(&self) {
        self.complete_with(());
    }
}

/// Read-only snapshot of an invocation, handed to stats-receiving listeners.
#[derive(Debug, Clone, Copy, Default)]
pub struct InvocationStats {
    pub(crate) attempt_count: usize,
    pub(crate) elapsed: Duration,
    pub(crate) wait_time: Duration,
}

impl InvocationStats {
    /// Number of failed attempts recorded when the event fired.
    pub fn attempt_count(&self) -> usize {
        self.attempt_count
    }

    /// Wall-clock time elapsed since the first attempt started.
    pub fn elapsed(&self) -> Duration {
        self.elapsed
    }

    /// The inter-attempt wait current when the event fired.
    pub fn wait_time(&self) -> Duration {
        self.wait_time
    }
}
