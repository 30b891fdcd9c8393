//! Clock abstractions for the retry engine's wall-budget math.
//!
//! Executions measure elapsed time against `max_duration` through a `Clock`
//! rather than calling `Instant::now()` directly, so tests can drive the
//! budget with a manual clock instead of real sleeps.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Monotonic time source abstraction.
///
/// Readings are durations since the implementer's epoch, at nanosecond
/// precision. Readings must be non-decreasing and safe to take concurrently.
pub trait Clock: Send + Sync + std::fmt::Debug {
    /// Time elapsed since this clock's epoch.
    fn now(&self) -> Duration;
}

/// Monotonic clock backed by `Instant::now()`.
///
/// Clones share the same epoch (instant captured at creation). Independently
/// created instances have different epochs and their readings are not
/// directly comparable.
#[derive(Debug, Clone)]
pub struct MonotonicClock {
    start: Instant,
}

impl MonotonicClock {
    /// Create a new monotonic clock starting at `Instant::now()`.
    pub fn new() -> Self {
        Self { start: Instant::now() }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MonotonicClock {
    fn now(&self) -> Duration {
        self.start.elapsed()
    }
}

/// Manually advanced clock for deterministic tests.
///
/// Clones share the same underlying reading.
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    now: Arc<Mutex<Duration>>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Advance the clock reading by `delta`.
    pub fn advance(&self, delta: Duration) {
        let mut now = self.now.lock().expect("manual clock lock poisoned");
        *now += delta;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Duration {
        *self.now.lock().expect("manual clock lock poisoned")
    }
}
