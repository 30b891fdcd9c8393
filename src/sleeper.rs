//! Blocking sleep abstraction for the sync executor.
//!
//! The inter-attempt wait of the blocking loop goes through a `Sleeper` so
//! tests can assert the exact wait sequence without real delays. A sleeper
//! may report interruption; the executor surfaces that as the terminal
//! `RetryError::Interrupted`. The default `ThreadSleeper` never does, since
//! OS threads in Rust cannot be interrupted, but sleepers built on
//! interruptible waits can.

use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Marker for an interrupted inter-attempt wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SleepInterrupted;

/// Blocking sleep abstraction.
pub trait Sleeper: Send + Sync + std::fmt::Debug {
    fn sleep(&self, duration: Duration) -> Result<(), SleepInterrupted>;
}

/// Production sleeper using `std::thread::sleep`.
#[derive(Debug, Default, Clone, Copy)]
pub struct ThreadSleeper;

impl Sleeper for ThreadSleeper {
    fn sleep(&self, duration: Duration) -> Result<(), SleepInterrupted> {
        if !duration.is_zero() {
            std::thread::sleep(duration);
        }
        Ok(())
    }
}

/// Test sleeper that returns immediately.
#[derive(Debug, Default, Clone, Copy)]
pub struct InstantSleeper;

impl Sleeper for InstantSleeper {
    fn sleep(&self, _duration: Duration) -> Result<(), SleepInterrupted> {
        Ok(())
    }
}

/// Test sleeper that records every requested wait without sleeping.
#[derive(Debug, Clone, Default)]
pub struct TrackingSleeper {
    calls: Arc<Mutex<Vec<Duration>>>,
}

impl TrackingSleeper {
    pub fn new() -> Self {
        Self::default()
    }

    /// All waits requested so far, in order.
    pub fn calls(&self) -> Vec<Duration> {
        self.calls.lock().expect("tracking sleeper lock poisoned").clone()
    }

    pub fn clear(&self) {
        self.calls.lock().expect("tracking sleeper lock poisoned").clear();
    }
}

impl Sleeper for TrackingSleeper {
    fn sleep(&self, duration: Duration) -> Result<(), SleepInterrupted> {
        self.calls.lock().expect("tracking sleeper lock poisoned").push(duration);
        Ok(())
    }
}
