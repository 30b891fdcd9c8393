#![allow(dead_code)]

//! Shared test support: a deterministic scheduler that records requested
//! delays and releases tasks on demand, plus a common failure type.

use encore::{Listeners, ScheduledHandle, Scheduler};
use futures::future::BoxFuture;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TestFailure {
    Connect(&'static str),
    Timeout,
    Fatal(&'static str),
}

impl fmt::Display for TestFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connect(detail) => write!(f, "connect failure: {}", detail),
            Self::Timeout => write!(f, "timed out"),
            Self::Fatal(detail) => write!(f, "fatal: {}", detail),
        }
    }
}

impl std::error::Error for TestFailure {}

/// Per-event firing counters for listener assertions.
#[derive(Default)]
pub struct Counts {
    pub failed_attempt: AtomicUsize,
    pub retry: AtomicUsize,
    pub success: AtomicUsize,
    pub failure: AtomicUsize,
    pub complete: AtomicUsize,
}

/// Listeners that count every event into `counts`.
pub fn counting<T, E>(counts: Arc<Counts>) -> Listeners<T, E> {
    let failed = counts.clone();
    let retry = counts.clone();
    let success = counts.clone();
    let failure = counts.clone();
    let complete = counts;
    Listeners::new()
        .on_failed_attempt(move |_, _| {
            failed.failed_attempt.fetch_add(1, Ordering::SeqCst);
        })
        .on_retry(move |_, _| {
            retry.retry.fetch_add(1, Ordering::SeqCst);
        })
        .on_success(move |_| {
            success.success.fetch_add(1, Ordering::SeqCst);
        })
        .on_failure(move |_| {
            failure.failure.fetch_add(1, Ordering::SeqCst);
        })
        .on_complete(move |_, _| {
            complete.complete.fetch_add(1, Ordering::SeqCst);
        })
}

#[derive(Default)]
struct Flags {
    cancelled: AtomicBool,
    done: AtomicBool,
}

struct Entry {
    delay: Duration,
    task: Option<BoxFuture<'static, ()>>,
    flags: Arc<Flags>,
}

/// Scheduler that parks every task until the test releases it, recording
/// the requested delays in order. No wall time passes.
#[derive(Clone, Default)]
pub struct ManualScheduler {
    entries: Arc<Mutex<Vec<Entry>>>,
}

impl fmt::Debug for ManualScheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let entries = self.entries.lock().unwrap();
        f.debug_struct("ManualScheduler").field("entries", &entries.len()).finish()
    }
}

impl ManualScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every delay requested so far, in scheduling order.
    pub fn delays(&self) -> Vec<Duration> {
        self.entries.lock().unwrap().iter().map(|e| e.delay).collect()
    }

    /// Number of tasks not yet released or cancelled.
    pub fn pending(&self) -> usize {
        self.entries
            .lock()
            .unwrap()
            .iter()
            .filter(|e| e.task.is_some() && !e.flags.cancelled.load(Ordering::SeqCst))
            .count()
    }

    /// Number of handles that were cancelled before their task ran.
    pub fn cancelled(&self) -> usize {
        self.entries
            .lock()
            .unwrap()
            .iter()
            .filter(|e| e.flags.cancelled.load(Ordering::SeqCst))
            .count()
    }

    /// Release the next unreleased task, skipping cancelled ones. Returns
    /// whether a task ran.
    pub async fn run_next(&self) -> bool {
        loop {
            let next = {
                let mut entries = self.entries.lock().unwrap();
                entries
                    .iter_mut()
                    .find(|e| e.task.is_some())
                    .map(|e| (e.task.take().expect("task present"), e.flags.clone()))
            };
            match next {
                None => return false,
                Some((task, flags)) => {
                    if flags.cancelled.load(Ordering::SeqCst) {
                        continue;
                    }
                    task.await;
                    flags.done.store(true, Ordering::SeqCst);
                    return true;
                }
            }
        }
    }

    /// Release tasks until none remain. Tasks may schedule further tasks;
    /// those run too.
    pub async fn run_all(&self) {
        while self.run_next().await {}
    }
}

impl Scheduler for ManualScheduler {
    fn schedule(&self, delay: Duration, task: BoxFuture<'static, ()>) -> Box<dyn ScheduledHandle> {
        let flags = Arc::new(Flags::default());
        self.entries.lock().unwrap().push(Entry { delay, task: Some(task), flags: flags.clone() });
        Box::new(ManualHandle { flags })
    }
}

struct ManualHandle {
    flags: Arc<Flags>,
}

impl ScheduledHandle for ManualHandle {
    fn cancel(&self) {
        if !self.flags.done.load(Ordering::SeqCst) {
            self.flags.cancelled.store(true, Ordering::SeqCst);
        }
    }

    fn is_cancelled(&self) -> bool {
        self.flags.cancelled.load(Ordering::SeqCst)
    }

    fn is_done(&self) -> bool {
        self.flags.done.load(Ordering::SeqCst)
    }
}
