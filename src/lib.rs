#![forbid(unsafe_code)]
#![deny(warnings)]
#![cfg_attr(not(test), deny(clippy::all))]

//! # Encore
//!
//! A general-purpose retry engine: invoke an operation under a declarative
//! [`RetryPolicy`] until it produces an acceptable outcome or the policy's
//! budget runs out.
//!
//! ## Features
//!
//! - **Declarative policies**: retry on failure variants, failure or result
//!   predicates, result literals, or a joint predicate over the whole
//!   outcome; fixed delay or exponential backoff capped by delay and
//!   wall-clock budgets.
//! - **Blocking executor** for synchronous code paths.
//! - **Async executor** on any [`Scheduler`] (tokio by default), returning
//!   a cancellable [`RetryFuture`].
//! - **Contextual mode**: the operation receives its [`Invocation`] and can
//!   drive retries or completion manually from a callback on any thread.
//! - **Lifecycle listeners** for failed attempts, retries, and terminal
//!   success/failure/completion, with inline or offloaded dispatch.
//!
//! ## Quick start
//!
//! ```rust
//! use encore::{blocking, RetryPolicy};
//! use std::sync::atomic::{AtomicUsize, Ordering};
//! use std::time::Duration;
//!
//! #[derive(Debug)]
//! enum ApiError {
//!     Unavailable,
//!     BadRequest,
//! }
//!
//! let policy = RetryPolicy::new()
//!     .retry_on_variants([ApiError::Unavailable])?
//!     .with_backoff(Duration::from_millis(10), Duration::from_millis(80))?
//!     .with_max_retries(5);
//!
//! let attempts = AtomicUsize::new(0);
//! let greeting = blocking::get(&policy, || {
//!     if attempts.fetch_add(1, Ordering::SeqCst) < 2 {
//!         Err(ApiError::Unavailable)
//!     } else {
//!         Ok("hello")
//!     }
//! })
//! .expect("policy allows enough retries");
//!
//! assert_eq!(greeting, "hello");
//! # Ok::<(), encore::ConfigError>(())
//! ```
//!
//! Asynchronous executions return a [`RetryFuture`]:
//!
//! ```rust,no_run
//! use encore::{get_async, RetryPolicy, TokioScheduler};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() {
//!     let policy: RetryPolicy<String, std::io::Error> = RetryPolicy::new();
//!     let future = get_async(policy, Arc::new(TokioScheduler::new()), || async {
//!         Ok::<_, std::io::Error>("fetched".to_string())
//!     });
//!     let value = future.get().await.expect("operation succeeds");
//!     assert_eq!(value, "fetched");
//! }
//! ```

pub mod blocking;
pub mod clock;
pub mod error;
mod executor;
pub mod invocation;
pub mod jitter;
pub mod listeners;
pub mod policy;
pub mod presets;
pub mod scheduler;
pub mod sleeper;

mod future;

// Re-exports
pub use clock::{Clock, ManualClock, MonotonicClock};
pub use error::{ConfigError, RetryError};
pub use executor::{
    get_async, get_async_with, get_contextual, get_contextual_with, run_async, run_async_with,
    run_contextual, run_contextual_with,
};
pub use future::RetryFuture;
pub use invocation::{Invocation, InvocationStats};
pub use jitter::Jitter;
pub use listeners::Listeners;
pub use policy::RetryPolicy;
pub use scheduler::{ScheduledHandle, Scheduler, TokioScheduler};
pub use sleeper::{InstantSleeper, SleepInterrupted, Sleeper, ThreadSleeper, TrackingSleeper};
