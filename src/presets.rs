//! Ready-made retry policies for common profiles.
//!
//! Each preset retries any failure; refine with `retry_on*` as needed:
//!
//! ```rust
//! use encore::presets;
//!
//! let policy = presets::standard::<(), std::io::Error>()
//!     .retry_on(|e| e.kind() == std::io::ErrorKind::ConnectionReset);
//! ```

use crate::jitter::Jitter;
use crate::policy::RetryPolicy;
use std::time::Duration;

/// Short backoff for interactive paths: up to 3 retries, 25ms doubling to
/// 250ms.
pub fn quick<T, E>() -> RetryPolicy<T, E> {
    RetryPolicy::new()
        .with_backoff(Duration::from_millis(25), Duration::from_millis(250))
        .expect("static backoff bounds are valid")
        .with_max_retries(3)
}

/// General-purpose profile: up to 5 retries, 100ms doubling to 5s, full
/// jitter.
pub fn standard<T, E>() -> RetryPolicy<T, E> {
    RetryPolicy::new()
        .with_backoff(Duration::from_millis(100), Duration::from_secs(5))
        .expect("static backoff bounds are valid")
        .with_max_retries(5)
        .with_jitter(Jitter::Full)
}

/// Long-haul profile for background work: unbounded retries, 1s doubling to
/// 30s, bounded by a 10 minute wall budget, full jitter.
pub fn patient<T, E>() -> RetryPolicy<T, E> {
    RetryPolicy::new()
        .with_backoff(Duration::from_secs(1), Duration::from_secs(30))
        .expect("static backoff bounds are valid")
        .with_max_duration(Duration::from_secs(600))
        .expect("static wall budget exceeds the base delay")
        .with_jitter(Jitter::Full)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quick_is_bounded_and_backs_off() {
        let policy = quick::<(), std::io::Error>();
        assert_eq!(policy.max_retries(), Some(3));
        assert_eq!(policy.delay(), Duration::from_millis(25));
        assert_eq!(policy.max_delay(), Some(Duration::from_millis(250)));
    }

    #[test]
    fn standard_jitters() {
        let policy = standard::<(), std::io::Error>();
        assert_eq!(policy.jitter(), Jitter::Full);
        assert_eq!(policy.max_retries(), Some(5));
    }

    #[test]
    fn patient_is_wall_bounded() {
        let policy = patient::<(), std::io::Error>();
        assert_eq!(policy.max_retries(), None);
        assert_eq!(policy.max_duration(), Some(Duration::from_secs(600)));
    }
}
