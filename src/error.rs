//! Error types for the retry engine.
//!
//! Two families: `ConfigError` is raised immediately by policy mutators on
//! constraint violations; `RetryError` is the terminal wrapper an execution
//! resolves to when it does not end in an acceptable value. Operation
//! failures are preserved unchanged inside `RetryError::Exhausted` and only
//! wrapped at this terminal boundary.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Terminal outcome of an execution that did not end in an acceptable value.
///
/// The failure inside `Exhausted` is shared via `Arc` so listeners and
/// repeated `get()` calls can observe it without requiring `E: Clone`.
#[derive(Debug)]
pub enum RetryError<E> {
    /// The policy stopped allowing retries and the execution ended in
    /// failure. `failure` is the last operation failure, when one exists; a
    /// contextual `retry` signal without a failure can exhaust the policy
    /// with none.
    Exhausted { attempts: usize, failure: Option<Arc<E>> },
    /// The future was cancelled before terminal completion.
    Cancelled,
    /// The blocking executor's inter-attempt wait was interrupted.
    Interrupted,
}

impl<E> Clone for RetryError<E> {
    fn clone(&self) -> Self {
        match self {
            Self::Exhausted { attempts, failure } => {
                Self::Exhausted { attempts: *attempts, failure: failure.clone() }
            }
            Self::Cancelled => Self::Cancelled,
            Self::Interrupted => Self::Interrupted,
        }
    }
}

impl<E: PartialEq> PartialEq for RetryError<E> {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (
                Self::Exhausted { attempts: a, failure: fa },
                Self::Exhausted { attempts: b, failure: fb },
            ) => a == b && fa.as_deref() == fb.as_deref(),
            (Self::Cancelled, Self::Cancelled) => true,
            (Self::Interrupted, Self::Interrupted) => true,
            _ => false,
        }
    }
}

impl<E: fmt::Display> fmt::Display for RetryError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Exhausted { attempts, failure: Some(failure) } => {
                write!(f, "retries exhausted after {} failed attempts; last failure: {}", attempts, failure)
            }
            Self::Exhausted { attempts, failure: None } => {
                write!(f, "retries exhausted after {} failed attempts", attempts)
            }
            Self::Cancelled => write!(f, "execution cancelled"),
            Self::Interrupted => write!(f, "interrupted while waiting between attempts"),
        }
    }
}

impl<E: std::error::Error + 'static> std::error::Error for RetryError<E> {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Exhausted { failure: Some(failure), .. } => {
                Some(failure.as_ref() as &dyn std::error::Error)
            }
            _ => None,
        }
    }
}

impl<E> RetryError<E> {
    pub(crate) fn exhausted(attempts: usize, failure: Option<Arc<E>>) -> Self {
        Self::Exhausted { attempts, failure }
    }

    /// Check whether the policy's budget ran out.
    pub fn is_exhausted(&self) -> bool {
        matches!(self, Self::Exhausted { .. })
    }

    /// Check whether the execution was cancelled.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// Check whether an inter-attempt wait was interrupted.
    pub fn is_interrupted(&self) -> bool {
        matches!(self, Self::Interrupted)
    }

    /// Number of failed attempts, for `Exhausted`.
    pub fn attempts(&self) -> Option<usize> {
        match self {
            Self::Exhausted { attempts, .. } => Some(*attempts),
            _ => None,
        }
    }

    /// Borrow the preserved operation failure, if one was recorded.
    pub fn failure(&self) -> Option<&E> {
        match self {
            Self::Exhausted { failure, .. } => failure.as_deref(),
            _ => None,
        }
    }

    /// Take the preserved operation failure out of this error.
    ///
    /// Returns the owned failure when this error holds the last reference,
    /// falling back to a clone otherwise.
    pub fn into_failure(self) -> Option<E>
    where
        E: Clone,
    {
        match self {
            Self::Exhausted { failure: Some(failure), .. } => {
                Some(Arc::try_unwrap(failure).unwrap_or_else(|shared| (*shared).clone()))
            }
            _ => None,
        }
    }
}

/// Constraint violations raised by `RetryPolicy` mutators.
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigError {
    /// A configured delay must be greater than zero.
    ZeroDelay,
    /// With backoff, the base delay must be strictly below the delay cap.
    DelayNotBelowMaxDelay { delay: Duration, max_delay: Duration },
    /// The base delay must be strictly below the wall budget.
    DelayNotBelowMaxDuration { delay: Duration, max_duration: Duration },
    /// Backoff multipliers below or at 1 would never back off.
    MultiplierNotAboveOne(f64),
    /// `with_delay` after `with_backoff` would silently discard the backoff.
    BackoffAlreadyConfigured,
    /// `retry_on_variants` needs at least one exemplar failure.
    NoFailureVariants,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ZeroDelay => write!(f, "delay must be greater than zero"),
            Self::DelayNotBelowMaxDelay { delay, max_delay } => {
                write!(f, "delay ({:?}) must be less than max_delay ({:?})", delay, max_delay)
            }
            Self::DelayNotBelowMaxDuration { delay, max_duration } => {
                write!(f, "delay ({:?}) must be less than max_duration ({:?})", delay, max_duration)
            }
            Self::MultiplierNotAboveOne(m) => {
                write!(f, "delay multiplier must be greater than 1 (got {})", m)
            }
            Self::BackoffAlreadyConfigured => {
                write!(f, "backoff delays have already been configured")
            }
            Self::NoFailureVariants => write!(f, "at least one failure variant is required"),
        }
    }
}

impl std::error::Error for ConfigError {}
