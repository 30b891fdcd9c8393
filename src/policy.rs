//! Retry policy: the immutable rule set governing whether another trial is
//! warranted, plus the wait-shaping knobs the executors consult.
//!
//! A policy is value-typed: mutators consume and return it, validating
//! eagerly. After construction it is only ever read, so executions share it
//! freely across threads.
//!
//! The retry condition has three layers, most specific first: a joint
//! predicate over the whole `(result, failure)` pair supersedes everything;
//! otherwise failures are judged by the failure axis (predicate, exemplar
//! variants, or the retry-any default) and values by the result axis
//! (predicate, literal, or the never-retry default). Registering twice on
//! one axis replaces the earlier registration.

use crate::error::ConfigError;
use crate::jitter::Jitter;
use std::fmt;
use std::mem::{discriminant, Discriminant};
use std::sync::Arc;
use std::time::Duration;

/// Default multiplier applied by [`RetryPolicy::with_backoff`].
pub const DEFAULT_BACKOFF_MULTIPLIER: f64 = 2.0;

type FailurePredicate<E> = Arc<dyn Fn(&E) -> bool + Send + Sync>;
type ResultPredicate<T> = Arc<dyn Fn(&T) -> bool + Send + Sync>;
type JointPredicate<T, E> = Arc<dyn Fn(Option<&T>, Option<&E>) -> bool + Send + Sync>;

enum FailureCondition<E> {
    /// Any failure is retryable (the default when a failure occurs).
    Any,
    /// Retry when the failure's enum variant matches one of the exemplars'.
    Variants(Vec<Discriminant<E>>),
    Predicate(FailurePredicate<E>),
}

impl<E> Clone for FailureCondition<E> {
    fn clone(&self) -> Self {
        match self {
            Self::Any => Self::Any,
            Self::Variants(v) => Self::Variants(v.clone()),
            Self::Predicate(p) => Self::Predicate(p.clone()),
        }
    }
}

enum ResultCondition<T> {
    /// Results never trigger a retry (the default; distinguishes an
    /// unconfigured literal from any configured one).
    Never,
    /// Retry when the result equals the literal.
    Literal { value: T, eq: fn(&T, &T) -> bool },
    Predicate(ResultPredicate<T>),
}

impl<T: Clone> Clone for ResultCondition<T> {
    fn clone(&self) -> Self {
        match self {
            Self::Never => Self::Never,
            Self::Literal { value, eq } => Self::Literal { value: value.clone(), eq: *eq },
            Self::Predicate(p) => Self::Predicate(p.clone()),
        }
    }
}

fn literal_eq<T: PartialEq>(a: &T, b: &T) -> bool {
    a == b
}

/// Policy that defines when retries should be performed and how long to wait
/// between them.
pub struct RetryPolicy<T, E> {
    delay: Duration,
    max_delay: Option<Duration>,
    delay_multiplier: f64,
    max_duration: Option<Duration>,
    max_retries: Option<usize>,
    jitter: Jitter,
    joint: Option<JointPredicate<T, E>>,
    on_failure: FailureCondition<E>,
    on_result: ResultCondition<T>,
}

impl<T: Clone, E> Clone for RetryPolicy<T, E> {
    fn clone(&self) -> Self {
        Self {
            delay: self.delay,
            max_delay: self.max_delay,
            delay_multiplier: self.delay_multiplier,
            max_duration: self.max_duration,
            max_retries: self.max_retries,
            jitter: self.jitter,
            joint: self.joint.clone(),
            on_failure: self.on_failure.clone(),
            on_result: self.on_result.clone(),
        }
    }
}

impl<T, E> fmt::Debug for RetryPolicy<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let on_failure = match &self.on_failure {
            FailureCondition::Any => "Any",
            FailureCondition::Variants(_) => "Variants",
            FailureCondition::Predicate(_) => "Predicate",
        };
        let on_result = match &self.on_result {
            ResultCondition::Never => "Never",
            ResultCondition::Literal { .. } => "Literal",
            ResultCondition::Predicate(_) => "Predicate",
        };
        f.debug_struct("RetryPolicy")
            .field("delay", &self.delay)
            .field("max_delay", &self.max_delay)
            .field("delay_multiplier", &self.delay_multiplier)
            .field("max_duration", &self.max_duration)
            .field("max_retries", &self.max_retries)
            .field("jitter", &self.jitter)
            .field("joint", &self.joint.is_some())
            .field("on_failure", &on_failure)
            .field("on_result", &on_result)
            .finish()
    }
}

impl<T, E> Default for RetryPolicy<T, E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T, E> RetryPolicy<T, E> {
    /// A policy that retries any failure forever with no delay between
    /// attempts.
    pub fn new() -> Self {
        Self {
            delay: Duration::ZERO,
            max_delay: None,
            delay_multiplier: 0.0,
            max_duration: None,
            max_retries: None,
            jitter: Jitter::None,
            joint: None,
            on_failure: FailureCondition::Any,
            on_result: ResultCondition::Never,
        }
    }

    /// Set a fixed delay between attempts.
    ///
    /// Rejected when backoff has already been configured, when `delay` is
    /// zero, or when `delay` does not fit under a configured `max_duration`.
    pub fn with_delay(mut self, delay: Duration) -> Result<Self, ConfigError> {
        if self.max_delay.is_some() {
            return Err(ConfigError::BackoffAlreadyConfigured);
        }
        if delay.is_zero() {
            return Err(ConfigError::ZeroDelay);
        }
        if let Some(max_duration) = self.max_duration {
            if delay >= max_duration {
                return Err(ConfigError::DelayNotBelowMaxDuration { delay, max_duration });
            }
        }
        self.delay = delay;
        Ok(self)
    }

    /// Set an exponentially backing-off delay, doubling up to `max_delay`.
    pub fn with_backoff(self, delay: Duration, max_delay: Duration) -> Result<Self, ConfigError> {
        self.with_backoff_multiplier(delay, max_delay, DEFAULT_BACKOFF_MULTIPLIER)
    }

    /// Set an exponentially backing-off delay, multiplying successive waits
    /// by `multiplier` up to `max_delay`.
    pub fn with_backoff_multiplier(
        mut self,
        delay: Duration,
        max_delay: Duration,
        multiplier: f64,
    ) -> Result<Self, ConfigError> {
        if delay.is_zero() {
            return Err(ConfigError::ZeroDelay);
        }
        if delay >= max_delay {
            return Err(ConfigError::DelayNotBelowMaxDelay { delay, max_delay });
        }
        if let Some(max_duration) = self.max_duration {
            if delay >= max_duration {
                return Err(ConfigError::DelayNotBelowMaxDuration { delay, max_duration });
            }
        }
        if multiplier <= 1.0 {
            return Err(ConfigError::MultiplierNotAboveOne(multiplier));
        }
        self.delay = delay;
        self.max_delay = Some(max_delay);
        self.delay_multiplier = multiplier;
        Ok(self)
    }

    /// Cap the number of additional attempts after the first. `0` allows a
    /// single trial; the default is unbounded.
    pub fn with_max_retries(mut self, max_retries: usize) -> Self {
        self.max_retries = Some(max_retries);
        self
    }

    /// Cap the wall-clock budget, measured from the first attempt.
    ///
    /// Rejected when a configured delay does not fit under it.
    pub fn with_max_duration(mut self, max_duration: Duration) -> Result<Self, ConfigError> {
        if !self.delay.is_zero() && self.delay >= max_duration {
            return Err(ConfigError::DelayNotBelowMaxDuration { delay: self.delay, max_duration });
        }
        self.max_duration = Some(max_duration);
        Ok(self)
    }

    /// Randomize dispatched waits. Defaults to [`Jitter::None`].
    pub fn with_jitter(mut self, jitter: Jitter) -> Self {
        self.jitter = jitter;
        self
    }

    /// Retry only failures whose enum variant matches one of the exemplars'.
    ///
    /// Payloads are ignored; only the variant is compared. For non-enum
    /// failure types every failure matches. Rejected when `exemplars` is
    /// empty.
    pub fn retry_on_variants(
        mut self,
        exemplars: impl IntoIterator<Item = E>,
    ) -> Result<Self, ConfigError> {
        let variants: Vec<Discriminant<E>> =
            exemplars.into_iter().map(|e| discriminant(&e)).collect();
        if variants.is_empty() {
            return Err(ConfigError::NoFailureVariants);
        }
        self.on_failure = FailureCondition::Variants(variants);
        Ok(self)
    }

    /// Retry only failures matching the predicate. Replaces any earlier
    /// failure condition.
    pub fn retry_on(mut self, predicate: impl Fn(&E) -> bool + Send + Sync + 'static) -> Self {
        self.on_failure = FailureCondition::Predicate(Arc::new(predicate));
        self
    }

    /// Retry when the result equals `value`. Replaces any earlier result
    /// condition, and is distinguishable from the unconfigured default even
    /// for values like `None`.
    pub fn retry_on_result(mut self, value: T) -> Self
    where
        T: PartialEq,
    {
        self.on_result = ResultCondition::Literal { value, eq: literal_eq::<T> };
        self
    }

    /// Retry when the result matches the predicate. Replaces any earlier
    /// result condition.
    pub fn retry_on_result_if(
        mut self,
        predicate: impl Fn(&T) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.on_result = ResultCondition::Predicate(Arc::new(predicate));
        self
    }

    /// Decide retries with a joint predicate over the `(result, failure)`
    /// pair. Supersedes every other condition.
    pub fn retry_if(
        mut self,
        predicate: impl Fn(Option<&T>, Option<&E>) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.joint = Some(Arc::new(predicate));
        self
    }

    /// Base delay between attempts. `Duration::ZERO` means none.
    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Delay cap when backoff is enabled; `None` disables backoff.
    pub fn max_delay(&self) -> Option<Duration> {
        self.max_delay
    }

    /// Exponential factor for backoff waits (0 when backoff is disabled).
    pub fn delay_multiplier(&self) -> f64 {
        self.delay_multiplier
    }

    /// Wall-clock budget measured from the first attempt.
    pub fn max_duration(&self) -> Option<Duration> {
        self.max_duration
    }

    /// Cap on additional attempts after the first; `None` retries forever.
    pub fn max_retries(&self) -> Option<usize> {
        self.max_retries
    }

    /// Jitter strategy applied to dispatched waits.
    pub fn jitter(&self) -> Jitter {
        self.jitter
    }

    /// Whether the policy allows any retries at all, based on `max_retries`
    /// and `max_duration`.
    pub fn allows_retries(&self) -> bool {
        self.max_retries != Some(0) && self.max_duration != Some(Duration::ZERO)
    }

    /// Whether the policy will allow retries for the given trial outcome.
    ///
    /// Pure: identical inputs yield identical answers, regardless of any
    /// execution state. First matching clause decides: no-retries-at-all,
    /// then the joint predicate, then the failure axis (when a failure is
    /// present), then the result axis.
    pub fn allows_retries_for(&self, result: Option<&T>, failure: Option<&E>) -> bool {
        if !self.allows_retries() {
            return false;
        }
        if let Some(joint) = &self.joint {
            return joint(result, failure);
        }
        if let Some(failure) = failure {
            return match &self.on_failure {
                FailureCondition::Predicate(predicate) => predicate(failure),
                FailureCondition::Variants(variants) => variants.contains(&discriminant(failure)),
                FailureCondition::Any => true,
            };
        }
        match &self.on_result {
            ResultCondition::Predicate(predicate) => result.is_some_and(|r| predicate(r)),
            ResultCondition::Literal { value, eq } => result.is_some_and(|r| eq(r, value)),
            ResultCondition::Never => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug)]
    #[allow(dead_code)]
    enum TestFailure {
        Connect(&'static str),
        Timeout,
        Fatal(&'static str),
    }

    #[test]
    fn default_policy_allows_nothing_for_empty_outcome() {
        let policy: RetryPolicy<(), TestFailure> = RetryPolicy::new();
        assert!(!policy.allows_retries_for(None, None));
    }

    #[test]
    fn default_policy_retries_any_failure() {
        let policy: RetryPolicy<(), TestFailure> = RetryPolicy::new();
        assert!(policy.allows_retries_for(None, Some(&TestFailure::Timeout)));
        assert!(policy.allows_retries_for(None, Some(&TestFailure::Fatal("x"))));
    }

    #[test]
    fn variant_exemplars_match_by_variant_not_payload() {
        let policy: RetryPolicy<(), TestFailure> = RetryPolicy::new()
            .retry_on_variants([TestFailure::Connect("exemplar"), TestFailure::Timeout])
            .unwrap();
        assert!(policy.allows_retries_for(None, Some(&TestFailure::Connect("other"))));
        assert!(policy.allows_retries_for(None, Some(&TestFailure::Timeout)));
        assert!(!policy.allows_retries_for(None, Some(&TestFailure::Fatal("x"))));
    }

    #[test]
    fn empty_variant_list_is_rejected() {
        let result = RetryPolicy::<(), TestFailure>::new().retry_on_variants([]);
        assert_eq!(result.unwrap_err(), ConfigError::NoFailureVariants);
    }

    #[test]
    fn failure_predicate_decides() {
        let policy: RetryPolicy<(), TestFailure> =
            RetryPolicy::new().retry_on(|f| matches!(f, TestFailure::Connect(_)));
        assert!(policy.allows_retries_for(None, Some(&TestFailure::Connect("x"))));
        assert!(!policy.allows_retries_for(None, Some(&TestFailure::Timeout)));
    }

    #[test]
    fn failure_predicate_replaces_variant_list() {
        let policy: RetryPolicy<(), TestFailure> = RetryPolicy::new()
            .retry_on_variants([TestFailure::Timeout])
            .unwrap()
            .retry_on(|f| matches!(f, TestFailure::Connect(_)));
        assert!(!policy.allows_retries_for(None, Some(&TestFailure::Timeout)));
        assert!(policy.allows_retries_for(None, Some(&TestFailure::Connect("x"))));
    }

    #[test]
    fn result_literal_decides() {
        let policy: RetryPolicy<&str, TestFailure> = RetryPolicy::new().retry_on_result("test");
        assert!(policy.allows_retries_for(Some(&"test"), None));
        assert!(!policy.allows_retries_for(Some(&"other"), None));
        assert!(!policy.allows_retries_for(None, None));
    }

    #[test]
    fn none_literal_is_distinguishable_from_unset() {
        let unset: RetryPolicy<Option<i32>, TestFailure> = RetryPolicy::new();
        assert!(!unset.allows_retries_for(Some(&None), None));

        let configured: RetryPolicy<Option<i32>, TestFailure> =
            RetryPolicy::new().retry_on_result(None);
        assert!(configured.allows_retries_for(Some(&None), None));
        assert!(!configured.allows_retries_for(Some(&Some(3)), None));
    }

    #[test]
    fn result_predicate_decides() {
        let policy: RetryPolicy<i32, TestFailure> =
            RetryPolicy::new().retry_on_result_if(|n| *n > 0);
        assert!(policy.allows_retries_for(Some(&1), None));
        assert!(!policy.allows_retries_for(Some(&0), None));
        assert!(!policy.allows_retries_for(None, None));
    }

    #[test]
    fn joint_predicate_supersedes_both_axes() {
        let policy: RetryPolicy<&str, TestFailure> = RetryPolicy::new()
            .retry_on_result("ignored")
            .retry_if(|result, failure| {
                result == Some(&"test") || matches!(failure, Some(TestFailure::Connect(_)))
            });
        assert!(policy.allows_retries_for(Some(&"test"), None));
        assert!(!policy.allows_retries_for(Some(&"ignored"), None));
        assert!(policy.allows_retries_for(None, Some(&TestFailure::Connect("x"))));
        assert!(!policy.allows_retries_for(None, Some(&TestFailure::Timeout)));
    }

    #[test]
    fn failure_and_result_conditions_coexist() {
        let policy: RetryPolicy<bool, TestFailure> = RetryPolicy::new()
            .retry_on_variants([TestFailure::Connect("")])
            .unwrap()
            .retry_on_result(false);
        assert!(policy.allows_retries_for(None, Some(&TestFailure::Connect("x"))));
        assert!(!policy.allows_retries_for(None, Some(&TestFailure::Timeout)));
        assert!(policy.allows_retries_for(Some(&false), None));
        assert!(!policy.allows_retries_for(Some(&true), None));
    }

    #[test]
    fn zero_max_retries_allows_no_retries_at_all() {
        let policy: RetryPolicy<(), TestFailure> = RetryPolicy::new().with_max_retries(0);
        assert!(!policy.allows_retries());
        assert!(!policy.allows_retries_for(None, Some(&TestFailure::Timeout)));
    }

    #[test]
    fn zero_max_duration_allows_no_retries_at_all() {
        let policy: RetryPolicy<(), TestFailure> =
            RetryPolicy::new().with_max_duration(Duration::ZERO).unwrap();
        assert!(!policy.allows_retries());
        assert!(!policy.allows_retries_for(None, Some(&TestFailure::Timeout)));
    }

    #[test]
    fn evaluation_is_pure() {
        let policy: RetryPolicy<i32, TestFailure> =
            RetryPolicy::new().retry_on_result_if(|n| *n > 0);
        for _ in 0..3 {
            assert!(policy.allows_retries_for(Some(&5), None));
            assert!(!policy.allows_retries_for(Some(&-5), None));
        }
    }

    #[test]
    fn with_delay_rejects_zero() {
        let result = RetryPolicy::<(), TestFailure>::new().with_delay(Duration::ZERO);
        assert_eq!(result.unwrap_err(), ConfigError::ZeroDelay);
    }

    #[test]
    fn with_delay_after_backoff_is_rejected() {
        let result = RetryPolicy::<(), TestFailure>::new()
            .with_backoff(Duration::from_millis(1), Duration::from_millis(2))
            .unwrap()
            .with_delay(Duration::from_millis(100));
        assert_eq!(result.unwrap_err(), ConfigError::BackoffAlreadyConfigured);
    }

    #[test]
    fn backoff_requires_delay_below_max_delay() {
        let result = RetryPolicy::<(), TestFailure>::new()
            .with_backoff(Duration::from_millis(100), Duration::from_millis(10));
        assert!(matches!(result.unwrap_err(), ConfigError::DelayNotBelowMaxDelay { .. }));
    }

    #[test]
    fn backoff_requires_multiplier_above_one() {
        let result = RetryPolicy::<(), TestFailure>::new().with_backoff_multiplier(
            Duration::from_millis(5),
            Duration::from_millis(10),
            0.5,
        );
        assert_eq!(result.unwrap_err(), ConfigError::MultiplierNotAboveOne(0.5));
    }

    #[test]
    fn delay_must_fit_under_max_duration_in_either_order() {
        let result = RetryPolicy::<(), TestFailure>::new()
            .with_max_duration(Duration::from_millis(1))
            .unwrap()
            .with_delay(Duration::from_millis(100));
        assert!(matches!(result.unwrap_err(), ConfigError::DelayNotBelowMaxDuration { .. }));

        let result = RetryPolicy::<(), TestFailure>::new()
            .with_delay(Duration::from_millis(100))
            .unwrap()
            .with_max_duration(Duration::from_millis(100));
        assert!(matches!(result.unwrap_err(), ConfigError::DelayNotBelowMaxDuration { .. }));

        let result = RetryPolicy::<(), TestFailure>::new()
            .with_max_duration(Duration::from_millis(1))
            .unwrap()
            .with_backoff(Duration::from_millis(100), Duration::from_millis(120));
        assert!(matches!(result.unwrap_err(), ConfigError::DelayNotBelowMaxDuration { .. }));
    }

    #[test]
    fn accessors_reflect_configuration() {
        let policy: RetryPolicy<(), TestFailure> = RetryPolicy::new()
            .with_backoff_multiplier(Duration::from_secs(1), Duration::from_secs(8), 3.0)
            .unwrap()
            .with_max_retries(5)
            .with_max_duration(Duration::from_secs(60))
            .unwrap()
            .with_jitter(Jitter::Full);

        assert_eq!(policy.delay(), Duration::from_secs(1));
        assert_eq!(policy.max_delay(), Some(Duration::from_secs(8)));
        assert_eq!(policy.delay_multiplier(), 3.0);
        assert_eq!(policy.max_retries(), Some(5));
        assert_eq!(policy.max_duration(), Some(Duration::from_secs(60)));
        assert_eq!(policy.jitter(), Jitter::Full);
        assert!(policy.allows_retries());
    }
}
