//! Jitter strategies for randomizing inter-attempt waits.
//!
//! Jitter is applied to each wait as it is handed to the sleeper or
//! scheduler; the policy's stored wait sequence stays deterministic. Every
//! strategy here only ever shrinks a wait, so a wait clamped to the
//! remaining wall budget stays within it after jitter.
//!
//! - `None`: deterministic waits for tests or tightly controlled workflows.
//! - `Full`: uniform in `[0, wait]`, spreads load the widest.
//! - `Equal`: uniform in `[wait/2, wait]`, keeps a floor under the wait.

use rand::{rng, Rng};
use std::time::Duration;

/// Jitter strategy applied to dispatched waits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Jitter {
    /// No jitter: use the exact computed wait.
    #[default]
    None,
    /// Uniform in `[0, wait]`.
    Full,
    /// Uniform in `[wait/2, wait]`.
    Equal,
}

impl Jitter {
    /// Apply jitter to a wait using the thread-local RNG.
    pub fn apply(&self, wait: Duration) -> Duration {
        let mut rng = rng();
        self.apply_with_rng(wait, &mut rng)
    }

    /// Apply jitter with a caller-supplied RNG (deterministic in tests).
    pub fn apply_with_rng<R: Rng>(&self, wait: Duration, rng: &mut R) -> Duration {
        let nanos = Self::as_nanos_saturated(wait);
        if nanos == 0 {
            return Duration::ZERO;
        }
        match self {
            Jitter::None => wait,
            Jitter::Full => Duration::from_nanos(rng.random_range(0..=nanos)),
            Jitter::Equal => Duration::from_nanos(rng.random_range(nanos / 2..=nanos)),
        }
    }

    fn as_nanos_saturated(wait: Duration) -> u64 {
        // Saturate extremely large waits instead of panicking.
        wait.as_nanos().try_into().unwrap_or(u64::MAX)
    }
}
