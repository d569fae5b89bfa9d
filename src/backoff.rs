//! Exponential backoff state machine used by the reconnector.

use std::time::Duration;

use rand::{Rng, SeedableRng, rngs::StdRng};

use crate::config::BackoffPolicy;

/// Tracks the reconnection delay and produces jittered sleeps.
///
/// Every failed attempt doubles the delay, capped at the policy maximum, and
/// the sleep adds a random term in `[0, delay)` on top of it. A successful
/// connect resets the delay to the policy minimum.
pub struct BackoffState {
    policy: BackoffPolicy,
    current: Duration,
    rng: StdRng,
}

impl BackoffState {
    /// Create a new state machine from the supplied policy.
    pub fn new(policy: BackoffPolicy) -> Self {
        Self::with_rng(policy, StdRng::from_entropy())
    }

    /// Create a state machine with a deterministic jitter source.
    pub fn seeded(policy: BackoffPolicy, seed: u64) -> Self {
        Self::with_rng(policy, StdRng::seed_from_u64(seed))
    }

    fn with_rng(policy: BackoffPolicy, rng: StdRng) -> Self {
        Self {
            current: policy.min_delay,
            rng,
            policy,
        }
    }

    /// Delay before jitter for the most recent failure.
    pub fn current(&self) -> Duration {
        self.current
    }

    pub fn policy(&self) -> &BackoffPolicy {
        &self.policy
    }

    /// Record a successful connect.
    pub fn reset(&mut self) {
        self.current = self.policy.min_delay;
    }

    /// Grow the delay after a failure and return the jittered sleep.
    pub fn next_sleep(&mut self) -> Duration {
        self.current = self
            .current
            .saturating_mul(2)
            .min(self.policy.max_delay)
            .max(self.policy.min_delay);
        let delay_ms = self.current.as_millis().min(u128::from(u64::MAX)) as u64;
        let jitter_ms = if delay_ms == 0 {
            0
        } else {
            self.rng.gen_range(0..delay_ms)
        };
        self.current + Duration::from_millis(jitter_ms)
    }
}

impl std::fmt::Debug for BackoffState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackoffState")
            .field("policy", &self.policy)
            .field("current", &self.current)
            .finish()
    }
}
