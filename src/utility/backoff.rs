// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-counter-logger project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Exponential backoff with random jitter
//!
//! Shared by the device connection pool and the storage writer. Jitter spreads
//! retries of many devices failing at the same time (e.g. after a network blip).

use std::time::Duration;

use rand::Rng;

/// Bounded exponential retry policy.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts, including the first one. Never zero.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Relative jitter in `[0, 1]`.
    pub jitter: f64,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration, max_delay: Duration, jitter: f64) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            max_delay: max_delay.max(base_delay),
            jitter: jitter.clamp(0.0, 1.0),
        }
    }

    /// Policy without retries, mostly for tests.
    pub fn no_retry() -> Self {
        Self::new(1, Duration::ZERO, Duration::ZERO, 0.0)
    }

    /// Delay before the attempt following failed attempt number `attempt` (1-based).
    ///
    /// The nominal delay is `base * 2^(attempt-1)` capped at `max_delay`, then
    /// scaled by a random factor in `[1 - jitter, 1 + jitter]`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let nominal = self.nominal_delay(attempt);
        if self.jitter <= 0.0 || nominal.is_zero() {
            return nominal;
        }
        let factor = rand::rng().random_range((1.0 - self.jitter)..=(1.0 + self.jitter));
        nominal.mul_f64(factor)
    }

    /// Delay before jitter is applied.
    pub fn nominal_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        let delay = self
            .base_delay
            .checked_mul(1u32 << exponent)
            .unwrap_or(self.max_delay);
        delay.min(self.max_delay)
    }

    /// Whether another attempt is allowed after `attempt` failed attempts.
    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3, Duration::from_secs(1), Duration::from_secs(30), 0.2)
    }
}
