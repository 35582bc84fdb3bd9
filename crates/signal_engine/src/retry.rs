//! Executor retry backoff policy.
//!
//! Kept as a pure attempt→delay mapping, separate from the execution stage,
//! so it is unit-testable without real time.

use std::time::Duration;

use rand::Rng;
use signal_domain::RetryConfig;

/// Exponential backoff with a cap. `backoff` is deterministic; `jittered`
/// randomizes within [base/2, base] of the computed delay to spread retries.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    max_attempts: u32,
    base: Duration,
    factor: u32,
    cap: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base: Duration, factor: u32, cap: Duration) -> Self {
        Self {
            max_attempts,
            base,
            factor,
            cap,
        }
    }

    pub fn from_config(config: &RetryConfig) -> Self {
        Self::new(
            config.max_attempts,
            Duration::from_millis(config.backoff_base_ms),
            config.backoff_factor,
            Duration::from_millis(config.backoff_cap_ms),
        )
    }

    /// Total attempts allowed, including the first.
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Deterministic delay before retrying after the given attempt (1-based):
    /// base * factor^(attempt-1), capped.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(32);
        let multiplier = (self.factor as u64).saturating_pow(exponent);
        let delay = self
            .base
            .checked_mul(multiplier.min(u32::MAX as u64) as u32)
            .unwrap_or(self.cap);
        delay.min(self.cap)
    }

    /// Backoff with jitter applied: uniform in [backoff/2, backoff].
    pub fn jittered(&self, attempt: u32) -> Duration {
        let full = self.backoff(attempt);
        let half = full / 2;
        if full.is_zero() {
            return full;
        }
        half + rand::thread_rng().gen_range(Duration::ZERO..=full - half)
    }
}
