//! Exponential back-off for retryable fetch errors.
//!
//! [`RetryConfig`] plugs straight into [`backon::Retryable::retry`]; the
//! caller gates re-attempts with `.when(FetchError::is_retryable)`.

use backon::BackoffBuilder;
use std::time::Duration;

/// Bounded exponential back-off envelope.
///
/// The delay before attempt `n` (n ≥ 2) is
/// `clamp(wait_exp_min, wait_exp_mul · 2^(n−2), wait_exp_max)` seconds,
/// and no more than `max_attempts` attempts are made in total.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RetryConfig {
    pub max_attempts: usize,
    pub wait_exp_min: u64,
    pub wait_exp_max: u64,
    pub wait_exp_mul: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            wait_exp_min: 4,
            wait_exp_max: 10,
            wait_exp_mul: 1,
        }
    }
}

impl RetryConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn max_attempts(mut self, max_attempts: usize) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    pub fn wait_exp_min(mut self, seconds: u64) -> Self {
        self.wait_exp_min = seconds;
        self
    }

    pub fn wait_exp_max(mut self, seconds: u64) -> Self {
        self.wait_exp_max = seconds;
        self
    }

    pub fn wait_exp_mul(mut self, seconds: u64) -> Self {
        self.wait_exp_mul = seconds;
        self
    }

    /// No waiting between attempts; handy in tests.
    pub fn immediate(max_attempts: usize) -> Self {
        Self {
            max_attempts,
            wait_exp_min: 0,
            wait_exp_max: 0,
            wait_exp_mul: 0,
        }
    }
}

impl BackoffBuilder for RetryConfig {
    type Backoff = ExponentialBackoff;

    fn build(self) -> Self::Backoff {
        ExponentialBackoff {
            remaining: self.max_attempts.saturating_sub(1),
            exponent: 0,
            config: self,
        }
    }
}

/// Iterator over the delays of one [`RetryConfig`] envelope; yields
/// `max_attempts − 1` durations.
#[derive(Clone, Debug)]
pub struct ExponentialBackoff {
    config: RetryConfig,
    remaining: usize,
    exponent: u32,
}

impl Iterator for ExponentialBackoff {
    type Item = Duration;

    fn next(&mut self) -> Option<Duration> {
        if self.remaining == 0 {
            return None;
        }
        self.remaining -= 1;

        let raw = 1u64
            .checked_shl(self.exponent)
            .and_then(|f| f.checked_mul(self.config.wait_exp_mul))
            .unwrap_or(u64::MAX);
        self.exponent = self.exponent.saturating_add(1);

        let seconds = raw
            .min(self.config.wait_exp_max)
            .max(self.config.wait_exp_min);
        Some(Duration::from_secs(seconds))
    }
}
