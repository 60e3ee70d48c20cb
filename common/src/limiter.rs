//! Time-windowed admission control and pre-fetch delays.

use parking_lot::Mutex;
use rand::Rng;
use std::{
    collections::VecDeque,
    time::{Duration, Instant},
};

/// Sliding-window rate limiter: at most `max_rate` acquisitions per
/// `time_period`, precise over the full window.
///
/// Keeps the timestamp of each admitted acquisition and blocks callers
/// until the oldest one leaves the window.
#[derive(Debug)]
pub struct RateLimiter {
    max_rate: usize,
    time_period: Duration,
    starts: Mutex<VecDeque<Instant>>,
}

impl RateLimiter {
    pub fn new(max_rate: usize, time_period: Duration) -> Self {
        Self {
            max_rate,
            time_period,
            starts: Mutex::new(VecDeque::with_capacity(max_rate)),
        }
    }

    /// Wait until a slot in the current window is free, then take it.
    pub async fn acquire(&self) {
        loop {
            let wait = {
                let mut starts = self.starts.lock();
                let now = Instant::now();

                while starts
                    .front()
                    .is_some_and(|&start| now.duration_since(start) >= self.time_period)
                {
                    starts.pop_front();
                }

                if starts.len() < self.max_rate {
                    starts.push_back(now);
                    return;
                }

                match starts.front() {
                    Some(&oldest) => (oldest + self.time_period).saturating_duration_since(now),
                    None => Duration::ZERO,
                }
            };
            tokio::time::sleep(wait).await;
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum DelayKind {
    #[default]
    Constant,
    /// Uniformly random in `[0, amount]`.
    Random,
}

/// Delay applied after the concurrency gate, before each fetch, to smooth
/// bursty sources.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DelayConfig {
    /// Milliseconds; zero disables the delay.
    pub amount: u64,
    pub kind: DelayKind,
}

impl DelayConfig {
    pub fn constant(amount_ms: u64) -> Self {
        Self {
            amount: amount_ms,
            kind: DelayKind::Constant,
        }
    }

    pub fn random(amount_ms: u64) -> Self {
        Self {
            amount: amount_ms,
            kind: DelayKind::Random,
        }
    }

    pub async fn apply(&self) {
        if self.amount == 0 {
            return;
        }
        let millis = match self.kind {
            DelayKind::Constant => self.amount,
            DelayKind::Random => rand::rng().random_range(0..=self.amount),
        };
        if millis > 0 {
            tokio::time::sleep(Duration::from_millis(millis)).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn admits_up_to_rate_immediately() {
        let limiter = RateLimiter::new(3, Duration::from_secs(10));
        let start = Instant::now();
        for _ in 0..3 {
            limiter.acquire().await;
        }
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test]
    async fn blocks_until_window_slides() {
        let period = Duration::from_millis(100);
        let limiter = RateLimiter::new(2, period);

        let start = Instant::now();
        for _ in 0..3 {
            limiter.acquire().await;
        }
        // third acquisition had to wait for the first to expire
        assert!(start.elapsed() >= period);
    }

    #[tokio::test]
    async fn constant_delay_waits() {
        let delay = DelayConfig::constant(20);
        let start = Instant::now();
        delay.apply().await;
        assert!(start.elapsed() >= Duration::from_millis(20));
    }

    #[tokio::test]
    async fn zero_delay_is_free() {
        let start = Instant::now();
        DelayConfig::default().apply().await;
        assert!(start.elapsed() < Duration::from_millis(5));
    }
}
