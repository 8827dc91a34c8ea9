use std::time::Duration;

use rand::Rng;

use crate::config::RetryConfig;

/// Exponential reconnect delay with jitter: 1s, 2s, 4s, 8s, … capped at the
/// configured maximum, each delay shortened by a random share of up to
/// `jitter_ratio`.
#[derive(Debug)]
pub struct Backoff {
    retry: RetryConfig,
    attempt: u32,
}

impl Backoff {
    pub fn new(retry: RetryConfig) -> Self {
        Self { retry, attempt: 0 }
    }

    /// Delay to wait before the next reconnect; advances the attempt count.
    pub fn next_delay(&mut self) -> Duration {
        let base = self.retry.delay_for_attempt(self.attempt);
        self.attempt = self.attempt.saturating_add(1);
        jitter(base, self.retry.jitter_ratio)
    }

    /// Called once a connection has delivered a full data set.
    pub fn reset(&mut self) {
        self.attempt = 0;
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }
}

fn jitter(delay: Duration, ratio: f64) -> Duration {
    // NaN survives clamp and would make the sample range empty.
    if !ratio.is_finite() {
        return delay;
    }
    let ratio = ratio.clamp(0.0, 1.0);
    if ratio == 0.0 || delay.is_zero() {
        return delay;
    }
    let cut = rand::thread_rng().gen_range(0.0..=ratio);
    delay.mul_f64(1.0 - cut)
}
