use std::time::Duration;

use rand::Rng;

/// Bounded exponential backoff.
///
/// Attempt `n` (1-based) waits `base_delay * 2^(n-1)`, capped at
/// `max_delay`, plus up to 25% random jitter when enabled.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first. Never less than one.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub jitter: bool,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            max_delay,
            jitter: true,
        }
    }

    /// `max_attempts` tries with no waiting in between.
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            jitter: false,
        }
    }

    pub fn without_jitter(mut self) -> Self {
        self.jitter = false;
        self
    }

    /// Backoff to wait after failed attempt `attempt`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(31);
        let delay = self
            .base_delay
            .checked_mul(1u32 << exp)
            .unwrap_or(self.max_delay)
            .min(self.max_delay);
        if !self.jitter || delay.is_zero() {
            return delay;
        }
        let spread = delay / 4;
        delay + spread.mul_f64(rand::thread_rng().gen_range(0.0..=1.0))
    }

    /// Whether another attempt is allowed after `attempt` failed.
    pub fn allows_retry(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }

    pub async fn wait(&self, attempt: u32) {
        let delay = self.delay_for(attempt);
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3, Duration::from_millis(250), Duration::from_secs(4))
    }
}
