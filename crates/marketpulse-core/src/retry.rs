//! Retry backoff for the refresh worker.

use std::time::Duration;

use serde::Serialize;

/// Exponential backoff: attempt `n` waits `base * factor^(n - 1)`, uncapped.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Backoff {
    pub base: Duration,
    pub factor: f64,
    /// Spread each delay uniformly over +/- 50%.
    pub jitter: bool,
}

impl Default for Backoff {
    fn default() -> Self {
        Self::doubling(Duration::from_millis(1_000))
    }
}

impl Backoff {
    /// Deterministic doubling from `base` (1s, 2s, 4s, ...).
    pub const fn doubling(base: Duration) -> Self {
        Self {
            base,
            factor: 2.0,
            jitter: false,
        }
    }

    pub const fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    /// Delay to wait after the given failed attempt (1-based).
    pub fn delay(self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let seconds = self.base.as_secs_f64() * self.factor.powi(exponent);
        let delay = Duration::try_from_secs_f64(seconds.max(0.0)).unwrap_or(Duration::MAX);

        if !self.jitter {
            return delay;
        }

        let millis = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX / 2);
        let spread = millis / 2;
        let low = millis - spread;
        Duration::from_millis(fastrand::u64(low..=low.saturating_add(spread * 2)))
    }
}

/// How many times a failed tick is attempted and how long to wait in between.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct RetryPolicy {
    /// Total attempts including the first; at least 1.
    pub attempts: u32,
    pub backoff: Backoff,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            backoff: Backoff::default(),
        }
    }
}

impl RetryPolicy {
    pub fn new(attempts: u32, base: Duration) -> Self {
        Self {
            attempts: attempts.max(1),
            backoff: Backoff::doubling(base),
        }
    }

    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.backoff = self.backoff.with_jitter(jitter);
        self
    }

    /// Delay before the attempt after `attempt`, or `None` when retries are spent.
    pub fn next_delay(&self, attempt: u32) -> Option<Duration> {
        (attempt < self.attempts).then(|| self.backoff.delay(attempt))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn doubling_backoff_matches_worker_schedule() {
        let backoff = Backoff::doubling(Duration::from_millis(1_000));
        assert_eq!(backoff.delay(1), Duration::from_secs(1));
        assert_eq!(backoff.delay(2), Duration::from_secs(2));
        assert_eq!(backoff.delay(3), Duration::from_secs(4));
    }

    #[test]
    fn doubling_backoff_is_not_capped() {
        let backoff = Backoff::doubling(Duration::from_secs(1));
        assert_eq!(backoff.delay(8), Duration::from_secs(128));
        assert_eq!(backoff.delay(u32::MAX), Duration::MAX);
    }

    #[test]
    fn jitter_stays_within_half_of_delay() {
        let policy = RetryPolicy::new(3, Duration::from_millis(1_000)).with_jitter(true);

        for _ in 0..100 {
            let delay = policy.next_delay(2).expect("second attempt retries");
            assert!(delay >= Duration::from_millis(1_000));
            assert!(delay <= Duration::from_millis(3_000));
        }
    }

    #[test]
    fn retry_policy_stops_after_last_attempt() {
        let policy = RetryPolicy::new(3, Duration::from_millis(250));
        assert_eq!(policy.next_delay(1), Some(Duration::from_millis(250)));
        assert_eq!(policy.next_delay(2), Some(Duration::from_millis(500)));
        assert_eq!(policy.next_delay(3), None);

        assert_eq!(RetryPolicy::new(0, Duration::ZERO).attempts, 1);
    }
}
