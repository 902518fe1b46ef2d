//! Reconnect backoff.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Capped exponential backoff: `base * 2^(n-1)`, never above `max`.
///
/// With the defaults (1s base, 30s cap) consecutive failures wait
/// 1s, 2s, 4s, 8s, 16s, 30s, 30s, ... A successful connection calls
/// [`Backoff::reset`] so the next failure starts from `base` again.
#[derive(Debug, Clone)]
pub struct Backoff {
    base_ms: u64,
    max_ms: u64,
    jitter_ms: u64,
    attempt: u32,
}

impl Backoff {
    pub fn new(base_ms: u64, max_ms: u64) -> Self {
        Self {
            base_ms,
            max_ms,
            jitter_ms: 0,
            attempt: 0,
        }
    }

    /// Add up to `jitter_ms` of pseudo-random delay on top of each step.
    pub fn with_jitter(mut self, jitter_ms: u64) -> Self {
        self.jitter_ms = jitter_ms;
        self
    }

    /// Delay before the next attempt; advances the failure count.
    pub fn next_delay(&mut self) -> Duration {
        self.attempt = self.attempt.saturating_add(1);

        let exponent = self.attempt.saturating_sub(1).min(20);
        let delay = self
            .base_ms
            .saturating_mul(1u64 << exponent)
            .min(self.max_ms);

        Duration::from_millis(delay + self.jitter())
    }

    pub fn reset(&mut self) {
        self.attempt = 0;
    }

    /// Consecutive failures since the last reset.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    fn jitter(&self) -> u64 {
        if self.jitter_ms == 0 {
            return 0;
        }
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.subsec_nanos())
            .unwrap_or(0);
        u64::from(nanos) % (self.jitter_ms + 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_sequence_caps_at_max() {
        let mut backoff = Backoff::new(1000, 30000);
        let delays: Vec<u64> = (0..8)
            .map(|_| backoff.next_delay().as_millis() as u64)
            .collect();
        assert_eq!(
            delays,
            vec![1000, 2000, 4000, 8000, 16000, 30000, 30000, 30000]
        );
        assert_eq!(backoff.attempt(), 8);
    }

    #[test]
    fn test_backoff_reset_restarts_at_base() {
        let mut backoff = Backoff::new(1000, 30000);
        backoff.next_delay();
        backoff.next_delay();
        backoff.next_delay();
        backoff.reset();
        assert_eq!(backoff.attempt(), 0);
        assert_eq!(backoff.next_delay(), Duration::from_millis(1000));
    }

    #[test]
    fn test_backoff_never_overflows() {
        let mut backoff = Backoff::new(u64::MAX / 2, u64::MAX);
        for _ in 0..100 {
            backoff.next_delay();
        }
        assert_eq!(backoff.attempt(), 100);
    }

    #[test]
    fn test_jitter_is_bounded() {
        let mut backoff = Backoff::new(1000, 30000).with_jitter(250);
        let delay = backoff.next_delay().as_millis() as u64;
        assert!((1000..=1250).contains(&delay));
    }
}
