//! Shared retry/backoff policy.
//!
//! Used by `portal-oauth`'s 429/5xx handling and, where `continueOnError`
//! permits, `portal-bulk`'s per-target retry path.

use std::time::Duration;

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub initial: Duration,
    pub multiplier: f64,
    pub max: Duration,
    pub jitter: f64,
    pub max_retries: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            initial: Duration::from_millis(250),
            multiplier: 2.0,
            max: Duration::from_secs(30),
            jitter: 0.2,
            max_retries: 5,
        }
    }
}

impl RetryPolicy {
    /// Backoff duration for the given zero-indexed attempt, before jitter.
    pub fn base_delay(&self, attempt: u32) -> Duration {
        let scaled = self.initial.as_secs_f64() * self.multiplier.powi(attempt as i32);
        Duration::from_secs_f64(scaled.min(self.max.as_secs_f64()))
    }

    /// Applies jitter deterministically from a caller-supplied random sample in `[0, 1)`,
    /// so callers can inject a PRNG of their choice without this type depending on `rand`.
    pub fn delay_with_jitter(&self, attempt: u32, sample: f64) -> Duration {
        let base = self.base_delay(attempt).as_secs_f64();
        let jitter_span = base * self.jitter;
        let jittered = base - jitter_span + (sample * 2.0 * jitter_span);
        Duration::from_secs_f64(jittered.max(0.0))
    }

    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_retries
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_grows_and_caps() {
        let policy = RetryPolicy::default();
        let d0 = policy.base_delay(0);
        let d1 = policy.base_delay(1);
        assert!(d1 > d0);
        let d_big = policy.base_delay(20);
        assert_eq!(d_big, policy.max);
    }

    #[test]
    fn jitter_stays_within_span() {
        let policy = RetryPolicy::default();
        let base = policy.base_delay(2).as_secs_f64();
        let low = policy.delay_with_jitter(2, 0.0).as_secs_f64();
        let high = policy.delay_with_jitter(2, 1.0).as_secs_f64();
        assert!(low <= base);
        assert!(high >= base);
    }
}
