//! Per-user token-bucket rate limiting.

use dashmap::DashMap;
use parking_lot::Mutex;
use portal_types::UserId;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy)]
pub struct RateLimitConfig {
    pub capacity: u32,
    pub period: Duration,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            capacity: 30,
            period: Duration::from_secs(60),
        }
    }
}

struct Bucket {
    tokens: f64,
    last_refill: Instant,
}

/// A `DashMap`-backed token bucket per user, sharded rather than a single
/// `Mutex<HashMap<..>>` so unrelated users never contend on the same lock.
pub struct RateLimiter {
    config: RateLimitConfig,
    buckets: DashMap<UserId, Mutex<Bucket>>,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            buckets: DashMap::new(),
        }
    }

    fn refill_rate(&self) -> f64 {
        self.config.capacity as f64 / self.config.period.as_secs_f64()
    }

    /// Attempts to consume one token for `user`. Returns `Ok(())` on success,
    /// or `Err(retry_after)` when the bucket is empty.
    pub fn try_acquire(&self, user: UserId) -> Result<(), Duration> {
        let entry = self.buckets.entry(user).or_insert_with(|| {
            Mutex::new(Bucket {
                tokens: self.config.capacity as f64,
                last_refill: Instant::now(),
            })
        });
        let mut bucket = entry.lock();
        let now = Instant::now();
        let elapsed = now.duration_since(bucket.last_refill).as_secs_f64();
        bucket.tokens = (bucket.tokens + elapsed * self.refill_rate())
            .min(self.config.capacity as f64);
        bucket.last_refill = now;

        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            Ok(())
        } else {
            let deficit = 1.0 - bucket.tokens;
            let wait = Duration::from_secs_f64(deficit / self.refill_rate());
            Err(wait)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allows_up_to_capacity_then_limits() {
        let limiter = RateLimiter::new(RateLimitConfig {
            capacity: 3,
            period: Duration::from_secs(60),
        });
        let user = UserId::new();
        assert!(limiter.try_acquire(user).is_ok());
        assert!(limiter.try_acquire(user).is_ok());
        assert!(limiter.try_acquire(user).is_ok());
        assert!(limiter.try_acquire(user).is_err());
    }

    #[test]
    fn separate_users_have_separate_buckets() {
        let limiter = RateLimiter::new(RateLimitConfig {
            capacity: 1,
            period: Duration::from_secs(60),
        });
        let a = UserId::new();
        let b = UserId::new();
        assert!(limiter.try_acquire(a).is_ok());
        assert!(limiter.try_acquire(b).is_ok());
        assert!(limiter.try_acquire(a).is_err());
    }
}
