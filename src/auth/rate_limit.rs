use std::collections::HashMap;
use std::num::NonZeroU32;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use governor::clock::{Clock, DefaultClock};
use governor::{DefaultKeyedRateLimiter, Quota, RateLimiter as Governor};

/// Past this many tracked keys, idle keys are dropped on the next check.
const PRUNE_THRESHOLD: usize = 10_000;

/// Per-API-key limiter, one GCRA bucket set per distinct requests-per-minute value.
pub struct RateLimiter {
    limiters: RwLock<HashMap<NonZeroU32, Arc<DefaultKeyedRateLimiter<String>>>>,
    clock: DefaultClock,
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self {
            limiters: RwLock::new(HashMap::new()),
            clock: DefaultClock::default(),
        }
    }
}

impl RateLimiter {
    fn limiter_for(&self, per_minute: NonZeroU32) -> Arc<DefaultKeyedRateLimiter<String>> {
        if let Some(limiter) = self
            .limiters
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&per_minute)
        {
            return Arc::clone(limiter);
        }

        let mut limiters = self.limiters.write().unwrap_or_else(|e| e.into_inner());
        let limiter = limiters
            .entry(per_minute)
            .or_insert_with(|| Arc::new(Governor::keyed(Quota::per_minute(per_minute))));
        Arc::clone(limiter)
    }

    /// Counts one request for `key` against `limit` requests per minute.
    ///
    /// A limit of zero means unlimited. On rejection, returns how long until
    /// the next request would be admitted.
    pub fn check(&self, key: &str, limit: u32) -> Result<(), Duration> {
        let Some(per_minute) = NonZeroU32::new(limit) else {
            return Ok(());
        };

        let limiter = self.limiter_for(per_minute);
        if limiter.len() > PRUNE_THRESHOLD {
            limiter.retain_recent();
        }

        limiter
            .check_key(&key.to_string())
            .map_err(|not_until| not_until.wait_time_from(self.clock.now()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINUTE: Duration = Duration::from_secs(60);

    #[test]
    fn test_limit_allows_burst_then_rejects() {
        let limiter = RateLimiter::default();

        for _ in 0..3 {
            assert!(limiter.check("key", 3).is_ok());
        }
        let retry = limiter.check("key", 3).unwrap_err();
        assert!(retry > Duration::ZERO);
        assert!(retry <= MINUTE / 3);

        assert!(limiter.check("other", 3).is_ok());
    }

    #[test]
    fn test_retry_after_reflects_rate() {
        let limiter = RateLimiter::default();

        assert!(limiter.check("key", 1).is_ok());
        let retry = limiter.check("key", 1).unwrap_err();
        assert!(retry > MINUTE / 2);
        assert!(retry <= MINUTE);
    }

    #[test]
    fn test_limits_are_tracked_separately() {
        let limiter = RateLimiter::default();

        assert!(limiter.check("key", 1).is_ok());
        assert!(limiter.check("key", 1).is_err());

        // A plan change gives the key a fresh budget under the new rate.
        assert!(limiter.check("key", 5).is_ok());
    }

    #[test]
    fn test_zero_is_unlimited() {
        let limiter = RateLimiter::default();

        for _ in 0..1000 {
            assert!(limiter.check("key", 0).is_ok());
        }
    }
}
