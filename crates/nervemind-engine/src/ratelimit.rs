//! Process-wide rate-limit buckets.
//!
//! Buckets are keyed by id and shared across executions. Contenders queue
//! through a FIFO gate, so waiting is fair; the underlying quota is a
//! `governor` cell refilled per interval.

use std::num::NonZeroU32;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use dashmap::DashMap;
use governor::clock::{Clock, DefaultClock};
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use tokio_util::sync::CancellationToken;

use crate::error::EngineError;

/// Permit pool configuration: `permits_per_interval` permits every
/// `interval_ms` milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BucketConfig {
    pub permits_per_interval: u32,
    pub interval_ms: u64,
}

impl Default for BucketConfig {
    fn default() -> Self {
        Self {
            permits_per_interval: 1,
            interval_ms: 1000,
        }
    }
}

impl BucketConfig {
    fn quota(&self) -> Quota {
        let permits = NonZeroU32::new(self.permits_per_interval).unwrap_or(NonZeroU32::MIN);
        let interval = self.interval_ms.max(1);
        let period = Duration::from_millis((interval / u64::from(permits.get())).max(1));
        Quota::with_period(period)
            .unwrap_or_else(|| Quota::per_second(NonZeroU32::MIN))
            .allow_burst(permits)
    }
}

/// A named permit pool.
pub struct RateLimitBucket {
    limiter: DefaultDirectRateLimiter,
    gate: tokio::sync::Mutex<()>,
    clock: DefaultClock,
}

impl RateLimitBucket {
    fn new(config: BucketConfig) -> Self {
        Self {
            limiter: RateLimiter::direct(config.quota()),
            gate: tokio::sync::Mutex::new(()),
            clock: DefaultClock::default(),
        }
    }

    /// Take a permit without waiting. On throttle, returns the estimated
    /// wait until one frees up.
    pub fn try_acquire(&self) -> Result<(), Duration> {
        self.limiter
            .check()
            .map_err(|not_until| not_until.wait_time_from(self.clock.now()))
    }

    /// Take a permit, sleeping cooperatively while throttled. `on_wait` is
    /// called with the estimated wait before each sleep. FIFO on
    /// contention.
    pub async fn acquire(
        &self,
        cancel: &CancellationToken,
        mut on_wait: impl FnMut(Duration),
    ) -> Result<(), EngineError> {
        let _slot = self.gate.lock().await;
        loop {
            match self.try_acquire() {
                Ok(()) => return Ok(()),
                Err(wait) => {
                    on_wait(wait);
                    tokio::select! {
                        _ = tokio::time::sleep(wait) => {}
                        _ = cancel.cancelled() => return Err(EngineError::Cancelled),
                    }
                }
            }
        }
    }
}

/// Process-wide registry of buckets keyed by bucket id. A bucket's quota
/// is fixed by the first configuration seen for its id.
#[derive(Default)]
pub struct RateLimiterRegistry {
    buckets: DashMap<String, Arc<RateLimitBucket>>,
}

impl RateLimiterRegistry {
    /// The process-wide registry.
    pub fn global() -> &'static RateLimiterRegistry {
        static REGISTRY: OnceLock<RateLimiterRegistry> = OnceLock::new();
        REGISTRY.get_or_init(RateLimiterRegistry::default)
    }

    /// Get or create the bucket for `id`.
    pub fn bucket(&self, id: &str, config: BucketConfig) -> Arc<RateLimitBucket> {
        self.buckets
            .entry(id.to_string())
            .or_insert_with(|| Arc::new(RateLimitBucket::new(config)))
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn burst_is_bounded_and_wait_is_estimated() {
        let bucket = RateLimitBucket::new(BucketConfig {
            permits_per_interval: 2,
            interval_ms: 10_000,
        });

        assert!(bucket.try_acquire().is_ok());
        assert!(bucket.try_acquire().is_ok());
        let wait = bucket.try_acquire().unwrap_err();
        assert!(wait > Duration::ZERO);
    }

    #[tokio::test]
    async fn acquire_observes_cancellation() {
        let bucket = RateLimitBucket::new(BucketConfig {
            permits_per_interval: 1,
            interval_ms: 60_000,
        });
        assert!(bucket.try_acquire().is_ok());

        let cancel = CancellationToken::new();
        cancel.cancel();
        let result = bucket.acquire(&cancel, |_| {}).await;
        assert!(matches!(result, Err(EngineError::Cancelled)));
    }

    #[tokio::test]
    async fn registry_shares_buckets_by_id() {
        let registry = RateLimiterRegistry::default();
        let a = registry.bucket("api", BucketConfig::default());
        let b = registry.bucket("api", BucketConfig::default());
        assert!(Arc::ptr_eq(&a, &b));
    }
}
