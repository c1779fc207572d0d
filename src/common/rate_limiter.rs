//! Token-bucket rate limiter
//!
//! Keeps request bursts within the exchange's per-second budget. Permits
//! are consumed on acquire and the bucket refills once per interval.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, Semaphore};
use tokio::time::Instant;

/// Configuration for the rate limiter
#[derive(Debug, Clone)]
pub struct RateLimiterConfig {
    /// Maximum requests allowed per refill interval
    pub max_requests: usize,
    /// Refill interval for tokens
    pub refill_interval: Duration,
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        Self {
            max_requests: 10,
            refill_interval: Duration::from_secs(1),
        }
    }
}

impl RateLimiterConfig {
    pub fn with_rate(mut self, requests_per_second: usize) -> Self {
        self.max_requests = requests_per_second;
        self
    }
}

/// Rate limiter using a token bucket
#[derive(Debug)]
pub struct RateLimiter {
    permits: Arc<Semaphore>,
    max_permits: usize,
    last_refill: Arc<Mutex<Instant>>,
    refill_interval: Duration,
}

impl RateLimiter {
    pub fn new(config: RateLimiterConfig) -> Self {
        Self {
            permits: Arc::new(Semaphore::new(config.max_requests)),
            max_permits: config.max_requests,
            last_refill: Arc::new(Mutex::new(Instant::now())),
            refill_interval: config.refill_interval,
        }
    }

    /// Acquire a permit, waiting for a refill if the bucket is empty.
    /// The permit is consumed rather than returned to the pool.
    pub async fn acquire(&self) {
        loop {
            self.try_refill().await;

            if let Ok(permit) = self.permits.try_acquire() {
                permit.forget();
                return;
            }

            // Bucket empty: sleep out the remainder of the interval
            let wait = {
                let last = self.last_refill.lock().await;
                self.refill_interval.saturating_sub(last.elapsed())
            };
            tokio::time::sleep(wait.max(Duration::from_millis(10))).await;
        }
    }

    pub fn available_permits(&self) -> usize {
        self.permits.available_permits()
    }

    async fn try_refill(&self) {
        let mut last = self.last_refill.lock().await;
        if last.elapsed() >= self.refill_interval {
            let deficit = self.max_permits.saturating_sub(self.permits.available_permits());
            if deficit > 0 {
                self.permits.add_permits(deficit);
            }
            *last = Instant::now();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn consumes_permits() {
        let limiter = RateLimiter::new(RateLimiterConfig::default().with_rate(3));
        assert_eq!(limiter.available_permits(), 3);
        limiter.acquire().await;
        limiter.acquire().await;
        assert_eq!(limiter.available_permits(), 1);
    }

    #[tokio::test]
    async fn refills_after_interval() {
        let config = RateLimiterConfig {
            max_requests: 2,
            refill_interval: Duration::from_millis(20),
        };
        let limiter = RateLimiter::new(config);
        limiter.acquire().await;
        limiter.acquire().await;
        assert_eq!(limiter.available_permits(), 0);

        tokio::time::sleep(Duration::from_millis(30)).await;
        limiter.acquire().await;
        assert_eq!(limiter.available_permits(), 1);
    }
}
