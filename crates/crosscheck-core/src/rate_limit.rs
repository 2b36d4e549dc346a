//! Keyed token-bucket rate limiting.
//!
//! Each key gets an independent bucket created lazily on first use.
//! Refill is computed at acquisition time from the elapsed interval, so
//! idle buckets cost nothing. `acquire` blocks (polling) up to a deadline
//! and fails with [`CrosscheckError::RateLimitExceeded`] carrying a
//! retry-after hint when the deadline passes.

use std::collections::HashMap;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::config::RateLimitConfig;
use crate::error::{CrosscheckError, Result};

/// Interval between token checks while an `acquire` call is waiting.
const POLL_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Debug)]
struct Bucket {
    tokens: f64,
    last_refill: Instant,
}

impl Bucket {
    fn full(capacity: f64) -> Self {
        Self {
            tokens: capacity,
            last_refill: Instant::now(),
        }
    }

    fn refill(&mut self, config: &RateLimitConfig) {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * config.refill_rate_per_sec).min(config.capacity);
        self.last_refill = now;
    }
}

/// Point-in-time view of one key's bucket.
#[derive(Debug, Clone, Serialize)]
pub struct BucketStatus {
    pub key: String,
    pub available_tokens: f64,
    pub capacity: f64,
    pub refill_rate_per_sec: f64,
}

/// Token-bucket rate limiter with one bucket per key.
pub struct RateLimiter {
    config: RateLimitConfig,
    buckets: Mutex<HashMap<String, Bucket>>,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            buckets: Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    /// Take one token from `key`'s bucket if available, without waiting.
    pub async fn try_acquire(&self, key: &str) -> bool {
        self.try_acquire_cost(key, 1.0).await
    }

    /// Take `cost` tokens from `key`'s bucket if available, without
    /// waiting. A cost beyond the bucket capacity can never succeed.
    pub async fn try_acquire_cost(&self, key: &str, cost: f64) -> bool {
        let mut buckets = self.buckets.lock().await;
        let bucket = buckets
            .entry(key.to_string())
            .or_insert_with(|| Bucket::full(self.config.capacity));
        bucket.refill(&self.config);
        if bucket.tokens >= cost {
            bucket.tokens -= cost;
            true
        } else {
            false
        }
    }

    /// Take one token from `key`'s bucket, waiting up to `timeout`.
    pub async fn acquire(&self, key: &str, timeout: Duration) -> Result<()> {
        self.acquire_cost(key, 1.0, timeout).await
    }

    /// Take `cost` tokens from `key`'s bucket, waiting up to `timeout`.
    ///
    /// The wait polls rather than queueing, so fairness between
    /// concurrent waiters on a starved key is best-effort. The deadline
    /// failure is a rate-limit error carrying a retry-after hint, not a
    /// generic timeout.
    pub async fn acquire_cost(&self, key: &str, cost: f64, timeout: Duration) -> Result<()> {
        let deadline = Instant::now() + timeout;
        loop {
            if self.try_acquire_cost(key, cost).await {
                debug!(key, cost, "tokens acquired");
                return Ok(());
            }
            if Instant::now() >= deadline {
                warn!(key, cost, timeout_ms = timeout.as_millis() as u64, "token acquisition timed out");
                return Err(CrosscheckError::RateLimitExceeded {
                    key: key.to_string(),
                    retry_after: Some(self.time_to_refill(cost)),
                });
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            tokio::time::sleep(POLL_INTERVAL.min(remaining)).await;
        }
    }

    /// Tokens currently available for `key` (after refill). A key never
    /// seen reports a full bucket.
    pub async fn available(&self, key: &str) -> f64 {
        let mut buckets = self.buckets.lock().await;
        match buckets.get_mut(key) {
            Some(bucket) => {
                bucket.refill(&self.config);
                bucket.tokens
            }
            None => self.config.capacity,
        }
    }

    /// Snapshot one key's bucket. A key never seen reports a full bucket.
    pub async fn status(&self, key: &str) -> BucketStatus {
        BucketStatus {
            key: key.to_string(),
            available_tokens: self.available(key).await,
            capacity: self.config.capacity,
            refill_rate_per_sec: self.config.refill_rate_per_sec,
        }
    }

    /// Snapshot every bucket created so far.
    pub async fn all_statuses(&self) -> Vec<BucketStatus> {
        let mut buckets = self.buckets.lock().await;
        let mut statuses: Vec<BucketStatus> = buckets
            .iter_mut()
            .map(|(key, bucket)| {
                bucket.refill(&self.config);
                BucketStatus {
                    key: key.clone(),
                    available_tokens: bucket.tokens,
                    capacity: self.config.capacity,
                    refill_rate_per_sec: self.config.refill_rate_per_sec,
                }
            })
            .collect();
        statuses.sort_by(|a, b| a.key.cmp(&b.key));
        statuses
    }

    /// Drop the bucket for `key`; the next use starts full again.
    pub async fn reset(&self, key: &str) {
        self.buckets.lock().await.remove(key);
    }

    fn time_to_refill(&self, cost: f64) -> Duration {
        Duration::from_secs_f64(cost / self.config.refill_rate_per_sec)
    }
}
