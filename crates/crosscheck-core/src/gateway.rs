//! Provider gateway with ordered fallback.
//!
//! Wraps an ordered list of [`ModelProvider`]s behind the full resilience
//! stack. Per call, for each provider in order: availability check, then
//! rate-limit token acquisition (keyed by provider name), then the circuit
//! breaker, then the retry policy around the raw completion. Any failure
//! that survives the stack moves on to the next provider; provider state
//! (breaker, bucket, counters) is never shared between slots. When every
//! provider has been skipped or has failed, the call fails with
//! [`CrosscheckError::NoProviderAvailable`].

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::breaker::{BreakerSnapshot, CircuitBreaker};
use crate::config::{BreakerConfig, RateLimitConfig, RetryConfig};
use crate::error::{CrosscheckError, Result};
use crate::provider::{CompletionRequest, ModelProvider};
use crate::rate_limit::RateLimiter;
use crate::retry::RetryPolicy;

/// Resilience settings shared by every slot in a gateway.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub retry: RetryConfig,
    pub breaker: BreakerConfig,
    pub rate_limit: RateLimitConfig,
    /// Deadline for blocking token acquisition per provider attempt.
    /// Zero means a dry bucket falls through to the next provider at once.
    pub rate_acquire_timeout_ms: u64,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            retry: RetryConfig::default(),
            breaker: BreakerConfig::default(),
            rate_limit: RateLimitConfig::default(),
            rate_acquire_timeout_ms: 30_000,
        }
    }
}

impl GatewayConfig {
    fn rate_acquire_timeout(&self) -> Duration {
        Duration::from_millis(self.rate_acquire_timeout_ms)
    }
}

#[derive(Default)]
struct SlotCounters {
    calls: AtomicU64,
    succeeded: AtomicU64,
    failed: AtomicU64,
    total_latency_ms: AtomicU64,
}

struct ProviderSlot {
    provider: Arc<dyn ModelProvider>,
    breaker: CircuitBreaker,
    counters: SlotCounters,
}

/// Per-provider call counters, cumulative since gateway construction.
#[derive(Debug, Clone, Serialize)]
pub struct ProviderMetrics {
    pub provider: String,
    pub calls: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub total_latency_ms: u64,
}

impl ProviderMetrics {
    pub fn average_latency_ms(&self) -> f64 {
        if self.succeeded == 0 {
            0.0
        } else {
            self.total_latency_ms as f64 / self.succeeded as f64
        }
    }
}

/// Ordered-fallback gateway over model providers.
pub struct ProviderGateway {
    slots: Vec<ProviderSlot>,
    limiter: RateLimiter,
    retry: RetryPolicy,
    acquire_timeout: Duration,
}

impl ProviderGateway {
    /// Build a gateway over `providers` in fallback order. Each provider
    /// gets its own breaker; the rate limiter keys buckets by provider
    /// name so quotas stay independent too.
    pub fn new(providers: Vec<Arc<dyn ModelProvider>>, config: GatewayConfig) -> Self {
        let slots = providers
            .into_iter()
            .map(|provider| ProviderSlot {
                breaker: CircuitBreaker::new(provider.name().to_string(), config.breaker.clone()),
                counters: SlotCounters::default(),
                provider,
            })
            .collect();
        Self {
            slots,
            limiter: RateLimiter::new(config.rate_limit.clone()),
            retry: RetryPolicy::new(config.retry.clone()),
            acquire_timeout: config.rate_acquire_timeout(),
        }
    }

    pub fn provider_names(&self) -> Vec<String> {
        self.slots
            .iter()
            .map(|s| s.provider.name().to_string())
            .collect()
    }

    /// Run a completion against the first provider that can serve it.
    ///
    /// `operation` names the logical caller for logs and error context.
    pub async fn complete(&self, operation: &str, request: &CompletionRequest) -> Result<String> {
        for slot in &self.slots {
            let name = slot.provider.name();
            if !slot.provider.available().await {
                debug!(operation, provider = name, "provider unavailable, skipping");
                continue;
            }

            slot.counters.calls.fetch_add(1, Ordering::Relaxed);
            if let Err(err) = self.limiter.acquire(name, self.acquire_timeout).await {
                warn!(operation, provider = name, error = %err, "rate limited, trying next provider");
                slot.counters.failed.fetch_add(1, Ordering::Relaxed);
                continue;
            }

            let started = Instant::now();
            let outcome = slot
                .breaker
                .execute(|| {
                    self.retry
                        .execute(operation, || slot.provider.complete(request))
                })
                .await;
            match outcome {
                Ok(text) => {
                    let elapsed_ms = started.elapsed().as_millis() as u64;
                    slot.counters.succeeded.fetch_add(1, Ordering::Relaxed);
                    slot.counters
                        .total_latency_ms
                        .fetch_add(elapsed_ms, Ordering::Relaxed);
                    info!(operation, provider = name, elapsed_ms, "completion served");
                    return Ok(text);
                }
                Err(err) => {
                    slot.counters.failed.fetch_add(1, Ordering::Relaxed);
                    warn!(operation, provider = name, error = %err, "provider failed, trying next");
                }
            }
        }

        warn!(operation, "all providers exhausted");
        Err(CrosscheckError::NoProviderAvailable {
            operation: operation.to_string(),
        })
    }

    /// Cumulative per-provider counters, in fallback order.
    pub fn metrics(&self) -> Vec<ProviderMetrics> {
        self.slots
            .iter()
            .map(|slot| ProviderMetrics {
                provider: slot.provider.name().to_string(),
                calls: slot.counters.calls.load(Ordering::Relaxed),
                succeeded: slot.counters.succeeded.load(Ordering::Relaxed),
                failed: slot.counters.failed.load(Ordering::Relaxed),
                total_latency_ms: slot.counters.total_latency_ms.load(Ordering::Relaxed),
            })
            .collect()
    }

    /// Breaker snapshots, in fallback order.
    pub async fn breaker_snapshots(&self) -> Vec<BreakerSnapshot> {
        let mut snapshots = Vec::with_capacity(self.slots.len());
        for slot in &self.slots {
            snapshots.push(slot.breaker.snapshot().await);
        }
        snapshots
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::breaker::BreakerState;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicU32;

    struct StubProvider {
        name: String,
        available: bool,
        fail_first: u32,
        calls: AtomicU32,
    }

    impl StubProvider {
        fn healthy(name: &str) -> Arc<Self> {
            Arc::new(Self {
                name: name.to_string(),
                available: true,
                fail_first: 0,
                calls: AtomicU32::new(0),
            })
        }

        fn failing(name: &str) -> Arc<Self> {
            Arc::new(Self {
                name: name.to_string(),
                available: true,
                fail_first: u32::MAX,
                calls: AtomicU32::new(0),
            })
        }

        fn offline(name: &str) -> Arc<Self> {
            Arc::new(Self {
                name: name.to_string(),
                available: false,
                fail_first: 0,
                calls: AtomicU32::new(0),
            })
        }
    }

    #[async_trait]
    impl ModelProvider for StubProvider {
        fn name(&self) -> &str {
            &self.name
        }

        async fn available(&self) -> bool {
            self.available
        }

        async fn complete(&self, request: &CompletionRequest) -> Result<String> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.fail_first {
                return Err(CrosscheckError::ServiceUnavailable {
                    detail: format!("{} is down", self.name),
                });
            }
            Ok(format!("{}: {}", self.name, request.prompt))
        }
    }

    fn config() -> GatewayConfig {
        GatewayConfig {
            retry: RetryConfig {
                max_attempts: 2,
                base_delay_ms: 10,
                max_delay_ms: 50,
                multiplier: 2.0,
                jitter_enabled: false,
            },
            breaker: BreakerConfig {
                failure_threshold: 2,
                reset_timeout_ms: 60_000,
                success_threshold: 1,
            },
            rate_limit: RateLimitConfig {
                capacity: 100.0,
                refill_rate_per_sec: 100.0,
            },
            rate_acquire_timeout_ms: 0,
        }
    }

    #[tokio::test]
    async fn test_first_healthy_provider_serves() {
        let gateway = ProviderGateway::new(
            vec![StubProvider::healthy("remote"), StubProvider::healthy("local")],
            config(),
        );
        let text = gateway
            .complete("analysis", &CompletionRequest::new("hi"))
            .await
            .unwrap();
        assert_eq!(text, "remote: hi");
    }

    #[tokio::test(start_paused = true)]
    async fn test_falls_back_when_primary_fails() {
        let primary = StubProvider::failing("remote");
        let gateway = ProviderGateway::new(
            vec![primary.clone(), StubProvider::healthy("local")],
            config(),
        );
        let text = gateway
            .complete("analysis", &CompletionRequest::new("hi"))
            .await
            .unwrap();
        assert_eq!(text, "local: hi");
        // Retry budget of 2 was spent on the primary before falling back.
        assert_eq!(primary.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_skips_unavailable_provider_without_calling_it() {
        let offline = StubProvider::offline("remote");
        let gateway = ProviderGateway::new(
            vec![offline.clone(), StubProvider::healthy("local")],
            config(),
        );
        let text = gateway
            .complete("analysis", &CompletionRequest::new("hi"))
            .await
            .unwrap();
        assert_eq!(text, "local: hi");
        assert_eq!(offline.calls.load(Ordering::SeqCst), 0);
        assert_eq!(gateway.metrics()[0].calls, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_all_exhausted_yields_no_provider_available() {
        let gateway = ProviderGateway::new(
            vec![StubProvider::failing("remote"), StubProvider::offline("local")],
            config(),
        );
        let err = gateway
            .complete("analysis", &CompletionRequest::new("hi"))
            .await
            .unwrap_err();
        assert!(matches!(err, CrosscheckError::NoProviderAvailable { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_breaker_opens_per_provider_and_isolates() {
        let primary = StubProvider::failing("remote");
        let gateway = ProviderGateway::new(
            vec![primary.clone(), StubProvider::healthy("local")],
            config(),
        );

        // Each gateway call records one breaker failure on the primary
        // (threshold 2), then falls back.
        for _ in 0..2 {
            gateway
                .complete("analysis", &CompletionRequest::new("hi"))
                .await
                .unwrap();
        }
        let snapshots = gateway.breaker_snapshots().await;
        assert_eq!(snapshots[0].state, BreakerState::Open);
        assert_eq!(snapshots[1].state, BreakerState::Closed);

        // Open primary now fails fast: no further raw calls.
        let before = primary.calls.load(Ordering::SeqCst);
        gateway
            .complete("analysis", &CompletionRequest::new("hi"))
            .await
            .unwrap();
        assert_eq!(primary.calls.load(Ordering::SeqCst), before);
    }

    #[tokio::test]
    async fn test_rate_limited_primary_falls_through() {
        let mut cfg = config();
        cfg.rate_limit = RateLimitConfig {
            capacity: 1.0,
            refill_rate_per_sec: 0.001,
        };
        let gateway = ProviderGateway::new(
            vec![StubProvider::healthy("remote"), StubProvider::healthy("local")],
            cfg,
        );

        assert_eq!(
            gateway
                .complete("analysis", &CompletionRequest::new("a"))
                .await
                .unwrap(),
            "remote: a"
        );
        // Primary's bucket is dry; secondary still has its own.
        assert_eq!(
            gateway
                .complete("analysis", &CompletionRequest::new("b"))
                .await
                .unwrap(),
            "local: b"
        );
    }

    #[tokio::test]
    async fn test_metrics_count_outcomes() {
        let gateway = ProviderGateway::new(
            vec![StubProvider::healthy("remote")],
            config(),
        );
        gateway
            .complete("analysis", &CompletionRequest::new("hi"))
            .await
            .unwrap();
        let metrics = gateway.metrics();
        assert_eq!(metrics[0].calls, 1);
        assert_eq!(metrics[0].succeeded, 1);
        assert_eq!(metrics[0].failed, 0);
    }
}
