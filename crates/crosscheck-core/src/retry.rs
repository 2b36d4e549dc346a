//! Bounded retry with exponential backoff and jitter.
//!
//! Wraps a fallible async operation: transient failures are retried up to
//! the configured attempt budget with exponentially growing, jittered
//! delays; non-retryable failures propagate immediately. Classification is
//! pluggable and defaults to [`CrosscheckError::is_retryable`].

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::config::RetryConfig;
use crate::error::{CrosscheckError, Result};

type Classifier = Arc<dyn Fn(&CrosscheckError) -> bool + Send + Sync>;

/// Retry executor sharing one immutable [`RetryConfig`].
#[derive(Clone)]
pub struct RetryPolicy {
    config: RetryConfig,
    classifier: Option<Classifier>,
}

impl RetryPolicy {
    pub fn new(config: RetryConfig) -> Self {
        Self {
            config,
            classifier: None,
        }
    }

    /// Replace the default kind-based retryability check.
    pub fn with_classifier<C>(mut self, classifier: C) -> Self
    where
        C: Fn(&CrosscheckError) -> bool + Send + Sync + 'static,
    {
        self.classifier = Some(Arc::new(classifier));
        self
    }

    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    fn is_retryable(&self, err: &CrosscheckError) -> bool {
        match &self.classifier {
            Some(classify) => classify(err),
            None => err.is_retryable(),
        }
    }

    /// Delay before the retry following `attempt` (1-based), raised to any
    /// retry-after hint the failure carries.
    fn delay_for(&self, attempt: u32, err: &CrosscheckError) -> Duration {
        let base = self.config.base_delay_ms as f64;
        let exp = self.config.multiplier.powi(attempt.saturating_sub(1) as i32);
        let mut delay_ms = (base * exp).min(self.config.max_delay_ms as f64);

        if self.config.jitter_enabled {
            // 0-10% extra, keeping the total at or below max_delay * 1.1.
            delay_ms += delay_ms * 0.1 * rand::random::<f64>();
        }

        let mut delay = Duration::from_secs_f64(delay_ms / 1000.0);
        if let Some(hint) = err.retry_after() {
            delay = delay.max(hint);
        }
        delay
    }

    /// Run `op`, retrying transient failures up to the attempt budget.
    ///
    /// The returned error is the last failure wrapped with the attempt
    /// count when the budget is exhausted, or the failure itself when it
    /// was classified non-retryable. Cancellation during a backoff sleep
    /// drops the future and never re-invokes `op`.
    pub async fn execute<T, F, Fut>(&self, operation: &str, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let max_attempts = self.config.max_attempts.max(1);
        let mut attempt = 1u32;

        loop {
            debug!(operation, attempt, max_attempts, "attempting operation");
            match op().await {
                Ok(value) => {
                    if attempt > 1 {
                        info!(operation, attempt, "operation succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(err) => {
                    if !self.is_retryable(&err) {
                        warn!(operation, error = %err, "non-retryable failure, not retrying");
                        return Err(err);
                    }
                    if attempt >= max_attempts {
                        warn!(operation, attempts = attempt, error = %err, "retry budget exhausted");
                        return Err(CrosscheckError::RetriesExhausted {
                            operation: operation.to_string(),
                            attempts: attempt,
                            source: Box::new(err),
                        });
                    }

                    let delay = self.delay_for(attempt, &err);
                    warn!(
                        operation,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "retryable failure, backing off"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn fast_config(max_attempts: u32) -> RetryConfig {
        RetryConfig {
            max_attempts,
            base_delay_ms: 10,
            max_delay_ms: 100,
            multiplier: 2.0,
            jitter_enabled: false,
        }
    }

    fn unavailable() -> CrosscheckError {
        CrosscheckError::ServiceUnavailable {
            detail: "503".to_string(),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_permanent_failure_invoked_exactly_max_attempts_times() {
        let policy = RetryPolicy::new(fast_config(4));
        let calls = Arc::new(AtomicU32::new(0));
        let calls_clone = Arc::clone(&calls);

        let result: Result<()> = policy
            .execute("always-fails", move || {
                let calls = Arc::clone(&calls_clone);
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err(unavailable())
                }
            })
            .await;

        assert_eq!(calls.load(Ordering::SeqCst), 4);
        match result.unwrap_err() {
            CrosscheckError::RetriesExhausted {
                attempts, source, ..
            } => {
                assert_eq!(attempts, 4);
                assert!(matches!(
                    *source,
                    CrosscheckError::ServiceUnavailable { .. }
                ));
            }
            other => panic!("expected RetriesExhausted, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_non_retryable_invoked_once() {
        let policy = RetryPolicy::new(fast_config(5));
        let calls = Arc::new(AtomicU32::new(0));
        let calls_clone = Arc::clone(&calls);

        let result: Result<()> = policy
            .execute("auth", move || {
                let calls = Arc::clone(&calls_clone);
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err(CrosscheckError::AuthenticationFailed {
                        detail: "bad key".to_string(),
                    })
                }
            })
            .await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(matches!(
            result.unwrap_err(),
            CrosscheckError::AuthenticationFailed { .. }
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_succeeds_after_transient_failures() {
        let policy = RetryPolicy::new(fast_config(3));
        let calls = Arc::new(AtomicU32::new(0));
        let calls_clone = Arc::clone(&calls);

        let result = policy
            .execute("flaky", move || {
                let calls = Arc::clone(&calls_clone);
                async move {
                    if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                        Err(unavailable())
                    } else {
                        Ok(42u32)
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_single_attempt_budget_means_no_retry() {
        let policy = RetryPolicy::new(fast_config(1));
        let calls = Arc::new(AtomicU32::new(0));
        let calls_clone = Arc::clone(&calls);

        let result: Result<()> = policy
            .execute("one-shot", move || {
                let calls = Arc::clone(&calls_clone);
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err(unavailable())
                }
            })
            .await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(matches!(
            result.unwrap_err(),
            CrosscheckError::RetriesExhausted { attempts: 1, .. }
        ));
    }

    #[tokio::test]
    async fn test_custom_classifier_overrides_default() {
        // Timeout is retryable by default; the classifier forbids it.
        let policy =
            RetryPolicy::new(fast_config(5)).with_classifier(|err| !matches!(err, CrosscheckError::Timeout { .. }));
        let calls = Arc::new(AtomicU32::new(0));
        let calls_clone = Arc::clone(&calls);

        let result: Result<()> = policy
            .execute("timeouts", move || {
                let calls = Arc::clone(&calls_clone);
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err(CrosscheckError::Timeout { elapsed_ms: 10 })
                }
            })
            .await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(matches!(
            result.unwrap_err(),
            CrosscheckError::Timeout { .. }
        ));
    }

    #[test]
    fn test_delay_caps_at_max_without_jitter() {
        let policy = RetryPolicy::new(fast_config(10));
        let delay = policy.delay_for(9, &unavailable());
        assert_eq!(delay, Duration::from_millis(100));
    }

    #[test]
    fn test_jitter_stays_within_ten_percent_of_cap() {
        let mut config = fast_config(10);
        config.jitter_enabled = true;
        let policy = RetryPolicy::new(config);
        for _ in 0..100 {
            let delay = policy.delay_for(9, &unavailable());
            assert!(delay >= Duration::from_millis(100));
            assert!(delay <= Duration::from_millis(110));
        }
    }

    #[test]
    fn test_retry_after_hint_raises_delay() {
        let policy = RetryPolicy::new(fast_config(5));
        let err = CrosscheckError::RateLimitExceeded {
            key: "api".to_string(),
            retry_after: Some(Duration::from_secs(3)),
        };
        let delay = policy.delay_for(1, &err);
        assert!(delay >= Duration::from_secs(3));
    }
}
