//! Three-state circuit breaker for unreliable dependencies.
//!
//! One instance guards one dependency. State transitions:
//! - CLOSED: calls run normally; `failure_threshold` consecutive failures
//!   open the breaker.
//! - OPEN: calls fail fast with [`CrosscheckError::BreakerOpen`] until
//!   `reset_timeout` has elapsed since the last failure, then the next
//!   call is admitted as a HALF_OPEN probe.
//! - HALF_OPEN: `success_threshold` consecutive successes close the
//!   breaker; any failure reopens it immediately.
//!
//! The state machine lives behind a per-instance async mutex; the guarded
//! operation itself always runs outside the lock, so a slow dependency
//! never blocks state inspection or other callers' admission checks.

use std::future::Future;

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::BreakerConfig;
use crate::error::{CrosscheckError, Result};

/// Breaker states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakerState {
    /// Normal operation.
    Closed,
    /// Fail fast.
    Open,
    /// Testing recovery.
    HalfOpen,
}

#[derive(Debug)]
struct BreakerInner {
    state: BreakerState,
    consecutive_failures: u32,
    consecutive_successes: u32,
    last_failure_at: Option<Instant>,
}

/// Point-in-time view of a breaker's state.
#[derive(Debug, Clone, Serialize)]
pub struct BreakerSnapshot {
    pub name: String,
    pub state: BreakerState,
    pub consecutive_failures: u32,
    pub consecutive_successes: u32,
    /// Milliseconds since the last recorded failure, if any.
    pub time_since_last_failure_ms: Option<u64>,
}

/// Per-dependency circuit breaker.
pub struct CircuitBreaker {
    name: String,
    config: BreakerConfig,
    inner: Mutex<BreakerInner>,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: BreakerConfig) -> Self {
        let name = name.into();
        debug!(
            breaker = %name,
            failure_threshold = config.failure_threshold,
            reset_timeout_ms = config.reset_timeout_ms,
            success_threshold = config.success_threshold,
            "circuit breaker created"
        );
        Self {
            name,
            config,
            inner: Mutex::new(BreakerInner {
                state: BreakerState::Closed,
                consecutive_failures: 0,
                consecutive_successes: 0,
                last_failure_at: None,
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Run `op` under breaker protection.
    ///
    /// Fails fast with [`CrosscheckError::BreakerOpen`] (without invoking
    /// `op`) while the breaker is open; otherwise runs the operation and
    /// records its outcome against the state under which it was admitted.
    pub async fn execute<T, F, Fut>(&self, op: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let admitted = self.admit().await?;
        match op().await {
            Ok(value) => {
                self.record_success(admitted).await;
                Ok(value)
            }
            Err(err) => {
                self.record_failure(admitted).await;
                Err(err)
            }
        }
    }

    /// Decide whether a call may proceed, transitioning OPEN -> HALF_OPEN
    /// when the reset timeout has elapsed. Returns the admitting state.
    async fn admit(&self) -> Result<BreakerState> {
        let mut inner = self.inner.lock().await;
        match inner.state {
            BreakerState::Closed => Ok(BreakerState::Closed),
            BreakerState::HalfOpen => Ok(BreakerState::HalfOpen),
            BreakerState::Open => {
                let elapsed = inner.last_failure_at.map(|at| at.elapsed());
                let ready = elapsed
                    .map(|e| e >= self.config.reset_timeout())
                    .unwrap_or(true);
                if ready {
                    info!(breaker = %self.name, "transitioning from open to half-open");
                    inner.state = BreakerState::HalfOpen;
                    inner.consecutive_successes = 0;
                    Ok(BreakerState::HalfOpen)
                } else {
                    warn!(breaker = %self.name, "breaker open, failing fast");
                    Err(CrosscheckError::BreakerOpen {
                        name: self.name.clone(),
                    })
                }
            }
        }
    }

    async fn record_success(&self, admitted: BreakerState) {
        let mut inner = self.inner.lock().await;
        match admitted {
            BreakerState::Closed | BreakerState::Open => {
                inner.consecutive_failures = 0;
            }
            BreakerState::HalfOpen => {
                // A concurrent probe failure may already have reopened us;
                // a stale success must not close the breaker then.
                if inner.state != BreakerState::HalfOpen {
                    return;
                }
                inner.consecutive_successes += 1;
                if inner.consecutive_successes >= self.config.success_threshold {
                    info!(
                        breaker = %self.name,
                        successes = inner.consecutive_successes,
                        "closing after successful probes"
                    );
                    inner.state = BreakerState::Closed;
                    inner.consecutive_failures = 0;
                    inner.consecutive_successes = 0;
                }
            }
        }
    }

    async fn record_failure(&self, admitted: BreakerState) {
        let mut inner = self.inner.lock().await;
        inner.last_failure_at = Some(Instant::now());
        match admitted {
            BreakerState::Closed | BreakerState::Open => {
                inner.consecutive_failures += 1;
                if inner.consecutive_failures >= self.config.failure_threshold
                    && inner.state == BreakerState::Closed
                {
                    warn!(
                        breaker = %self.name,
                        failures = inner.consecutive_failures,
                        "failure threshold reached, opening"
                    );
                    inner.state = BreakerState::Open;
                }
            }
            BreakerState::HalfOpen => {
                warn!(breaker = %self.name, "probe failed, reopening");
                inner.state = BreakerState::Open;
                inner.consecutive_successes = 0;
            }
        }
    }

    /// Current state (point-in-time, no transition side effects).
    pub async fn state(&self) -> BreakerState {
        self.inner.lock().await.state
    }

    /// Full state snapshot for observability.
    pub async fn snapshot(&self) -> BreakerSnapshot {
        let inner = self.inner.lock().await;
        BreakerSnapshot {
            name: self.name.clone(),
            state: inner.state,
            consecutive_failures: inner.consecutive_failures,
            consecutive_successes: inner.consecutive_successes,
            time_since_last_failure_ms: inner
                .last_failure_at
                .map(|at| at.elapsed().as_millis() as u64),
        }
    }
}
