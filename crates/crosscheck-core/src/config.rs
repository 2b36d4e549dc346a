//! Configuration for the orchestration layer.
//!
//! Plain structs with sensible defaults and an explicit `validate()` step
//! at construction time. Configuration is immutable once validated and is
//! shared by reference across invocations.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Errors produced by configuration validation.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("retry.max_attempts must be at least 1")]
    ZeroAttempts,

    #[error("retry.multiplier must be at least 1.0 (got {0})")]
    MultiplierTooSmall(f64),

    #[error("retry.max_delay_ms ({max}) must not be below base_delay_ms ({base})")]
    DelayRangeInverted { base: u64, max: u64 },

    #[error("breaker.failure_threshold must be at least 1")]
    ZeroFailureThreshold,

    #[error("breaker.success_threshold must be at least 1")]
    ZeroSuccessThreshold,

    #[error("rate_limiter.capacity must be positive (got {0})")]
    NonPositiveCapacity(f64),

    #[error("rate_limiter.refill_rate_per_sec must be positive (got {0})")]
    NonPositiveRefillRate(f64),
}

/// Retry policy configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RetryConfig {
    /// Total attempt budget (1 = run once, never retry).
    pub max_attempts: u32,
    /// Base delay before the first retry (milliseconds).
    pub base_delay_ms: u64,
    /// Upper bound on any computed delay (milliseconds).
    pub max_delay_ms: u64,
    /// Exponential growth factor applied per attempt.
    pub multiplier: f64,
    /// Add 0-10% random jitter to each delay.
    pub jitter_enabled: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 500,
            max_delay_ms: 30_000,
            multiplier: 2.0,
            jitter_enabled: true,
        }
    }
}

impl RetryConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_attempts == 0 {
            return Err(ConfigError::ZeroAttempts);
        }
        if self.multiplier < 1.0 {
            return Err(ConfigError::MultiplierTooSmall(self.multiplier));
        }
        if self.max_delay_ms < self.base_delay_ms {
            return Err(ConfigError::DelayRangeInverted {
                base: self.base_delay_ms,
                max: self.max_delay_ms,
            });
        }
        Ok(())
    }

    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }
}

/// Circuit breaker configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BreakerConfig {
    /// Consecutive failures in CLOSED before the breaker opens.
    pub failure_threshold: u32,
    /// How long the breaker stays OPEN before allowing a probe (milliseconds).
    pub reset_timeout_ms: u64,
    /// Consecutive successes in HALF_OPEN before the breaker closes.
    pub success_threshold: u32,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            reset_timeout_ms: 60_000,
            success_threshold: 3,
        }
    }
}

impl BreakerConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.failure_threshold == 0 {
            return Err(ConfigError::ZeroFailureThreshold);
        }
        if self.success_threshold == 0 {
            return Err(ConfigError::ZeroSuccessThreshold);
        }
        Ok(())
    }

    pub fn reset_timeout(&self) -> Duration {
        Duration::from_millis(self.reset_timeout_ms)
    }
}

/// Token-bucket rate limiter configuration (applied per key).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RateLimitConfig {
    /// Maximum tokens a bucket can hold (burst size).
    pub capacity: f64,
    /// Tokens replenished per second.
    pub refill_rate_per_sec: f64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            capacity: 10.0,
            refill_rate_per_sec: 1.0,
        }
    }
}

impl RateLimitConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.capacity <= 0.0 {
            return Err(ConfigError::NonPositiveCapacity(self.capacity));
        }
        if self.refill_rate_per_sec <= 0.0 {
            return Err(ConfigError::NonPositiveRefillRate(self.refill_rate_per_sec));
        }
        Ok(())
    }
}

/// Orchestrator-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OrchestratorConfig {
    /// How long a cached aggregate result stays valid. Zero disables
    /// cache serving entirely.
    pub cache_ttl_hours: u64,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            cache_ttl_hours: 24,
        }
    }
}

impl OrchestratorConfig {
    pub fn cache_ttl(&self) -> chrono::Duration {
        chrono::Duration::hours(self.cache_ttl_hours as i64)
    }
}
