//! Error taxonomy for crosscheck.
//!
//! Every error carries an [`ErrorKind`] tag so callers (most importantly
//! the retry policy) classify by kind rather than by concrete type
//! identity. The tag also serializes cleanly into status records crossing
//! process boundaries.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Classified error kinds, stable across process boundaries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Provider or local bucket rejected the call for quota reasons.
    RateLimitExceeded,
    /// Dependency is temporarily down or overloaded.
    ServiceUnavailable,
    /// The call exceeded its deadline.
    Timeout,
    /// Credentials were rejected; retrying cannot help.
    AuthenticationFailed,
    /// A circuit breaker refused the call without invoking the operation.
    BreakerOpen,
    /// Every configured provider was unavailable or failed.
    NoProviderAvailable,
    /// The run was cancelled by the caller.
    Cancelled,
    /// Merging partial results into an aggregate failed.
    AggregationFailed,
    /// The check request was malformed and the run never started.
    InvalidRequest,
    /// Provider-specific failure not covered above.
    Provider,
    /// Backing store failure.
    Storage,
}

impl ErrorKind {
    /// Whether a failure of this kind is worth retrying after backoff.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ErrorKind::RateLimitExceeded | ErrorKind::ServiceUnavailable | ErrorKind::Timeout
        )
    }
}

/// Errors produced across the orchestration layer.
#[derive(Debug, thiserror::Error)]
pub enum CrosscheckError {
    #[error("rate limit exceeded for key '{key}'")]
    RateLimitExceeded {
        key: String,
        /// Hint for when a retry may succeed, if the limiter can tell.
        retry_after: Option<Duration>,
    },

    #[error("service unavailable: {detail}")]
    ServiceUnavailable { detail: String },

    #[error("operation timed out after {elapsed_ms}ms")]
    Timeout { elapsed_ms: u64 },

    #[error("authentication failed: {detail}")]
    AuthenticationFailed { detail: String },

    #[error("circuit breaker '{name}' is open, failing fast")]
    BreakerOpen { name: String },

    #[error("no model provider available for '{operation}'")]
    NoProviderAvailable { operation: String },

    #[error("operation cancelled")]
    Cancelled,

    #[error("aggregation failed for check '{check_id}': {detail}")]
    AggregationFailed { check_id: String, detail: String },

    #[error("invalid check request: {detail}")]
    InvalidRequest { detail: String },

    #[error("provider '{provider}' failed: {detail}")]
    Provider {
        provider: String,
        detail: String,
        retryable: bool,
    },

    #[error("operation '{operation}' failed after {attempts} attempt(s): {source}")]
    RetriesExhausted {
        operation: String,
        attempts: u32,
        #[source]
        source: Box<CrosscheckError>,
    },

    #[error("storage error: {0}")]
    Storage(#[from] keyed_store::StoreError),
}

impl CrosscheckError {
    /// The classified kind of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            CrosscheckError::RateLimitExceeded { .. } => ErrorKind::RateLimitExceeded,
            CrosscheckError::ServiceUnavailable { .. } => ErrorKind::ServiceUnavailable,
            CrosscheckError::Timeout { .. } => ErrorKind::Timeout,
            CrosscheckError::AuthenticationFailed { .. } => ErrorKind::AuthenticationFailed,
            CrosscheckError::BreakerOpen { .. } => ErrorKind::BreakerOpen,
            CrosscheckError::NoProviderAvailable { .. } => ErrorKind::NoProviderAvailable,
            CrosscheckError::Cancelled => ErrorKind::Cancelled,
            CrosscheckError::AggregationFailed { .. } => ErrorKind::AggregationFailed,
            CrosscheckError::InvalidRequest { .. } => ErrorKind::InvalidRequest,
            CrosscheckError::Provider { .. } => ErrorKind::Provider,
            CrosscheckError::RetriesExhausted { source, .. } => source.kind(),
            CrosscheckError::Storage(_) => ErrorKind::Storage,
        }
    }

    /// Whether this error should be retried (kind-based, with the
    /// provider-specific override honoured).
    pub fn is_retryable(&self) -> bool {
        match self {
            CrosscheckError::Provider { retryable, .. } => *retryable,
            // Exhausted retries are terminal regardless of the inner kind.
            CrosscheckError::RetriesExhausted { .. } => false,
            other => other.kind().is_retryable(),
        }
    }

    /// The retry-after hint, when the failure carries one.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            CrosscheckError::RateLimitExceeded { retry_after, .. } => *retry_after,
            _ => None,
        }
    }
}

/// Result type for crosscheck operations.
pub type Result<T> = std::result::Result<T, CrosscheckError>;
