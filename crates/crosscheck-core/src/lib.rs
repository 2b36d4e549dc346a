//! Crosscheck Core Library
//!
//! Orchestration layer for consistency analysis over unreliable model
//! providers: resilience primitives (retry, circuit breaker, rate
//! limiter), an ordered-fallback provider gateway, the analysis
//! orchestrator, and the security test generation dispatcher.

pub mod breaker;
pub mod checker;
pub mod config;
pub mod error;
pub mod gateway;
pub mod model;
pub mod orchestrator;
pub mod provider;
pub mod rate_limit;
pub mod retry;
pub mod telemetry;
pub mod testgen;

pub use breaker::{BreakerSnapshot, BreakerState, CircuitBreaker};
pub use checker::{ConsistencyChecker, ModelBackedChecker};
pub use config::{
    BreakerConfig, ConfigError, OrchestratorConfig, RateLimitConfig, RetryConfig,
};
pub use error::{CrosscheckError, ErrorKind, Result};
pub use gateway::{GatewayConfig, ProviderGateway, ProviderMetrics};
pub use model::{
    AggregateResult, CheckId, CheckPhase, CheckRequest, CheckStatus, CheckType, PartialResult,
    PartialStatus, SubjectFingerprint, ValidationLevel,
};
pub use orchestrator::{AnalysisOrchestrator, OrchestratorStats};
pub use provider::{CompletionRequest, ModelProvider};
pub use rate_limit::{BucketStatus, RateLimiter};
pub use retry::RetryPolicy;
pub use telemetry::init_tracing;
pub use testgen::{
    CategoryTestGenerator, SecurityTest, SecurityTestCategory, Severity, TemplateTestGenerator,
    TestGenRequest, TestGenerationDispatcher,
};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
