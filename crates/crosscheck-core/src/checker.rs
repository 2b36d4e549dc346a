//! Checker seam between the orchestrator and analysis backends.
//!
//! A [`ConsistencyChecker`] runs one check type over a request's subjects
//! and returns opaque structured findings. The orchestrator never knows
//! whether a checker is rule-based or model-backed.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use crate::error::Result;
use crate::gateway::ProviderGateway;
use crate::model::{CheckId, CheckRequest, CheckType};
use crate::provider::CompletionRequest;

/// One analysis backend for one check type.
#[async_trait]
pub trait ConsistencyChecker: Send + Sync {
    /// The check type this checker serves.
    fn check_type(&self) -> CheckType;

    /// Run the check. A returned error marks this partial as failed but
    /// never aborts the surrounding run.
    async fn check(&self, request: &CheckRequest, check_id: &CheckId) -> Result<serde_json::Value>;
}

type PromptFn = Arc<dyn Fn(&CheckRequest) -> String + Send + Sync>;

/// Checker that delegates the analysis to a model provider gateway.
///
/// The prompt is injected so callers own the prompt text; the response is
/// parsed as JSON when possible and wrapped as a raw analysis string
/// otherwise.
pub struct ModelBackedChecker {
    check_type: CheckType,
    gateway: Arc<ProviderGateway>,
    prompt: PromptFn,
    max_tokens: u32,
    temperature: f64,
}

impl ModelBackedChecker {
    pub fn new<P>(check_type: CheckType, gateway: Arc<ProviderGateway>, prompt: P) -> Self
    where
        P: Fn(&CheckRequest) -> String + Send + Sync + 'static,
    {
        Self {
            check_type,
            gateway,
            prompt: Arc::new(prompt),
            max_tokens: 2048,
            temperature: 0.2,
        }
    }
}

#[async_trait]
impl ConsistencyChecker for ModelBackedChecker {
    fn check_type(&self) -> CheckType {
        self.check_type
    }

    async fn check(&self, request: &CheckRequest, check_id: &CheckId) -> Result<serde_json::Value> {
        let completion = CompletionRequest {
            prompt: (self.prompt)(request),
            max_tokens: self.max_tokens,
            temperature: self.temperature,
        };
        let text = self
            .gateway
            .complete(self.check_type.label(), &completion)
            .await?;
        debug!(check_id = %check_id, check_type = self.check_type.label(), "model response received");
        Ok(parse_findings(&text))
    }
}

/// Model output is JSON when the provider cooperates; anything else is
/// kept verbatim under an `analysis` field.
fn parse_findings(text: &str) -> serde_json::Value {
    serde_json::from_str(text.trim())
        .unwrap_or_else(|_| serde_json::json!({ "analysis": text }))
}
