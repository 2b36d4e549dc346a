//! Model provider abstraction.
//!
//! A [`ModelProvider`] is a single completion backend (remote API, local
//! runtime). Implementations report their own availability and surface
//! failures as [`CrosscheckError`] variants so the resilience stack can
//! classify them; they never retry internally.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// One completion call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionRequest {
    pub prompt: String,
    pub max_tokens: u32,
    pub temperature: f64,
}

impl CompletionRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            max_tokens: 2048,
            temperature: 0.2,
        }
    }
}

/// A completion backend.
#[async_trait]
pub trait ModelProvider: Send + Sync {
    /// Stable name, used as rate-limit key and breaker name.
    fn name(&self) -> &str;

    /// Cheap liveness hint. An unavailable provider is skipped without
    /// consuming tokens or touching its breaker.
    async fn available(&self) -> bool;

    /// Run one completion. Must classify failures (rate limit, timeout,
    /// auth) into the matching error variant where the backend exposes
    /// enough detail.
    async fn complete(&self, request: &CompletionRequest) -> Result<String>;
}
