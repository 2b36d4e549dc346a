//! Data model for consistency check runs.
//!
//! - [`CheckRequest`]: immutable submission describing the subjects and
//!   requested check types.
//! - [`CheckStatus`]: per-run lifecycle record, mutated once per phase
//!   transition by the orchestrator.
//! - [`PartialResult`]: output of one checker task within a run.
//! - [`AggregateResult`]: the merged, cacheable outcome of a run.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::ErrorKind;

/// The kinds of consistency checks that can be fanned out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckType {
    /// API-specification-level consistency.
    SpecConsistency,
    /// Process-diagram-level consistency.
    ProcessConsistency,
    /// Model-generated findings cross-checked against both sources.
    ModelBased,
    /// End-to-end integration consistency across subjects.
    Integration,
}

impl CheckType {
    /// Stable lowercase label used in log lines and payload keys.
    pub fn label(&self) -> &'static str {
        match self {
            CheckType::SpecConsistency => "spec_consistency",
            CheckType::ProcessConsistency => "process_consistency",
            CheckType::ModelBased => "model_based",
            CheckType::Integration => "integration",
        }
    }
}

/// Depth of validation a caller wants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ValidationLevel {
    Basic,
    #[default]
    Standard,
    Strict,
}

/// Time-independent fingerprint of the subjects under check.
///
/// Derived from the sorted subject key/value pairs only, so repeated
/// requests for the same subjects map to the same cache entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SubjectFingerprint(String);

impl SubjectFingerprint {
    /// Compute the fingerprint of a subject-key map.
    pub fn from_subjects(subjects: &BTreeMap<String, String>) -> Self {
        let mut hasher = Sha256::new();
        for (key, value) in subjects {
            hasher.update(key.as_bytes());
            hasher.update(b"=");
            hasher.update(value.as_bytes());
            hasher.update(b";");
        }
        let digest = hex::encode(hasher.finalize());
        SubjectFingerprint(digest[..16].to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for SubjectFingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique identifier for one submitted check run.
///
/// Derived from the subject fingerprint plus submission time (with a short
/// random tail so same-millisecond submissions stay distinct).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CheckId(String);

impl CheckId {
    /// Mint a fresh id for a run over the given subjects.
    pub fn generate(fingerprint: &SubjectFingerprint) -> Self {
        let tail = uuid::Uuid::new_v4().simple().to_string();
        CheckId(format!(
            "check-{}-{}-{}",
            fingerprint.as_str(),
            Utc::now().timestamp_millis(),
            &tail[..8]
        ))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The subject-fingerprint segment embedded in this id.
    pub fn fingerprint_part(&self) -> Option<&str> {
        self.0.split('-').nth(1)
    }
}

impl std::fmt::Display for CheckId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Immutable description of a consistency check submission.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckRequest {
    /// Subjects under check, e.g. `{"api": "A1", "diagram": "D1"}`.
    pub subject_keys: BTreeMap<String, String>,
    /// Which independent checks to fan out.
    pub check_types: BTreeSet<CheckType>,
    /// Serve a valid cached aggregate instead of re-running, when present.
    pub use_cache: bool,
    /// Requested validation depth, passed through to checkers.
    pub validation_level: ValidationLevel,
}

impl CheckRequest {
    /// Build a request over the given subjects and check types.
    pub fn new(
        subject_keys: BTreeMap<String, String>,
        check_types: BTreeSet<CheckType>,
    ) -> Self {
        Self {
            subject_keys,
            check_types,
            use_cache: true,
            validation_level: ValidationLevel::default(),
        }
    }

    /// The time-independent cache key for this request's subjects.
    pub fn fingerprint(&self) -> SubjectFingerprint {
        SubjectFingerprint::from_subjects(&self.subject_keys)
    }
}

/// Lifecycle phase of a check run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckPhase {
    Started,
    Running,
    Aggregating,
    Completed,
    Failed,
}

impl CheckPhase {
    /// Terminal phases admit no further transitions.
    pub fn is_terminal(&self) -> bool {
        matches!(self, CheckPhase::Completed | CheckPhase::Failed)
    }
}

/// Per-run status record, updated once per phase transition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckStatus {
    pub check_id: CheckId,
    pub phase: CheckPhase,
    pub updated_at: DateTime<Utc>,
    /// Classified kind of the failure, for FAILED runs.
    pub error_kind: Option<ErrorKind>,
    /// Human-readable failure summary, never raw internals alone.
    pub error_detail: Option<String>,
}

impl CheckStatus {
    pub fn new(check_id: CheckId, phase: CheckPhase) -> Self {
        Self {
            check_id,
            phase,
            updated_at: Utc::now(),
            error_kind: None,
            error_detail: None,
        }
    }

    pub fn failed(check_id: CheckId, kind: ErrorKind, detail: impl Into<String>) -> Self {
        Self {
            check_id,
            phase: CheckPhase::Failed,
            updated_at: Utc::now(),
            error_kind: Some(kind),
            error_detail: Some(detail.into()),
        }
    }
}

/// Outcome of a single checker task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PartialStatus {
    Passed,
    Failed,
}

/// The output of one independent check type within a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PartialResult {
    pub check_type: CheckType,
    /// Opaque structured findings from the checker.
    pub payload: serde_json::Value,
    /// Wall-clock duration of the checker call, measured monotonically.
    pub processing_time_ms: u64,
    pub status: PartialStatus,
    /// Failure summary when `status` is `Failed`.
    pub error_detail: Option<String>,
}

impl PartialResult {
    pub fn passed(check_type: CheckType, payload: serde_json::Value, elapsed_ms: u64) -> Self {
        Self {
            check_type,
            payload,
            processing_time_ms: elapsed_ms,
            status: PartialStatus::Passed,
            error_detail: None,
        }
    }

    pub fn failed(check_type: CheckType, detail: impl Into<String>, elapsed_ms: u64) -> Self {
        Self {
            check_type,
            payload: serde_json::Value::Null,
            processing_time_ms: elapsed_ms,
            status: PartialStatus::Failed,
            error_detail: Some(detail.into()),
        }
    }
}

/// Merged outcome of a completed run, cached under the subject fingerprint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregateResult {
    pub check_id: CheckId,
    pub subject_keys: BTreeMap<String, String>,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    /// Percentage of partials that passed (0.0 - 100.0).
    pub overall_score: f64,
    /// Partial results keyed by check type, independent of completion order.
    pub partial_results: BTreeMap<CheckType, PartialResult>,
    /// Cache entry is eligible for eviction once this passes.
    pub cache_valid_until: DateTime<Utc>,
}

impl AggregateResult {
    /// Whether this cached aggregate is still servable.
    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        now < self.cache_valid_until
    }

    pub fn passed_count(&self) -> usize {
        self.partial_results
            .values()
            .filter(|p| p.status == PartialStatus::Passed)
            .count()
    }

    pub fn failed_count(&self) -> usize {
        self.partial_results
            .values()
            .filter(|p| p.status == PartialStatus::Failed)
            .count()
    }
}
