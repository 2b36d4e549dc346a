//! Analysis orchestrator: fan-out, aggregation, caching, cancellation.
//!
//! `submit_check` validates the request, consults the result cache, then
//! spawns a driver task that fans one checker task per requested check
//! type into a `JoinSet`, merges the partials into an [`AggregateResult`]
//! and caches it under the subject fingerprint. A failing checker yields a
//! failed partial, never an aborted run; only start-up failures (malformed
//! request, unregistered check type) are fatal. At most one run per
//! fingerprint is in flight: duplicate submissions join the existing run
//! and receive its id.
//!
//! Status and result maps are injected [`KeyedStore`]s, so callers choose
//! the backing (the in-memory sharded store by default).

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use tokio::sync::{Mutex, Notify};
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use keyed_store::KeyedStore;

use crate::checker::ConsistencyChecker;
use crate::config::OrchestratorConfig;
use crate::error::{CrosscheckError, ErrorKind, Result};
use crate::model::{
    AggregateResult, CheckId, CheckPhase, CheckRequest, CheckStatus, CheckType, PartialResult,
    PartialStatus, SubjectFingerprint,
};

struct InFlight {
    check_id: CheckId,
    cancel: Arc<Notify>,
}

#[derive(Default)]
struct Counters {
    submitted: AtomicU64,
    cache_hits: AtomicU64,
    joined: AtomicU64,
    completed: AtomicU64,
    failed: AtomicU64,
    partials_passed: AtomicU64,
    partials_failed: AtomicU64,
}

/// Cumulative orchestrator counters since construction.
#[derive(Debug, Clone, Serialize)]
pub struct OrchestratorStats {
    /// Submissions that started a fresh run.
    pub submitted: u64,
    /// Submissions served from the result cache.
    pub cache_hits: u64,
    /// Submissions that joined an already in-flight run.
    pub joined: u64,
    pub completed: u64,
    pub failed: u64,
    pub partials_passed: u64,
    pub partials_failed: u64,
}

struct Inner {
    config: OrchestratorConfig,
    checkers: BTreeMap<CheckType, Arc<dyn ConsistencyChecker>>,
    status_store: Arc<dyn KeyedStore<CheckStatus>>,
    result_store: Arc<dyn KeyedStore<AggregateResult>>,
    in_flight: Mutex<HashMap<String, InFlight>>,
    counters: Counters,
}

/// Orchestrates consistency check runs over registered checkers.
///
/// Cheap to clone; clones share all state, so driver tasks spawned by one
/// handle are observable through any other.
#[derive(Clone)]
pub struct AnalysisOrchestrator {
    inner: Arc<Inner>,
}

impl AnalysisOrchestrator {
    /// Build an orchestrator over the given checkers. Each checker serves
    /// the check type it reports; registering two checkers for one type is
    /// a caller bug and the later one wins.
    pub fn new(
        config: OrchestratorConfig,
        checkers: Vec<Arc<dyn ConsistencyChecker>>,
        status_store: Arc<dyn KeyedStore<CheckStatus>>,
        result_store: Arc<dyn KeyedStore<AggregateResult>>,
    ) -> Self {
        let checkers = checkers
            .into_iter()
            .map(|c| (c.check_type(), c))
            .collect::<BTreeMap<_, _>>();
        Self {
            inner: Arc::new(Inner {
                config,
                checkers,
                status_store,
                result_store,
                in_flight: Mutex::new(HashMap::new()),
                counters: Counters::default(),
            }),
        }
    }

    /// Submit a check run. Returns immediately with the run's id; progress
    /// is observable through [`get_status`](Self::get_status).
    ///
    /// A valid cached aggregate (when the request allows caching) completes
    /// the run without any fan-out. A submission whose subjects match an
    /// in-flight run joins that run instead of starting another.
    pub async fn submit_check(&self, request: CheckRequest) -> Result<CheckId> {
        let inner = &self.inner;
        inner.validate(&request)?;
        let fingerprint = request.fingerprint();

        if request.use_cache {
            if let Some(cached) = inner.result_store.get(fingerprint.as_str()).await? {
                if cached.is_valid_at(Utc::now()) {
                    let check_id = CheckId::generate(&fingerprint);
                    info!(check_id = %check_id, fingerprint = %fingerprint, "served from cache");
                    inner.counters.cache_hits.fetch_add(1, Ordering::Relaxed);
                    inner
                        .status_store
                        .put(
                            check_id.as_str(),
                            CheckStatus::new(check_id.clone(), CheckPhase::Completed),
                        )
                        .await?;
                    return Ok(check_id);
                }
            }
        }

        let (check_id, cancel) = {
            let mut in_flight = inner.in_flight.lock().await;
            if let Some(existing) = in_flight.get(fingerprint.as_str()) {
                info!(
                    check_id = %existing.check_id,
                    fingerprint = %fingerprint,
                    "joining in-flight run"
                );
                inner.counters.joined.fetch_add(1, Ordering::Relaxed);
                return Ok(existing.check_id.clone());
            }
            let check_id = CheckId::generate(&fingerprint);
            let cancel = Arc::new(Notify::new());
            in_flight.insert(
                fingerprint.as_str().to_string(),
                InFlight {
                    check_id: check_id.clone(),
                    cancel: Arc::clone(&cancel),
                },
            );
            (check_id, cancel)
        };

        inner.counters.submitted.fetch_add(1, Ordering::Relaxed);
        inner
            .status_store
            .put(
                check_id.as_str(),
                CheckStatus::new(check_id.clone(), CheckPhase::Started),
            )
            .await?;
        info!(check_id = %check_id, fingerprint = %fingerprint, "check submitted");

        let driver = Arc::clone(inner);
        let driver_id = check_id.clone();
        tokio::spawn(async move {
            driver.drive(driver_id, fingerprint, request, cancel).await;
        });

        Ok(check_id)
    }

    /// Request cancellation of an in-flight run. Returns whether a run
    /// with this id was in flight. Terminal runs are unaffected.
    pub async fn cancel_check(&self, check_id: &CheckId) -> bool {
        let in_flight = self.inner.in_flight.lock().await;
        for entry in in_flight.values() {
            if entry.check_id == *check_id {
                info!(check_id = %check_id, "cancellation requested");
                entry.cancel.notify_one();
                return true;
            }
        }
        false
    }

    /// Current status of a run, if the id is known.
    pub async fn get_status(&self, check_id: &CheckId) -> Result<Option<CheckStatus>> {
        Ok(self.inner.status_store.get(check_id.as_str()).await?)
    }

    /// The aggregate result for a run, once COMPLETED. Resolves through
    /// the subject fingerprint embedded in the id, so ids minted by cache
    /// hits and joined submissions all see the same aggregate.
    pub async fn get_result(&self, check_id: &CheckId) -> Result<Option<AggregateResult>> {
        match check_id.fingerprint_part() {
            Some(fingerprint) => Ok(self.inner.result_store.get(fingerprint).await?),
            None => Ok(None),
        }
    }

    /// Evict the cached aggregate for the given subjects, forcing the next
    /// submission to fan out fresh. TTL expiry remains the backstop.
    pub async fn invalidate_subjects(
        &self,
        subject_keys: &BTreeMap<String, String>,
    ) -> Result<bool> {
        let fingerprint = SubjectFingerprint::from_subjects(subject_keys);
        let removed = self.inner.result_store.delete(fingerprint.as_str()).await?;
        if removed {
            info!(fingerprint = %fingerprint, "cache entry invalidated");
        }
        Ok(removed)
    }

    /// Drop every cached aggregate.
    pub async fn clear_cache(&self) -> Result<usize> {
        let keys = self.inner.result_store.list_keys().await?;
        let mut removed = 0;
        for key in keys {
            if self.inner.result_store.delete(&key).await? {
                removed += 1;
            }
        }
        info!(removed, "result cache cleared");
        Ok(removed)
    }

    pub fn statistics(&self) -> OrchestratorStats {
        let counters = &self.inner.counters;
        OrchestratorStats {
            submitted: counters.submitted.load(Ordering::Relaxed),
            cache_hits: counters.cache_hits.load(Ordering::Relaxed),
            joined: counters.joined.load(Ordering::Relaxed),
            completed: counters.completed.load(Ordering::Relaxed),
            failed: counters.failed.load(Ordering::Relaxed),
            partials_passed: counters.partials_passed.load(Ordering::Relaxed),
            partials_failed: counters.partials_failed.load(Ordering::Relaxed),
        }
    }
}

impl Inner {
    fn validate(&self, request: &CheckRequest) -> Result<()> {
        if request.subject_keys.is_empty() {
            return Err(CrosscheckError::InvalidRequest {
                detail: "no subjects given".to_string(),
            });
        }
        if request.check_types.is_empty() {
            return Err(CrosscheckError::InvalidRequest {
                detail: "no check types requested".to_string(),
            });
        }
        for check_type in &request.check_types {
            if !self.checkers.contains_key(check_type) {
                return Err(CrosscheckError::InvalidRequest {
                    detail: format!("no checker registered for '{}'", check_type.label()),
                });
            }
        }
        Ok(())
    }

    /// Driver for one run: fan out, collect, aggregate, cache.
    async fn drive(
        &self,
        check_id: CheckId,
        fingerprint: SubjectFingerprint,
        request: CheckRequest,
        cancel: Arc<Notify>,
    ) {
        let started_at = Utc::now();
        self.set_status(CheckStatus::new(check_id.clone(), CheckPhase::Running))
            .await;

        let shared_request = Arc::new(request);
        let mut join_set: JoinSet<(CheckType, PartialResult)> = JoinSet::new();
        for check_type in shared_request.check_types.iter().copied() {
            // Validated at submission; a missing checker here is a bug.
            let Some(checker) = self.checkers.get(&check_type).cloned() else {
                continue;
            };
            let task_request = Arc::clone(&shared_request);
            let task_id = check_id.clone();
            join_set.spawn(async move {
                let started = Instant::now();
                let partial = match checker.check(&task_request, &task_id).await {
                    Ok(payload) => PartialResult::passed(
                        check_type,
                        payload,
                        started.elapsed().as_millis() as u64,
                    ),
                    Err(err) => {
                        warn!(
                            check_id = %task_id,
                            check_type = check_type.label(),
                            error = %err,
                            "checker failed"
                        );
                        PartialResult::failed(
                            check_type,
                            err.to_string(),
                            started.elapsed().as_millis() as u64,
                        )
                    }
                };
                (check_type, partial)
            });
        }

        let mut pending: BTreeSet<CheckType> =
            shared_request.check_types.iter().copied().collect();
        let mut partials: BTreeMap<CheckType, PartialResult> = BTreeMap::new();
        let cancelled = loop {
            tokio::select! {
                _ = cancel.notified() => {
                    join_set.abort_all();
                    break true;
                }
                next = join_set.join_next() => match next {
                    Some(Ok((check_type, partial))) => {
                        debug!(
                            check_id = %check_id,
                            check_type = check_type.label(),
                            elapsed_ms = partial.processing_time_ms,
                            "partial collected"
                        );
                        pending.remove(&check_type);
                        partials.insert(check_type, partial);
                    }
                    Some(Err(join_err)) => {
                        error!(check_id = %check_id, error = %join_err, "checker task aborted");
                    }
                    None => break false,
                }
            }
        };

        if cancelled {
            warn!(check_id = %check_id, "run cancelled");
            self.counters.failed.fetch_add(1, Ordering::Relaxed);
            // Remove from in-flight before the terminal status lands, so a
            // submission observing the terminal state never joins a dead run.
            self.remove_in_flight(&fingerprint).await;
            self.set_status(CheckStatus::failed(
                check_id.clone(),
                ErrorKind::Cancelled,
                "cancelled by caller",
            ))
            .await;
            return;
        }

        // A panicked task leaves its type pending; record it as a failed
        // partial so the aggregate stays complete.
        for check_type in pending {
            partials.insert(
                check_type,
                PartialResult::failed(check_type, "checker task panicked", 0),
            );
        }

        self.set_status(CheckStatus::new(check_id.clone(), CheckPhase::Aggregating))
            .await;

        let passed = partials
            .values()
            .filter(|p| p.status == PartialStatus::Passed)
            .count();
        let failed = partials.len() - passed;
        self.counters
            .partials_passed
            .fetch_add(passed as u64, Ordering::Relaxed);
        self.counters
            .partials_failed
            .fetch_add(failed as u64, Ordering::Relaxed);

        let overall_score = if partials.is_empty() {
            0.0
        } else {
            passed as f64 / partials.len() as f64 * 100.0
        };
        let completed_at = Utc::now();
        let aggregate = AggregateResult {
            check_id: check_id.clone(),
            subject_keys: shared_request.subject_keys.clone(),
            started_at,
            completed_at,
            overall_score,
            partial_results: partials,
            cache_valid_until: completed_at + self.config.cache_ttl(),
        };

        let outcome = self.result_store.put(fingerprint.as_str(), aggregate).await;
        self.remove_in_flight(&fingerprint).await;
        match outcome {
            Ok(()) => {
                info!(
                    check_id = %check_id,
                    overall_score,
                    passed,
                    failed,
                    "run completed"
                );
                self.counters.completed.fetch_add(1, Ordering::Relaxed);
                self.set_status(CheckStatus::new(check_id.clone(), CheckPhase::Completed))
                    .await;
            }
            Err(err) => {
                error!(check_id = %check_id, error = %err, "failed to store aggregate");
                self.counters.failed.fetch_add(1, Ordering::Relaxed);
                self.set_status(CheckStatus::failed(
                    check_id.clone(),
                    ErrorKind::AggregationFailed,
                    format!("could not store aggregate: {err}"),
                ))
                .await;
            }
        }
    }

    /// Best-effort status write; a failing status store must not take the
    /// run down with it.
    async fn set_status(&self, status: CheckStatus) {
        let key = status.check_id.as_str().to_string();
        if let Err(err) = self.status_store.put(&key, status).await {
            error!(error = %err, "failed to persist status");
        }
    }

    async fn remove_in_flight(&self, fingerprint: &SubjectFingerprint) {
        self.in_flight.lock().await.remove(fingerprint.as_str());
    }
}
