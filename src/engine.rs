//! Submission engine - conflict resolution, overload queuing, operations
//!
//! Every public operation is request-scoped: it consults the capacity
//! controller, talks to the stores, and returns a closed outcome. The only
//! background work is the periodic queue-drain sweep that commits deferred
//! submissions once capacity recovers.
//!
//! Ordering contract: the statistics cache is invalidated after the durable
//! write and before the outcome is returned, so no reader observes a cache
//! generation older than a write it happened-after.

use chrono::Utc;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::cache::TtlCache;
use crate::capacity::{CapacityController, CapacityLevel, CapacityReport, FeatureFlags};
use crate::retry::{with_retry, RetryPolicy};
use crate::stats::{StatsConfig, StatsService};
use crate::store::{NewSubmission, QueuedSubmission, SubmissionStore};
use crate::types::{
    AlmanacError, ConflictReason, RejectReason, Result, StatsReading, SubmitOutcome, UpdateOutcome,
};
use crate::verify::ProofVerifier;
use crate::weight::WeightPolicy;

/// Engine tuning
#[derive(Debug, Clone, Copy)]
pub struct EngineConfig {
    /// Queued submissions committed per drain sweep
    pub drain_batch_size: usize,
    /// How long a queued submission stays eligible for draining
    pub queue_retention: Duration,
    /// Retry schedule for transient store errors
    pub retry: RetryPolicy,
    /// Retry hint surfaced with a transient outcome
    pub transient_retry_hint_secs: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            drain_batch_size: 100,
            queue_retention: Duration::from_secs(24 * 60 * 60),
            retry: RetryPolicy::default(),
            transient_retry_hint_secs: 30,
        }
    }
}

/// What one drain sweep accomplished
#[derive(Debug, Clone, Copy, Default)]
pub struct DrainReport {
    /// Items committed to the durable store
    pub committed: u64,
    /// Items dropped: past retention, or lost their uniqueness race
    pub discarded: u64,
    /// Items put back because the store was still busy
    pub requeued: u64,
}

/// The submission and aggregation engine
pub struct SubmissionEngine {
    store: Arc<dyn SubmissionStore>,
    capacity: CapacityController,
    stats: StatsService,
    verifier: Arc<dyn ProofVerifier>,
    weight_policy: WeightPolicy,
    config: EngineConfig,
}

impl SubmissionEngine {
    pub fn new(
        store: Arc<dyn SubmissionStore>,
        cache: Arc<TtlCache>,
        verifier: Arc<dyn ProofVerifier>,
        weight_policy: WeightPolicy,
        daily_limit: u64,
        stats_config: StatsConfig,
        config: EngineConfig,
    ) -> Self {
        Self {
            capacity: CapacityController::new(Arc::clone(&cache), daily_limit),
            stats: StatsService::new(Arc::clone(&store), cache, stats_config),
            store,
            verifier,
            weight_policy,
            config,
        }
    }

    /// Capacity controller shared by all operations
    pub fn capacity(&self) -> &CapacityController {
        &self.capacity
    }

    /// Attempt to record a new prediction.
    pub async fn submit(
        &self,
        identity_token: &str,
        network_fingerprint: &str,
        predicted_date: chrono::NaiveDate,
        proof_token: &str,
    ) -> Result<SubmitOutcome> {
        let level = self.capacity.record_request();

        match self.verifier.verify(proof_token).await {
            Ok(true) => {}
            Ok(false) => {
                debug!(identity = identity_token, "Submission failed the bot check");
                return Ok(SubmitOutcome::Rejected {
                    reason: RejectReason::VerificationFailed,
                    reset_at: None,
                });
            }
            Err(e) => {
                warn!(error = %e, "Verification service unreachable");
                return Ok(SubmitOutcome::Transient {
                    retry_after_secs: self.config.transient_retry_hint_secs,
                });
            }
        }

        // Duplicate resubmission is a success, not a conflict; a changed
        // date on the create path belongs to the update operation
        if let Some(existing) = self.store.find_by_identity(identity_token).await? {
            if existing.predicted_date == predicted_date {
                debug!(identity = identity_token, "Idempotent resubmission");
                return Ok(SubmitOutcome::Accepted {
                    identity_token: existing.identity_token,
                    weight: existing.weight,
                });
            }
            return Ok(SubmitOutcome::Conflict {
                reason: ConflictReason::AlreadySubmitted {
                    existing_date: Some(existing.predicted_date),
                },
            });
        }

        match level {
            CapacityLevel::Exceeded => {
                return Ok(SubmitOutcome::Rejected {
                    reason: RejectReason::CapacityExceeded,
                    reset_at: Some(self.capacity.reset_at()),
                });
            }
            CapacityLevel::Critical => {
                let position = self
                    .store
                    .enqueue(QueuedSubmission {
                        predicted_date,
                        identity_token: identity_token.to_string(),
                        network_fingerprint: network_fingerprint.to_string(),
                        queued_at: Utc::now(),
                    })
                    .await?;
                info!(position, "Submission queued under critical load");
                return Ok(SubmitOutcome::Queued { position });
            }
            _ => {}
        }

        let weight = self
            .weight_policy
            .weight_for(predicted_date, Utc::now().date_naive());
        let outcome = self
            .insert_resolving_conflicts(identity_token, network_fingerprint, predicted_date, weight)
            .await?;

        if matches!(outcome, SubmitOutcome::Accepted { .. }) {
            self.stats.invalidate();
        }
        Ok(outcome)
    }

    /// Durable insert with conflict resolution around the unique indexes.
    async fn insert_resolving_conflicts(
        &self,
        identity_token: &str,
        network_fingerprint: &str,
        predicted_date: chrono::NaiveDate,
        weight: f64,
    ) -> Result<SubmitOutcome> {
        let mut token = identity_token.to_string();

        // Two passes at most: a collision against a freshly minted token is
        // astronomically rare, so one re-mint is the whole budget
        for reminted in [false, true] {
            let store = Arc::clone(&self.store);
            let result = with_retry(&self.config.retry, "submission insert", || {
                store.insert(NewSubmission {
                    predicted_date,
                    identity_token: token.clone(),
                    network_fingerprint: network_fingerprint.to_string(),
                    weight,
                })
            })
            .await;

            match result {
                Ok(record) => {
                    return Ok(SubmitOutcome::Accepted {
                        identity_token: record.identity_token,
                        weight: record.weight,
                    });
                }
                Err(AlmanacError::DuplicateFingerprint) => {
                    debug!("Network origin already bound to another submission");
                    return Ok(SubmitOutcome::Conflict {
                        reason: ConflictReason::OriginAlreadyUsed,
                    });
                }
                Err(AlmanacError::DuplicateIdentity) if !reminted => {
                    warn!("Freshly issued identity token collided, reissuing once");
                    token = Uuid::new_v4().to_string();
                }
                Err(AlmanacError::DuplicateIdentity) => {
                    return Ok(SubmitOutcome::Conflict {
                        reason: ConflictReason::AlreadySubmitted {
                            existing_date: None,
                        },
                    });
                }
                Err(e) if e.is_transient() => {
                    warn!(error = %e, "Submission insert exhausted its retry budget");
                    return Ok(SubmitOutcome::Transient {
                        retry_after_secs: self.config.transient_retry_hint_secs,
                    });
                }
                Err(e) => return Err(e),
            }
        }

        Err(AlmanacError::Invariant(
            "insert conflict loop exited without an outcome".to_string(),
        ))
    }

    /// Change an existing prediction. The identity token is the durable
    /// notion of "who": a new network origin never blocks an update, the
    /// stored fingerprint is simply rebound.
    pub async fn update(
        &self,
        identity_token: &str,
        network_fingerprint: &str,
        predicted_date: chrono::NaiveDate,
    ) -> Result<UpdateOutcome> {
        self.capacity.record_request();

        let existing = match self.store.find_by_identity(identity_token).await? {
            Some(record) => record,
            None => return Ok(UpdateOutcome::NotFound),
        };
        if existing.predicted_date == predicted_date {
            return Ok(UpdateOutcome::Unchanged);
        }

        let weight = self
            .weight_policy
            .weight_for(predicted_date, Utc::now().date_naive());

        let store = Arc::clone(&self.store);
        let result = with_retry(&self.config.retry, "submission update", || {
            store.update_prediction(
                identity_token,
                predicted_date,
                weight,
                Some(network_fingerprint),
            )
        })
        .await;

        let previous = match result {
            Ok(previous) => previous,
            Err(AlmanacError::DuplicateFingerprint) => {
                // Another identity holds the new origin; identity precedence
                // means the date change still lands, on the old binding
                warn!(
                    identity = identity_token,
                    "New network origin already bound elsewhere, keeping the stored binding"
                );
                let store = Arc::clone(&self.store);
                with_retry(&self.config.retry, "submission update", || {
                    store.update_prediction(identity_token, predicted_date, weight, None)
                })
                .await?
            }
            Err(e) => return Err(e),
        };

        match previous {
            Some(previous) => {
                self.stats.invalidate();
                Ok(UpdateOutcome::Updated {
                    previous_date: previous.predicted_date,
                })
            }
            None => Ok(UpdateOutcome::NotFound),
        }
    }

    /// Read the aggregate statistics. The bool is true on a cache hit.
    pub async fn read_statistics(&self) -> Result<(StatsReading, bool)> {
        let level = self.capacity.record_request();
        self.stats.read(level).await
    }

    /// Observational capacity snapshot; does not count a request.
    pub fn read_capacity(&self) -> CapacityReport {
        self.capacity.report()
    }

    /// Per-date submission counts, the optional breakdown view. Returns
    /// `None` when the current level has shed the feature.
    pub async fn distribution(&self) -> Result<Option<Vec<(chrono::NaiveDate, u64)>>> {
        let level = self.capacity.record_request();
        if !FeatureFlags::for_level(level).distribution_enabled {
            debug!(level = level.as_str(), "Distribution view shed under load");
            return Ok(None);
        }

        let samples = self.store.samples().await?;
        let mut counts: BTreeMap<chrono::NaiveDate, u64> = BTreeMap::new();
        for (date, _) in samples {
            *counts.entry(date).or_insert(0) += 1;
        }
        Ok(Some(counts.into_iter().collect()))
    }

    /// Items currently waiting in the holding queue.
    pub async fn queue_depth(&self) -> Result<u64> {
        self.store.queue_depth().await
    }

    /// Commit deferred submissions in arrival order. Runs only while the
    /// capacity level is below critical; items past the retention window
    /// are discarded, never resurrected.
    pub async fn drain_queue(&self) -> Result<DrainReport> {
        let level = self.capacity.current_level();
        if level >= CapacityLevel::Critical {
            debug!(
                level = level.as_str(),
                "Queue drain deferred until capacity recovers"
            );
            return Ok(DrainReport::default());
        }

        let retention = chrono::Duration::from_std(self.config.queue_retention)
            .unwrap_or_else(|_| chrono::Duration::hours(24));
        let cutoff = Utc::now() - retention;
        let (items, expired) = self
            .store
            .dequeue_batch(self.config.drain_batch_size, cutoff)
            .await?;

        let mut report = DrainReport {
            discarded: expired,
            ..DrainReport::default()
        };
        if expired > 0 {
            warn!(expired, "Discarded queued submissions past the retention window");
        }

        let today = Utc::now().date_naive();
        for item in items {
            // A row committed since this was queued wins; the queued
            // duplicate must not clobber it
            if self
                .store
                .find_by_identity(&item.identity_token)
                .await?
                .is_some()
            {
                debug!(identity = %item.identity_token, "Dropping queued duplicate");
                report.discarded += 1;
                continue;
            }

            let weight = self.weight_policy.weight_for(item.predicted_date, today);
            let store = Arc::clone(&self.store);
            let result = with_retry(&self.config.retry, "queued submission insert", || {
                store.insert(NewSubmission {
                    predicted_date: item.predicted_date,
                    identity_token: item.identity_token.clone(),
                    network_fingerprint: item.network_fingerprint.clone(),
                    weight,
                })
            })
            .await;

            match result {
                Ok(_) => report.committed += 1,
                Err(AlmanacError::DuplicateIdentity) | Err(AlmanacError::DuplicateFingerprint) => {
                    debug!(identity = %item.identity_token, "Queued submission lost its uniqueness race, dropping");
                    report.discarded += 1;
                }
                Err(e) if e.is_transient() => {
                    warn!(error = %e, "Store still busy during drain, requeueing and ending this sweep");
                    self.store.enqueue(item).await?;
                    report.requeued += 1;
                    break;
                }
                Err(e) => return Err(e),
            }
        }

        if report.committed > 0 {
            self.stats.invalidate();
        }
        Ok(report)
    }
}

/// Spawn the periodic queue-drain sweep
pub fn spawn_drain_task(engine: Arc<SubmissionEngine>, interval: Duration) -> JoinHandle<()> {
    info!(interval_secs = interval.as_secs(), "Queue drain task started");
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(interval).await;
            match engine.drain_queue().await {
                Ok(report)
                    if report.committed > 0 || report.discarded > 0 || report.requeued > 0 =>
                {
                    info!(
                        committed = report.committed,
                        discarded = report.discarded,
                        requeued = report.requeued,
                        "Queue drain sweep completed"
                    );
                }
                Ok(_) => {}
                Err(e) => error!(error = %e, "Queue drain sweep failed"),
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::MemoryStore;
    use crate::store::Submission;
    use crate::verify::AllowAll;
    use async_trait::async_trait;
    use chrono::NaiveDate;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Rejects every proof token
    struct RejectAll;

    #[async_trait]
    impl ProofVerifier for RejectAll {
        async fn verify(&self, _proof_token: &str) -> Result<bool> {
            Ok(false)
        }
    }

    /// Delegates to a MemoryStore but fails the first `busy_inserts`
    /// inserts with a transient error
    struct FlakyStore {
        inner: MemoryStore,
        busy_inserts: AtomicU32,
    }

    impl FlakyStore {
        fn new(busy_inserts: u32) -> Self {
            Self {
                inner: MemoryStore::new(),
                busy_inserts: AtomicU32::new(busy_inserts),
            }
        }
    }

    #[async_trait]
    impl SubmissionStore for FlakyStore {
        async fn insert(&self, submission: NewSubmission) -> Result<Submission> {
            if self.busy_inserts.load(Ordering::SeqCst) > 0 {
                self.busy_inserts.fetch_sub(1, Ordering::SeqCst);
                return Err(AlmanacError::Busy("write lock held".into()));
            }
            self.inner.insert(submission).await
        }
        async fn find_by_identity(&self, identity_token: &str) -> Result<Option<Submission>> {
            self.inner.find_by_identity(identity_token).await
        }
        async fn update_prediction(
            &self,
            identity_token: &str,
            predicted_date: NaiveDate,
            weight: f64,
            network_fingerprint: Option<&str>,
        ) -> Result<Option<Submission>> {
            self.inner
                .update_prediction(identity_token, predicted_date, weight, network_fingerprint)
                .await
        }
        async fn samples(&self) -> Result<Vec<(NaiveDate, f64)>> {
            self.inner.samples().await
        }
        async fn count(&self) -> Result<u64> {
            self.inner.count().await
        }
        async fn enqueue(&self, item: QueuedSubmission) -> Result<u64> {
            self.inner.enqueue(item).await
        }
        async fn dequeue_batch(
            &self,
            limit: usize,
            cutoff: chrono::DateTime<Utc>,
        ) -> Result<(Vec<QueuedSubmission>, u64)> {
            self.inner.dequeue_batch(limit, cutoff).await
        }
        async fn queue_depth(&self) -> Result<u64> {
            self.inner.queue_depth().await
        }
    }

    /// Window placed safely in the future relative to the test run
    fn test_policy() -> WeightPolicy {
        let today = Utc::now().date_naive();
        WeightPolicy {
            window_start: today + chrono::Duration::days(100),
            window_end: today + chrono::Duration::days(200),
            decay_per_day: 0.0005,
        }
    }

    fn in_window_date() -> NaiveDate {
        Utc::now().date_naive() + chrono::Duration::days(150)
    }

    fn fast_config() -> EngineConfig {
        EngineConfig {
            retry: RetryPolicy {
                max_attempts: 3,
                base_delay: Duration::from_millis(1),
            },
            ..EngineConfig::default()
        }
    }

    fn engine_with(store: Arc<dyn SubmissionStore>, daily_limit: u64) -> SubmissionEngine {
        SubmissionEngine::new(
            store,
            Arc::new(TtlCache::new()),
            Arc::new(AllowAll),
            test_policy(),
            daily_limit,
            StatsConfig::default(),
            fast_config(),
        )
    }

    fn push_to_level(engine: &SubmissionEngine, requests: u64) {
        for _ in 0..requests {
            engine.capacity().record_request();
        }
    }

    #[tokio::test]
    async fn accepted_submission_lands_in_the_store() {
        let store = Arc::new(MemoryStore::new());
        let engine = engine_with(store.clone(), 100_000);

        let outcome = engine
            .submit("token-a", "net-1", in_window_date(), "proof")
            .await
            .expect("submit");
        match outcome {
            SubmitOutcome::Accepted {
                identity_token,
                weight,
            } => {
                assert_eq!(identity_token, "token-a");
                assert_eq!(weight, 1.0);
            }
            other => panic!("expected Accepted, got {:?}", other),
        }
        assert_eq!(store.count().await.expect("count"), 1);
    }

    #[tokio::test]
    async fn resubmission_with_same_date_is_idempotent() {
        let store = Arc::new(MemoryStore::new());
        let engine = engine_with(store.clone(), 100_000);
        let date = in_window_date();

        let first = engine.submit("token-a", "net-1", date, "proof").await.expect("submit");
        let second = engine.submit("token-a", "net-1", date, "proof").await.expect("resubmit");
        assert_eq!(first, second);
        assert_eq!(store.count().await.expect("count"), 1);
    }

    #[tokio::test]
    async fn changed_date_on_create_path_is_a_conflict() {
        let store = Arc::new(MemoryStore::new());
        let engine = engine_with(store.clone(), 100_000);
        let date = in_window_date();

        engine.submit("token-a", "net-1", date, "proof").await.expect("submit");
        let outcome = engine
            .submit("token-a", "net-1", date + chrono::Duration::days(7), "proof")
            .await
            .expect("second submit");
        assert_eq!(
            outcome,
            SubmitOutcome::Conflict {
                reason: ConflictReason::AlreadySubmitted {
                    existing_date: Some(date)
                }
            }
        );
        assert_eq!(store.count().await.expect("count"), 1);
    }

    #[tokio::test]
    async fn reused_origin_is_a_conflict_with_recovery_hint() {
        let store = Arc::new(MemoryStore::new());
        let engine = engine_with(store.clone(), 100_000);

        engine
            .submit("token-a", "net-shared", in_window_date(), "proof")
            .await
            .expect("submit");
        let outcome = engine
            .submit("token-b", "net-shared", in_window_date(), "proof")
            .await
            .expect("second submit");
        assert_eq!(
            outcome,
            SubmitOutcome::Conflict {
                reason: ConflictReason::OriginAlreadyUsed
            }
        );
        assert!(outcome.message().contains("identity token"));
    }

    #[tokio::test]
    async fn failed_bot_check_rejects_without_writing() {
        let store = Arc::new(MemoryStore::new());
        let engine = SubmissionEngine::new(
            store.clone(),
            Arc::new(TtlCache::new()),
            Arc::new(RejectAll),
            test_policy(),
            100_000,
            StatsConfig::default(),
            fast_config(),
        );

        let outcome = engine
            .submit("token-a", "net-1", in_window_date(), "bad-proof")
            .await
            .expect("submit");
        assert_eq!(
            outcome,
            SubmitOutcome::Rejected {
                reason: RejectReason::VerificationFailed,
                reset_at: None,
            }
        );
        assert_eq!(store.count().await.expect("count"), 0);
    }

    #[tokio::test]
    async fn critical_load_queues_instead_of_writing() {
        let store = Arc::new(MemoryStore::new());
        let engine = engine_with(store.clone(), 100_000);

        // 95,999 requests recorded; the submit's own request makes 96,000 (96%)
        push_to_level(&engine, 95_999);

        let outcome = engine
            .submit("token-a", "net-1", in_window_date(), "proof")
            .await
            .expect("submit");
        assert_eq!(outcome, SubmitOutcome::Queued { position: 1 });
        assert_eq!(store.count().await.expect("count"), 0);
        assert_eq!(store.queue_depth().await.expect("depth"), 1);

        let outcome = engine
            .submit("token-b", "net-2", in_window_date(), "proof")
            .await
            .expect("second submit");
        assert_eq!(outcome, SubmitOutcome::Queued { position: 2 });
    }

    #[tokio::test]
    async fn exceeded_load_rejects_with_reset_time() {
        let store = Arc::new(MemoryStore::new());
        let engine = engine_with(store.clone(), 10);
        push_to_level(&engine, 10);

        let outcome = engine
            .submit("token-a", "net-1", in_window_date(), "proof")
            .await
            .expect("submit");
        match outcome {
            SubmitOutcome::Rejected {
                reason: RejectReason::CapacityExceeded,
                reset_at: Some(reset_at),
            } => assert!(reset_at > Utc::now()),
            other => panic!("expected CapacityExceeded, got {:?}", other),
        }
        assert_eq!(store.count().await.expect("count"), 0);
    }

    #[tokio::test]
    async fn transient_store_errors_are_retried_then_surfaced() {
        // Two busy failures: the retry budget absorbs them
        let store = Arc::new(FlakyStore::new(2));
        let engine = engine_with(store.clone(), 100_000);
        let outcome = engine
            .submit("token-a", "net-1", in_window_date(), "proof")
            .await
            .expect("submit");
        assert!(matches!(outcome, SubmitOutcome::Accepted { .. }));

        // Five busy failures: the budget (3 attempts) is exhausted
        let store = Arc::new(FlakyStore::new(5));
        let engine = engine_with(store.clone(), 100_000);
        let outcome = engine
            .submit("token-b", "net-2", in_window_date(), "proof")
            .await
            .expect("submit");
        assert!(matches!(outcome, SubmitOutcome::Transient { .. }));
    }

    #[tokio::test]
    async fn update_changes_date_and_rebinds_origin() {
        let store = Arc::new(MemoryStore::new());
        let engine = engine_with(store.clone(), 100_000);
        let original = in_window_date();

        engine.submit("token-a", "net-1", original, "proof").await.expect("submit");

        let past_window = original + chrono::Duration::days(400);
        let outcome = engine
            .update("token-a", "net-2", past_window)
            .await
            .expect("update");
        assert_eq!(
            outcome,
            UpdateOutcome::Updated {
                previous_date: original
            }
        );

        let record = store
            .find_by_identity("token-a")
            .await
            .expect("find")
            .expect("record");
        assert_eq!(record.predicted_date, past_window);
        assert_eq!(record.network_fingerprint, "net-2");
        // The new date sits ~350 days past the window's end, so the stored
        // weight must have decayed away from full
        assert!(record.weight < 1.0);
        assert!(record.weight > crate::weight::FLOOR_WEIGHT);
    }

    #[tokio::test]
    async fn update_with_same_date_is_unchanged_and_unknown_token_not_found() {
        let store = Arc::new(MemoryStore::new());
        let engine = engine_with(store.clone(), 100_000);
        let date = in_window_date();

        engine.submit("token-a", "net-1", date, "proof").await.expect("submit");
        assert_eq!(
            engine.update("token-a", "net-1", date).await.expect("update"),
            UpdateOutcome::Unchanged
        );
        assert_eq!(
            engine.update("ghost", "net-9", date).await.expect("update"),
            UpdateOutcome::NotFound
        );
    }

    #[tokio::test]
    async fn update_keeps_old_binding_when_new_origin_is_taken() {
        let store = Arc::new(MemoryStore::new());
        let engine = engine_with(store.clone(), 100_000);
        let date = in_window_date();

        engine.submit("token-a", "net-1", date, "proof").await.expect("submit a");
        engine.submit("token-b", "net-2", date, "proof").await.expect("submit b");

        // token-a now updates from token-b's network; identity wins, the
        // date still changes, the stored binding stays net-1
        let outcome = engine
            .update("token-a", "net-2", date + chrono::Duration::days(3))
            .await
            .expect("update");
        assert!(matches!(outcome, UpdateOutcome::Updated { .. }));

        let record = store
            .find_by_identity("token-a")
            .await
            .expect("find")
            .expect("record");
        assert_eq!(record.predicted_date, date + chrono::Duration::days(3));
        assert_eq!(record.network_fingerprint, "net-1");
    }

    #[tokio::test]
    async fn writes_invalidate_the_statistics_cache() {
        let store = Arc::new(MemoryStore::new());
        let engine = engine_with(store.clone(), 100_000);

        for i in 0..50 {
            engine
                .submit(
                    &format!("token-{}", i),
                    &format!("net-{}", i),
                    in_window_date() + chrono::Duration::days(i),
                    "proof",
                )
                .await
                .expect("seed submit");
        }

        let (reading, hit) = engine.read_statistics().await.expect("read");
        assert!(!hit);
        let count_before = match reading {
            StatsReading::Ready(ref aggregate) => aggregate.count,
            ref other => panic!("expected Ready, got {:?}", other),
        };
        assert_eq!(count_before, 50);

        // Warm cache hit until the next write lands
        let (_, hit) = engine.read_statistics().await.expect("read");
        assert!(hit);

        engine
            .submit("token-50", "net-50", in_window_date(), "proof")
            .await
            .expect("submit");
        let (reading, hit) = engine.read_statistics().await.expect("read");
        assert!(!hit, "the write must have invalidated the cache");
        match reading {
            StatsReading::Ready(aggregate) => assert_eq!(aggregate.count, 51),
            other => panic!("expected Ready, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn insufficient_data_until_the_fiftieth_submission() {
        let store = Arc::new(MemoryStore::new());
        let engine = engine_with(store.clone(), 100_000);

        for i in 0..49 {
            engine
                .submit(
                    &format!("token-{}", i),
                    &format!("net-{}", i),
                    in_window_date() + chrono::Duration::days(i),
                    "proof",
                )
                .await
                .expect("seed submit");
        }
        let (reading, _) = engine.read_statistics().await.expect("read");
        assert_eq!(
            reading,
            StatsReading::InsufficientData {
                count: 49,
                required: 50
            }
        );

        engine
            .submit("token-49", "net-49", in_window_date(), "proof")
            .await
            .expect("50th submit");
        let (reading, _) = engine.read_statistics().await.expect("read");
        match reading {
            StatsReading::Ready(aggregate) => {
                assert_eq!(aggregate.count, 50);
                let dates: Vec<NaiveDate> = store
                    .samples()
                    .await
                    .expect("samples")
                    .into_iter()
                    .map(|(d, _)| d)
                    .collect();
                assert!(dates.contains(&aggregate.median));
            }
            other => panic!("expected Ready, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn drain_commits_in_arrival_order() {
        let store = Arc::new(MemoryStore::new());
        let engine = engine_with(store.clone(), 100_000);
        let now = Utc::now();

        // Two queued items race for the same origin; the older one must win
        store
            .enqueue(QueuedSubmission {
                predicted_date: in_window_date(),
                identity_token: "early".to_string(),
                network_fingerprint: "net-shared".to_string(),
                queued_at: now - chrono::Duration::minutes(10),
            })
            .await
            .expect("enqueue early");
        store
            .enqueue(QueuedSubmission {
                predicted_date: in_window_date(),
                identity_token: "late".to_string(),
                network_fingerprint: "net-shared".to_string(),
                queued_at: now - chrono::Duration::minutes(5),
            })
            .await
            .expect("enqueue late");

        let report = engine.drain_queue().await.expect("drain");
        assert_eq!(report.committed, 1);
        assert_eq!(report.discarded, 1);
        assert!(store.find_by_identity("early").await.expect("find").is_some());
        assert!(store.find_by_identity("late").await.expect("find").is_none());
    }

    #[tokio::test]
    async fn drain_discards_items_past_retention_and_skips_committed_duplicates() {
        let store = Arc::new(MemoryStore::new());
        let engine = engine_with(store.clone(), 100_000);
        let now = Utc::now();
        let date = in_window_date();

        store
            .enqueue(QueuedSubmission {
                predicted_date: date,
                identity_token: "stale".to_string(),
                network_fingerprint: "net-stale".to_string(),
                queued_at: now - chrono::Duration::hours(25),
            })
            .await
            .expect("enqueue stale");

        // This identity committed a row while its queued twin waited
        engine.submit("dupe", "net-dupe", date, "proof").await.expect("submit");
        store
            .enqueue(QueuedSubmission {
                predicted_date: date,
                identity_token: "dupe".to_string(),
                network_fingerprint: "net-dupe-2".to_string(),
                queued_at: now - chrono::Duration::minutes(1),
            })
            .await
            .expect("enqueue dupe");

        store
            .enqueue(QueuedSubmission {
                predicted_date: date,
                identity_token: "fresh".to_string(),
                network_fingerprint: "net-fresh".to_string(),
                queued_at: now,
            })
            .await
            .expect("enqueue fresh");

        let report = engine.drain_queue().await.expect("drain");
        assert_eq!(report.committed, 1);
        assert_eq!(report.discarded, 2);
        assert!(store.find_by_identity("stale").await.expect("find").is_none());
        assert!(store.find_by_identity("fresh").await.expect("find").is_some());
        assert_eq!(store.queue_depth().await.expect("depth"), 0);
    }

    #[tokio::test]
    async fn drain_waits_while_capacity_is_critical() {
        let store = Arc::new(MemoryStore::new());
        let engine = engine_with(store.clone(), 100);
        push_to_level(&engine, 96);

        store
            .enqueue(QueuedSubmission {
                predicted_date: in_window_date(),
                identity_token: "waiting".to_string(),
                network_fingerprint: "net-w".to_string(),
                queued_at: Utc::now(),
            })
            .await
            .expect("enqueue");

        let report = engine.drain_queue().await.expect("drain");
        assert_eq!(report.committed, 0);
        assert_eq!(store.queue_depth().await.expect("depth"), 1);
    }

    #[tokio::test]
    async fn distribution_counts_dates_until_shed() {
        let store = Arc::new(MemoryStore::new());
        let engine = engine_with(store.clone(), 100_000);
        let date = in_window_date();

        engine.submit("token-a", "net-1", date, "proof").await.expect("submit");
        engine.submit("token-b", "net-2", date, "proof").await.expect("submit");
        engine
            .submit("token-c", "net-3", date + chrono::Duration::days(1), "proof")
            .await
            .expect("submit");

        let breakdown = engine
            .distribution()
            .await
            .expect("distribution")
            .expect("enabled under normal load");
        assert_eq!(breakdown, vec![(date, 2), (date + chrono::Duration::days(1), 1)]);

        // Push into High territory; the breakdown is the first feature shed
        let engine = engine_with(store.clone(), 10);
        push_to_level(&engine, 9);
        assert!(engine.distribution().await.expect("distribution").is_none());
    }

    #[tokio::test]
    async fn capacity_report_reflects_load_without_counting() {
        let store = Arc::new(MemoryStore::new());
        let engine = engine_with(store, 10);
        push_to_level(&engine, 8);

        let report = engine.read_capacity();
        assert_eq!(report.level, CapacityLevel::Elevated);
        assert_eq!(report.requests_today, 8);
        assert!(report.features.submissions_enabled);
        let again = engine.read_capacity();
        assert_eq!(again.requests_today, 8);
    }
}
