//! Durable submission store seam
//!
//! The engine talks to persistence through this trait so the MongoDB-backed
//! store and the in-memory dev/test store are interchangeable. The two
//! uniqueness constraints (identity token, network fingerprint) are enforced
//! by the store, not by application-level locking - implementations must
//! surface violations as the matching typed errors.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::types::Result;

/// One submitter's current prediction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Submission {
    /// Store-assigned surrogate key, immutable once created
    pub id: String,
    pub predicted_date: NaiveDate,
    pub identity_token: String,
    pub network_fingerprint: String,
    pub weight: f64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Payload for a submission about to be created
#[derive(Debug, Clone)]
pub struct NewSubmission {
    pub predicted_date: NaiveDate,
    pub identity_token: String,
    pub network_fingerprint: String,
    pub weight: f64,
}

/// A submission deferred under critical load, not yet committed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueuedSubmission {
    pub predicted_date: NaiveDate,
    pub identity_token: String,
    pub network_fingerprint: String,
    pub queued_at: DateTime<Utc>,
}

/// Durable store surface the engine depends on
#[async_trait]
pub trait SubmissionStore: Send + Sync {
    /// Insert a new submission. Must fail with `DuplicateIdentity` /
    /// `DuplicateFingerprint` when the matching unique constraint trips.
    async fn insert(&self, submission: NewSubmission) -> Result<Submission>;

    /// Look up the submission bound to an identity token, if any.
    async fn find_by_identity(&self, identity_token: &str) -> Result<Option<Submission>>;

    /// Rebind an existing submission to a new date and weight, returning
    /// the record as it was before the update (`None` if the token has no
    /// submission). When `network_fingerprint` is `Some` the stored origin
    /// binding is overwritten; `None` leaves it untouched.
    async fn update_prediction(
        &self,
        identity_token: &str,
        predicted_date: NaiveDate,
        weight: f64,
        network_fingerprint: Option<&str>,
    ) -> Result<Option<Submission>>;

    /// All current (date, weight) pairs, in no particular order.
    async fn samples(&self) -> Result<Vec<(NaiveDate, f64)>>;

    /// Total number of live submissions.
    async fn count(&self) -> Result<u64>;

    /// Defer a submission; returns its position in the queue (1-based).
    async fn enqueue(&self, item: QueuedSubmission) -> Result<u64>;

    /// Remove and return up to `limit` queued items in strict `queued_at`
    /// order. Items queued before `cutoff` are deleted without being
    /// returned; the second element counts those discards.
    async fn dequeue_batch(
        &self,
        limit: usize,
        cutoff: DateTime<Utc>,
    ) -> Result<(Vec<QueuedSubmission>, u64)>;

    /// Number of items currently waiting in the queue.
    async fn queue_depth(&self) -> Result<u64>;
}
