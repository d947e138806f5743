//! In-memory submission store
//!
//! Backs dev mode when MongoDB is unreachable, and every engine test.
//! A single mutex guards the whole state so the two uniqueness checks and
//! the insert they protect are one atomic step, matching what the unique
//! indexes give the Mongo-backed store.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use std::collections::HashMap;
use std::sync::Mutex;

use crate::store::{NewSubmission, QueuedSubmission, Submission, SubmissionStore};
use crate::types::{AlmanacError, Result};

#[derive(Default)]
struct MemoryState {
    /// identity_token -> submission
    by_identity: HashMap<String, Submission>,
    /// network_fingerprint -> identity_token
    fingerprints: HashMap<String, String>,
    /// FIFO holding queue, kept sorted by queued_at
    queue: Vec<QueuedSubmission>,
    next_id: u64,
}

/// Durable-store stand-in living entirely in process memory
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, MemoryState>> {
        self.state
            .lock()
            .map_err(|e| AlmanacError::Database(format!("memory store poisoned: {}", e)))
    }
}

#[async_trait]
impl SubmissionStore for MemoryStore {
    async fn insert(&self, submission: NewSubmission) -> Result<Submission> {
        let mut state = self.lock()?;

        if state.by_identity.contains_key(&submission.identity_token) {
            return Err(AlmanacError::DuplicateIdentity);
        }
        if state.fingerprints.contains_key(&submission.network_fingerprint) {
            return Err(AlmanacError::DuplicateFingerprint);
        }

        state.next_id += 1;
        let now = Utc::now();
        let record = Submission {
            id: format!("mem-{}", state.next_id),
            predicted_date: submission.predicted_date,
            identity_token: submission.identity_token.clone(),
            network_fingerprint: submission.network_fingerprint.clone(),
            weight: submission.weight,
            created_at: now,
            updated_at: now,
        };

        state
            .fingerprints
            .insert(submission.network_fingerprint, submission.identity_token.clone());
        state
            .by_identity
            .insert(submission.identity_token, record.clone());

        Ok(record)
    }

    async fn find_by_identity(&self, identity_token: &str) -> Result<Option<Submission>> {
        Ok(self.lock()?.by_identity.get(identity_token).cloned())
    }

    async fn update_prediction(
        &self,
        identity_token: &str,
        predicted_date: NaiveDate,
        weight: f64,
        network_fingerprint: Option<&str>,
    ) -> Result<Option<Submission>> {
        let mut state = self.lock()?;

        let previous = match state.by_identity.get(identity_token).cloned() {
            Some(record) => record,
            None => return Ok(None),
        };

        if let Some(fingerprint) = network_fingerprint {
            if let Some(owner) = state.fingerprints.get(fingerprint) {
                if owner != identity_token {
                    return Err(AlmanacError::DuplicateFingerprint);
                }
            }
        }

        let mut updated = previous.clone();
        updated.predicted_date = predicted_date;
        updated.weight = weight;
        updated.updated_at = Utc::now();
        if let Some(fingerprint) = network_fingerprint {
            state.fingerprints.remove(&previous.network_fingerprint);
            state
                .fingerprints
                .insert(fingerprint.to_string(), identity_token.to_string());
            updated.network_fingerprint = fingerprint.to_string();
        }
        state.by_identity.insert(identity_token.to_string(), updated);

        Ok(Some(previous))
    }

    async fn samples(&self) -> Result<Vec<(NaiveDate, f64)>> {
        Ok(self
            .lock()?
            .by_identity
            .values()
            .map(|s| (s.predicted_date, s.weight))
            .collect())
    }

    async fn count(&self) -> Result<u64> {
        Ok(self.lock()?.by_identity.len() as u64)
    }

    async fn enqueue(&self, item: QueuedSubmission) -> Result<u64> {
        let mut state = self.lock()?;
        // Keep arrival order even if a retried item carries an older stamp
        let at = state
            .queue
            .partition_point(|queued| queued.queued_at <= item.queued_at);
        state.queue.insert(at, item);
        Ok(state.queue.len() as u64)
    }

    async fn dequeue_batch(
        &self,
        limit: usize,
        cutoff: DateTime<Utc>,
    ) -> Result<(Vec<QueuedSubmission>, u64)> {
        let mut state = self.lock()?;
        let take = limit.min(state.queue.len());
        let mut items = Vec::new();
        let mut discarded = 0u64;
        for item in state.queue.drain(..take) {
            if item.queued_at < cutoff {
                discarded += 1;
            } else {
                items.push(item);
            }
        }
        Ok((items, discarded))
    }

    async fn queue_depth(&self) -> Result<u64> {
        Ok(self.lock()?.queue.len() as u64)
    }
}
