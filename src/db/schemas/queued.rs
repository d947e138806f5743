//! Queued submission document schema
//!
//! Holding pen for submissions deferred under critical load. A TTL index on
//! `queued_at` expires undrained items after 24 hours; the drain sweep
//! additionally refuses anything older than the retention window so an
//! expiry-lag race can never resurrect a stale item.

use bson::{doc, oid::ObjectId, Document};
use chrono::{DateTime, Utc};
use mongodb::options::IndexOptions;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::db::mongo::{IntoIndexes, MutMetadata};
use crate::db::schemas::submission::parse_stored_date;
use crate::db::schemas::Metadata;
use crate::store::QueuedSubmission;
use crate::types::AlmanacError;

/// Collection name for queued submissions
pub const QUEUED_COLLECTION: &str = "queued_submissions";

/// Retention window before an undrained item is discarded
pub const QUEUE_RETENTION_SECS: u64 = 24 * 60 * 60;

/// Queued submission document stored in MongoDB
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct QueuedSubmissionDoc {
    /// MongoDB document ID
    #[serde(skip_serializing_if = "Option::is_none")]
    pub _id: Option<ObjectId>,

    /// Common metadata (created_at, updated_at, is_deleted)
    #[serde(default)]
    pub metadata: Metadata,

    /// Predicted calendar date as "YYYY-MM-DD"
    pub predicted_date: String,

    /// Opaque stable token identifying the submitter across sessions
    pub identity_token: String,

    /// Opaque value derived from the submitter's network origin
    pub network_fingerprint: String,

    /// Arrival time; drain order and expiry both key off this
    pub queued_at: bson::DateTime,
}

impl Default for QueuedSubmissionDoc {
    fn default() -> Self {
        Self {
            _id: None,
            metadata: Metadata::default(),
            predicted_date: String::new(),
            identity_token: String::new(),
            network_fingerprint: String::new(),
            // bson::DateTime has no Default; epoch mirrors the UNIX_EPOCH
            // fallback used for stored dates elsewhere in the schema layer.
            queued_at: bson::DateTime::from_millis(0),
        }
    }
}

impl QueuedSubmissionDoc {
    pub fn from_queued(item: &QueuedSubmission) -> Self {
        Self {
            _id: None,
            metadata: Metadata::new(),
            predicted_date: item.predicted_date.format("%Y-%m-%d").to_string(),
            identity_token: item.identity_token.clone(),
            network_fingerprint: item.network_fingerprint.clone(),
            queued_at: bson::DateTime::from_chrono(item.queued_at),
        }
    }

    pub fn into_queued(self) -> Result<QueuedSubmission, AlmanacError> {
        Ok(QueuedSubmission {
            predicted_date: parse_stored_date(&self.predicted_date)?,
            identity_token: self.identity_token,
            network_fingerprint: self.network_fingerprint,
            queued_at: self.queued_at.to_chrono(),
        })
    }

    pub fn queued_at_utc(&self) -> DateTime<Utc> {
        self.queued_at.to_chrono()
    }
}

impl IntoIndexes for QueuedSubmissionDoc {
    fn into_indices() -> Vec<(Document, Option<IndexOptions>)> {
        vec![
            // Ascending arrival-time index doubles as the TTL expiry hook
            (
                doc! { "queued_at": 1 },
                Some(
                    IndexOptions::builder()
                        .name("queued_at_ttl".to_string())
                        .expire_after(Duration::from_secs(QUEUE_RETENTION_SECS))
                        .build(),
                ),
            ),
        ]
    }
}

impl MutMetadata for QueuedSubmissionDoc {
    fn mut_metadata(&mut self) -> &mut Metadata {
        &mut self.metadata
    }
}
