//! Submission document schema
//!
//! One document per submitter, with unique secondary keys on both the
//! identity token (who) and the network fingerprint (where from). Dates are
//! stored as `YYYY-MM-DD` strings so the natural string ordering matches
//! calendar ordering for range queries and sorts.

use bson::{doc, oid::ObjectId, Document};
use chrono::{DateTime, NaiveDate, Utc};
use mongodb::options::IndexOptions;
use serde::{Deserialize, Serialize};

use crate::db::mongo::{IntoIndexes, MutMetadata};
use crate::db::schemas::Metadata;
use crate::store::{NewSubmission, Submission};
use crate::types::AlmanacError;

/// Collection name for submissions
pub const SUBMISSION_COLLECTION: &str = "submissions";

/// Submission document stored in MongoDB
#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct SubmissionDoc {
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

    /// Influence weight, always consistent with predicted_date
    pub weight: f64,
}

impl SubmissionDoc {
    pub fn from_new(submission: &NewSubmission) -> Self {
        Self {
            _id: None,
            metadata: Metadata::new(),
            predicted_date: submission.predicted_date.format("%Y-%m-%d").to_string(),
            identity_token: submission.identity_token.clone(),
            network_fingerprint: submission.network_fingerprint.clone(),
            weight: submission.weight,
        }
    }

    /// Convert the stored document into the engine's record type.
    pub fn into_submission(self) -> Result<Submission, AlmanacError> {
        let predicted_date = parse_stored_date(&self.predicted_date)?;
        Ok(Submission {
            id: self._id.map(|id| id.to_hex()).unwrap_or_default(),
            predicted_date,
            identity_token: self.identity_token,
            network_fingerprint: self.network_fingerprint,
            weight: self.weight,
            created_at: bson_to_utc(self.metadata.created_at),
            updated_at: bson_to_utc(self.metadata.updated_at),
        })
    }
}

/// Parse a stored "YYYY-MM-DD" date, surfacing corruption as an invariant
/// violation rather than a silent skip.
pub fn parse_stored_date(raw: &str) -> Result<NaiveDate, AlmanacError> {
    raw.parse::<NaiveDate>()
        .map_err(|e| AlmanacError::Invariant(format!("malformed stored date '{}': {}", raw, e)))
}

fn bson_to_utc(dt: Option<bson::DateTime>) -> DateTime<Utc> {
    dt.map(|d| d.to_chrono()).unwrap_or(DateTime::<Utc>::UNIX_EPOCH)
}

impl IntoIndexes for SubmissionDoc {
    fn into_indices() -> Vec<(Document, Option<IndexOptions>)> {
        vec![
            // One active submission per identity token
            (
                doc! { "identity_token": 1 },
                Some(
                    IndexOptions::builder()
                        .unique(true)
                        .name("identity_token_unique".to_string())
                        .build(),
                ),
            ),
            // One active submission per network origin (anti-abuse)
            (
                doc! { "network_fingerprint": 1 },
                Some(
                    IndexOptions::builder()
                        .unique(true)
                        .name("network_fingerprint_unique".to_string())
                        .build(),
                ),
            ),
            // Range scans for the aggregate view
            (
                doc! { "predicted_date": 1 },
                Some(
                    IndexOptions::builder()
                        .name("predicted_date_index".to_string())
                        .build(),
                ),
            ),
        ]
    }
}

impl MutMetadata for SubmissionDoc {
    fn mut_metadata(&mut self) -> &mut Metadata {
        &mut self.metadata
    }
}
