//! MongoDB-backed submission store
//!
//! The uniqueness indexes declared by the schemas are the serialization
//! points for concurrent submissions; no application-level locking sits on
//! top of them. Queue order rides the ascending `queued_at` index that also
//! carries the TTL expiry.

use async_trait::async_trait;
use bson::doc;
use chrono::{DateTime, NaiveDate, Utc};
use futures_util::StreamExt;
use mongodb::options::ReturnDocument;
use tracing::error;

use crate::db::mongo::{classify_mongo_error, MongoClient, MongoCollection};
use crate::db::schemas::{
    QueuedSubmissionDoc, SubmissionDoc, QUEUED_COLLECTION, SUBMISSION_COLLECTION,
};
use crate::store::{NewSubmission, QueuedSubmission, Submission, SubmissionStore};
use crate::types::Result;

/// Durable store over MongoDB collections
pub struct MongoSubmissionStore {
    submissions: MongoCollection<SubmissionDoc>,
    queued: MongoCollection<QueuedSubmissionDoc>,
}

impl MongoSubmissionStore {
    /// Open both collections, applying their indexes.
    pub async fn new(client: &MongoClient) -> Result<Self> {
        Ok(Self {
            submissions: client.collection(SUBMISSION_COLLECTION).await?,
            queued: client.collection(QUEUED_COLLECTION).await?,
        })
    }
}

#[async_trait]
impl SubmissionStore for MongoSubmissionStore {
    async fn insert(&self, submission: NewSubmission) -> Result<Submission> {
        let mut doc = SubmissionDoc::from_new(&submission);
        let id = self.submissions.insert_one(doc.clone()).await?;
        doc._id = Some(id);
        doc.into_submission()
    }

    async fn find_by_identity(&self, identity_token: &str) -> Result<Option<Submission>> {
        self.submissions
            .find_one(doc! { "identity_token": identity_token })
            .await?
            .map(SubmissionDoc::into_submission)
            .transpose()
    }

    async fn update_prediction(
        &self,
        identity_token: &str,
        predicted_date: NaiveDate,
        weight: f64,
        network_fingerprint: Option<&str>,
    ) -> Result<Option<Submission>> {
        let mut set = doc! {
            "predicted_date": predicted_date.format("%Y-%m-%d").to_string(),
            "weight": weight,
            "metadata.updated_at": bson::DateTime::now(),
        };
        if let Some(fingerprint) = network_fingerprint {
            set.insert("network_fingerprint", fingerprint);
        }

        let previous = self
            .submissions
            .inner()
            .find_one_and_update(
                doc! {
                    "identity_token": identity_token,
                    "metadata.is_deleted": { "$ne": true },
                },
                doc! { "$set": set },
            )
            .return_document(ReturnDocument::Before)
            .await
            .map_err(|e| classify_mongo_error("submission update", e))?;

        previous.map(SubmissionDoc::into_submission).transpose()
    }

    async fn samples(&self) -> Result<Vec<(NaiveDate, f64)>> {
        let docs = self.submissions.find_many(doc! {}).await?;
        let mut samples = Vec::with_capacity(docs.len());
        for doc in docs {
            let submission = doc.into_submission()?;
            samples.push((submission.predicted_date, submission.weight));
        }
        Ok(samples)
    }

    async fn count(&self) -> Result<u64> {
        self.submissions
            .inner()
            .count_documents(doc! { "metadata.is_deleted": { "$ne": true } })
            .await
            .map_err(|e| classify_mongo_error("submission count", e))
    }

    async fn enqueue(&self, item: QueuedSubmission) -> Result<u64> {
        self.queued
            .insert_one(QueuedSubmissionDoc::from_queued(&item))
            .await?;
        // The new item is the newest, so the queue length is its position
        self.queue_depth().await
    }

    async fn dequeue_batch(
        &self,
        limit: usize,
        cutoff: DateTime<Utc>,
    ) -> Result<(Vec<QueuedSubmission>, u64)> {
        let cursor = self
            .queued
            .inner()
            .find(doc! {})
            .sort(doc! { "queued_at": 1 })
            .limit(limit as i64)
            .await
            .map_err(|e| classify_mongo_error("queue scan", e))?;

        let docs: Vec<QueuedSubmissionDoc> = cursor
            .filter_map(|doc| async {
                match doc {
                    Ok(d) => Some(d),
                    Err(e) => {
                        error!("Error reading queued document: {}", e);
                        None
                    }
                }
            })
            .collect()
            .await;

        let mut items = Vec::new();
        let mut discarded = 0u64;
        for doc in docs {
            if let Some(id) = doc._id {
                self.queued
                    .inner()
                    .delete_one(doc! { "_id": id })
                    .await
                    .map_err(|e| classify_mongo_error("queue delete", e))?;
            }
            if doc.queued_at_utc() < cutoff {
                discarded += 1;
                continue;
            }
            items.push(doc.into_queued()?);
        }

        Ok((items, discarded))
    }

    async fn queue_depth(&self) -> Result<u64> {
        self.queued
            .inner()
            .count_documents(doc! {})
            .await
            .map_err(|e| classify_mongo_error("queue count", e))
    }
}
