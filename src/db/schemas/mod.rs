//! Database schemas for Almanac
//!
//! Defines MongoDB document structures for submissions and the
//! critical-load holding queue.

mod metadata;
mod queued;
mod submission;

pub use metadata::Metadata;
pub use queued::{QueuedSubmissionDoc, QUEUED_COLLECTION, QUEUE_RETENTION_SECS};
pub use submission::{SubmissionDoc, SUBMISSION_COLLECTION};
