//! Common metadata envelope for stored documents
//!
//! Submissions are never implicitly deleted; the soft-delete flag exists so
//! an explicit removal (handled outside this engine) hides a row from every
//! read without breaking the uniqueness history.

use bson::DateTime;
use serde::{Deserialize, Serialize};

/// Timestamps and liveness flag carried by every document
#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct Metadata {
    /// Hidden from all reads when set
    #[serde(default)]
    pub is_deleted: bool,

    /// When the document was last updated
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime>,

    /// When the document was created
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime>,
}

impl Metadata {
    /// Fresh metadata stamped with the current time
    pub fn new() -> Self {
        Self {
            is_deleted: false,
            updated_at: Some(DateTime::now()),
            created_at: Some(DateTime::now()),
        }
    }
}
