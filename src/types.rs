//! Shared types for Almanac
//!
//! Error taxonomy and the closed outcome enums for every engine operation.
//! Callers must exhaustively handle each variant; there are no ad-hoc
//! success/error shapes anywhere in the crate.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result alias used throughout the crate
pub type Result<T> = std::result::Result<T, AlmanacError>;

/// Error types for engine and store operations
#[derive(Debug, Error)]
pub enum AlmanacError {
    /// Durable store failure that is not worth retrying
    #[error("Database error: {0}")]
    Database(String),

    /// Transient store contention (lock/busy/unreachable) - safe to retry
    #[error("Store busy: {0}")]
    Busy(String),

    /// Another submission already holds this identity token
    #[error("Identity token already has an active submission")]
    DuplicateIdentity,

    /// Another submission already holds this network fingerprint
    #[error("Network origin already has an active submission")]
    DuplicateFingerprint,

    /// The bot-verification collaborator could not be consulted
    #[error("Verification service error: {0}")]
    Verification(String),

    /// Impossible internal state (e.g. negative total weight, malformed
    /// stored date) - fatal to the request, never swallowed
    #[error("Invariant violated: {0}")]
    Invariant(String),

    /// Bad configuration detected at startup
    #[error("Configuration error: {0}")]
    Config(String),
}

impl AlmanacError {
    /// Whether a bounded retry with backoff is worthwhile
    pub fn is_transient(&self) -> bool {
        matches!(self, AlmanacError::Busy(_))
    }
}

/// Why a submission could not be created
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ConflictReason {
    /// The identity token already has a submission with a different date.
    /// The caller should route to the update path instead.
    AlreadySubmitted {
        existing_date: Option<NaiveDate>,
    },
    /// A different identity already submitted from this network origin.
    OriginAlreadyUsed,
}

/// Why a submission was refused outright
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectReason {
    /// The bot-verification verdict was negative
    VerificationFailed,
    /// The daily request ceiling has been reached
    CapacityExceeded,
}

/// Outcome of a submission attempt
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SubmitOutcome {
    /// Committed to the durable store. Carries the identity token actually
    /// stored (it is re-minted when a freshly generated token collides).
    Accepted { identity_token: String, weight: f64 },
    /// Deferred under critical load; will be committed by the drain sweep
    Queued { position: u64 },
    /// Uniqueness conflict with a recovery path
    Conflict { reason: ConflictReason },
    /// Refused outright
    Rejected {
        reason: RejectReason,
        reset_at: Option<DateTime<Utc>>,
    },
    /// Transient store trouble survived the retry budget
    Transient { retry_after_secs: u64 },
}

impl SubmitOutcome {
    /// Human-actionable message for the caller to surface
    pub fn message(&self) -> String {
        match self {
            SubmitOutcome::Accepted { .. } => "Your prediction has been recorded.".to_string(),
            SubmitOutcome::Queued { position } => format!(
                "We're under heavy load - your prediction is queued at position {} and will be recorded shortly.",
                position
            ),
            SubmitOutcome::Conflict {
                reason: ConflictReason::AlreadySubmitted { .. },
            } => "You already have a prediction on record. Use the update form to change it."
                .to_string(),
            SubmitOutcome::Conflict {
                reason: ConflictReason::OriginAlreadyUsed,
            } => "A prediction already exists from this network. Restore your identity token to update it, or use the update form.".to_string(),
            SubmitOutcome::Rejected {
                reason: RejectReason::VerificationFailed,
                ..
            } => "We couldn't verify you're human. Please retry the challenge.".to_string(),
            SubmitOutcome::Rejected {
                reason: RejectReason::CapacityExceeded,
                reset_at,
            } => match reset_at {
                Some(at) => format!(
                    "Daily capacity reached - submissions reopen at {}.",
                    at.format("%H:%M UTC")
                ),
                None => "Daily capacity reached - please come back tomorrow.".to_string(),
            },
            SubmitOutcome::Transient { retry_after_secs } => {
                format!("Temporary trouble saving your prediction - try again in {} seconds.", retry_after_secs)
            }
        }
    }
}

/// Outcome of an update attempt
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum UpdateOutcome {
    /// The stored date changed; carries what it was before
    Updated { previous_date: NaiveDate },
    /// The incoming date matches the stored date; nothing mutated
    Unchanged,
    /// No submission exists for this identity token
    NotFound,
}

/// Derived aggregate view over all current submissions
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregateStats {
    pub median: NaiveDate,
    pub min: NaiveDate,
    pub max: NaiveDate,
    pub count: u64,
    pub computed_at: DateTime<Utc>,
}

/// What a statistics read produced
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum StatsReading {
    /// Enough data for a meaningful estimate
    Ready(AggregateStats),
    /// Too few submissions to publish a median
    InsufficientData { count: u64, required: u64 },
}
