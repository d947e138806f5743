//! Bot-verification collaborator seam
//!
//! The engine consults a verdict before accepting any write. The real
//! verifier is an external service owned by the request pipeline; this
//! crate only defines the seam and the dev-mode stand-in.

use async_trait::async_trait;

use crate::types::Result;

/// Verdict provider consulted before any write is accepted
#[async_trait]
pub trait ProofVerifier: Send + Sync {
    /// Whether the proof token passes the bot check.
    async fn verify(&self, proof_token: &str) -> Result<bool>;
}

/// Accepts every proof token. Dev mode and tests only.
pub struct AllowAll;

#[async_trait]
impl ProofVerifier for AllowAll {
    async fn verify(&self, _proof_token: &str) -> Result<bool> {
        Ok(true)
    }
}
