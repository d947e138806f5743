//! Bounded retry with exponential backoff
//!
//! Transient store contention gets a fixed retry budget instead of nested
//! error handling at every call site. The ceiling is hard: after the last
//! attempt the error surfaces to the caller, never an unbounded wait.

use std::future::Future;
use std::time::Duration;
use tracing::warn;

use crate::types::Result;

/// Retry schedule for transient store errors
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Total attempts, including the first
    pub max_attempts: u32,
    /// Delay before the first retry; doubles each attempt
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(100),
        }
    }
}

/// Run a fallible operation under the retry policy.
///
/// Only errors classified transient are retried; anything else returns
/// immediately. With the default policy the backoff schedule is
/// 100ms, 200ms before the second and third attempts.
pub async fn with_retry<T, F, Fut>(policy: &RetryPolicy, label: &str, mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut delay = policy.base_delay;
    let mut attempt = 1u32;

    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_transient() && attempt < policy.max_attempts => {
                warn!(
                    attempt,
                    max_attempts = policy.max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "{} hit transient store error, backing off",
                    label
                );
                tokio::time::sleep(delay).await;
                delay *= 2;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}
