//! Bounded retry with exponential backoff for storage contention.
//!
//! Only errors for which `BookError::is_retryable` holds are retried; every
//! business or validation error goes straight back to the caller. A failed
//! attempt never leaves partial state behind because each attempt runs in
//! its own transaction.

use std::future::Future;
use std::time::Duration;
use tracing::warn;

use crate::types::BookError;

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub max_retries: u32,
    /// Delay before the first retry; doubles each time.
    pub base_backoff: Duration,
}

impl RetryPolicy {
    pub fn new(max_retries: u32, base_backoff: Duration) -> Self {
        Self { max_retries, base_backoff }
    }

    /// Delay before retry number `attempt` (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.base_backoff * 2u32.saturating_pow(attempt.saturating_sub(1))
    }
}

/// Run `op` until it succeeds, fails with a non-retryable error, or the
/// retry budget is spent. Exhaustion surfaces as `BookError::Transient`.
pub async fn with_backoff<T, F, Fut>(
    policy: &RetryPolicy,
    operation: &str,
    mut op: F,
) -> Result<T, BookError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, BookError>>,
{
    let mut attempt = 0;
    loop {
        match op().await {
            Err(e) if e.is_retryable() => {
                if attempt >= policy.max_retries {
                    warn!(operation, attempts = attempt + 1, error = %e, "Retries exhausted");
                    return Err(BookError::Transient {
                        operation: operation.to_string(),
                        attempts: attempt + 1,
                        message: e.to_string(),
                    });
                }
                attempt += 1;
                let delay = policy.delay_for(attempt);
                warn!(
                    operation,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "Storage contention, retrying"
                );
                tokio::time::sleep(delay).await;
            }
            other => return other,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
