//! Bounded retry for credential fetches
//!
//! Track fetches are never retried; only token acquisition goes through here.

use std::future::Future;
use std::time::Duration;

/// Additional attempts after the first one
pub const TOKEN_FETCH_RETRIES: u32 = 2;

/// Delay before the first retry; doubles each attempt
pub const INITIAL_BACKOFF_MS: u64 = 200;

/// Retry `operation` while `is_transient` holds, at most `max_retries` extra times.
///
/// **Backoff Strategy:**
/// - Initial delay: `initial_backoff`
/// - Multiplier: 2.0 (exponential)
///
/// Non-transient errors are returned immediately.
pub async fn retry_transient<F, Fut, T, E>(
    operation_name: &str,
    max_retries: u32,
    initial_backoff: Duration,
    is_transient: impl Fn(&E) -> bool,
    mut operation: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let mut attempt = 0u32;
    let mut backoff = initial_backoff;

    loop {
        match operation().await {
            Ok(value) => {
                if attempt > 0 {
                    tracing::debug!(operation = operation_name, attempt, "Succeeded after retry");
                }
                return Ok(value);
            }
            Err(err) if attempt < max_retries && is_transient(&err) => {
                attempt += 1;
                tracing::warn!(
                    operation = operation_name,
                    attempt,
                    backoff_ms = backoff.as_millis() as u64,
                    error = %err,
                    "Transient failure, retrying"
                );
                tokio::time::sleep(backoff).await;
                backoff = backoff.saturating_mul(2);
            }
            Err(err) => {
                if attempt > 0 {
                    tracing::error!(operation = operation_name, attempt, error = %err, "Giving up after retries");
                }
                return Err(err);
            }
        }
    }
}
