//! Store write retry
//!
//! Retries an async store call with exponential backoff while the failure is
//! transient (see [`crate::error::ClientError::is_transient`]). Non-transient
//! errors return immediately. Shares [`BackoffPolicy`] with the realtime
//! channel, so the same `max_retries` bounds both.

use std::future::Future;
use std::time::Instant;

use crate::connection::BackoffPolicy;
use crate::error::ClientResult;

/// Retry `operation` until it succeeds, fails permanently, or the policy's
/// retry budget is spent. Returns the last error on exhaustion.
pub async fn retry_transient<F, Fut, T>(
    operation_name: &str,
    policy: &BackoffPolicy,
    mut operation: F,
) -> ClientResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = ClientResult<T>>,
{
    let start_time = Instant::now();
    let mut attempt: u32 = 0;

    loop {
        attempt += 1;

        if attempt > 1 {
            tracing::debug!(operation = operation_name, attempt, "Retrying store write");
        }

        match operation().await {
            Ok(result) => {
                if attempt > 1 {
                    tracing::info!(
                        operation = operation_name,
                        attempt,
                        elapsed_ms = start_time.elapsed().as_millis(),
                        "Store write succeeded after retry"
                    );
                }
                return Ok(result);
            }
            Err(err) if !err.is_transient() => return Err(err),
            Err(err) => {
                if attempt > policy.max_retries {
                    tracing::error!(
                        operation = operation_name,
                        attempt,
                        elapsed_ms = start_time.elapsed().as_millis(),
                        error = %err,
                        "Store write failed: retries exhausted"
                    );
                    return Err(err);
                }

                let delay = policy.delay_for(attempt);
                tracing::warn!(
                    operation = operation_name,
                    attempt,
                    delay_ms = delay.as_millis(),
                    error = %err,
                    "Store write failed, will retry after backoff"
                );
                tokio::time::sleep(delay).await;
            }
        }
    }
}
