//! Async retry with exponential backoff

use std::time::Duration;

/// Delay before retry number `attempt` (1-based): `base * 2^(attempt - 1)`
pub fn backoff_delay(base_delay_ms: u64, attempt: u32) -> Duration {
    let factor = 2_u64.checked_pow(attempt.saturating_sub(1)).unwrap_or(u64::MAX);
    Duration::from_millis(base_delay_ms.saturating_mul(factor))
}

/// Retry an async operation with exponential backoff.
///
/// `max_attempts` counts every run, the first one included.
/// Returns `Ok(attempts)` on success, or `Err((error, attempts))` on failure.
pub async fn retry_with_backoff_async<F, Fut, E>(
    max_attempts: u32,
    base_delay_ms: u64,
    mut operation: F,
) -> Result<u32, (E, u32)>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<(), E>>,
    E: std::fmt::Display,
{
    let mut attempts = 0u32;

    loop {
        attempts += 1;
        match operation().await {
            Ok(()) => return Ok(attempts),
            Err(e) => {
                if attempts >= max_attempts {
                    return Err((e, attempts));
                }
                let delay = backoff_delay(base_delay_ms, attempts);
                tracing::warn!(
                    error = %e,
                    attempt = attempts,
                    max_attempts,
                    delay_ms = delay.as_millis(),
                    "Retrying after failure"
                );
                tokio::time::sleep(delay).await;
            }
        }
    }
}
