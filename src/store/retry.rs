use std::{future::Future, time::Duration};

use crate::StoreError;

/// Attempts made for an operation that keeps failing transiently.
pub const MAX_STORE_ATTEMPTS: usize = 5;

/// Pause between transient failures.
pub const STORE_RETRY_BACKOFF: Duration = Duration::from_millis(500);

/// Run a store operation, retrying transient failures with a fixed backoff.
///
/// Permanent failures are returned immediately. After
/// [`MAX_STORE_ATTEMPTS`] transient failures the last error is returned.
pub(crate) async fn with_retry<T, F, Fut>(operation: &'static str, mut f: F) -> Result<T, StoreError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, StoreError>>,
{
    let mut attempt = 1;

    loop {
        match f().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_transient() && attempt < MAX_STORE_ATTEMPTS => {
                tracing::warn!(operation, attempt, error = %err, "store.retry");
                tokio::time::sleep(STORE_RETRY_BACKOFF).await;
                attempt += 1;
            }
            Err(err) => {
                tracing::debug!(operation, attempt, error = %err, "store.abandoned");
                return Err(err);
            }
        }
    }
}
