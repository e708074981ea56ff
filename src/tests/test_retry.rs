use std::sync::atomic::{AtomicUsize, Ordering};

use tokio::time::Instant;

use crate::{
    StoreError,
    store::{MAX_STORE_ATTEMPTS, STORE_RETRY_BACKOFF, retry::with_retry},
};

#[tokio::test(start_paused = true)]
async fn retries_transient_failures_until_success() {
    let attempts = &AtomicUsize::new(0);
    let started = Instant::now();

    let result = with_retry("test", move || async move {
        match attempts.fetch_add(1, Ordering::SeqCst) {
            0 | 1 => Err(StoreError::Transient("reconnecting".to_string())),
            _ => Ok(42),
        }
    })
    .await;

    assert_eq!(result.unwrap(), 42);
    assert_eq!(attempts.load(Ordering::SeqCst), 3);
    assert!(started.elapsed() >= STORE_RETRY_BACKOFF * 2);
}

#[tokio::test(start_paused = true)]
async fn permanent_failures_are_not_retried() {
    let attempts = &AtomicUsize::new(0);

    let result: Result<(), _> = with_retry("test", move || async move {
        attempts.fetch_add(1, Ordering::SeqCst);
        Err(StoreError::Permanent("duplicate key".to_string()))
    })
    .await;

    assert!(matches!(result, Err(StoreError::Permanent(_))));
    assert_eq!(attempts.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn gives_up_after_max_attempts() {
    let attempts = &AtomicUsize::new(0);
    let started = Instant::now();

    let result: Result<(), _> = with_retry("test", move || async move {
        attempts.fetch_add(1, Ordering::SeqCst);
        Err(StoreError::Transient("reconnecting".to_string()))
    })
    .await;

    assert!(matches!(result, Err(StoreError::Transient(_))));
    assert_eq!(attempts.load(Ordering::SeqCst), MAX_STORE_ATTEMPTS);
    assert!(started.elapsed() >= STORE_RETRY_BACKOFF * (MAX_STORE_ATTEMPTS as u32 - 1));
}
