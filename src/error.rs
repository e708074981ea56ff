/// Error type for this crate.
#[derive(Debug, thiserror::Error)]
pub enum TallymanError {
    /// Flush interval outside the accepted range.
    #[error("invalid flush interval: {0}")]
    InvalidFlushInterval(String),

    /// Worker count outside the accepted range.
    #[error("invalid worker count: {0}")]
    InvalidWorkerCount(String),

    /// Cache time-to-live outside the accepted range.
    #[error("invalid cache ttl: {0}")]
    InvalidCacheTtl(String),

    /// Raw token string rejected before any store access.
    #[error("invalid token: {0}")]
    InvalidToken(String),

    /// Redis key does not satisfy [`RedisKey`](crate::store::RedisKey) constraints.
    #[cfg(feature = "redis-tokio")]
    #[error("invalid redis key: {0}")]
    InvalidRedisKey(String),

    /// Backing store failure.
    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

/// Failure reported by a [`DocumentStore`](crate::store::DocumentStore) backend.
///
/// Transient failures are retried by the store handler; everything else is
/// treated as "no data" by the metering core.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Connection-level failure worth retrying (reconnect, timeout).
    #[error("transient store failure: {0}")]
    Transient(String),

    /// Operation rejected by the store. Never retried.
    #[error("store operation failed: {0}")]
    Permanent(String),

    /// Document could not be encoded or decoded.
    #[error("document serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Redis error.
    #[cfg(feature = "redis-tokio")]
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),
}

impl StoreError {
    /// Whether the failed operation may succeed if attempted again.
    pub fn is_transient(&self) -> bool {
        match self {
            StoreError::Transient(_) => true,
            #[cfg(feature = "redis-tokio")]
            StoreError::Redis(err) => {
                err.is_io_error()
                    || err.is_timeout()
                    || err.is_connection_dropped()
                    || err.is_connection_refusal()
            }
            _ => false,
        }
    }
}
