//! Persistence seam shared by the counters and the document cache.

mod document_store;
pub use document_store::*;

mod records;
pub use records::*;

mod memory_store;
pub use memory_store::*;

pub(crate) mod retry;
pub use retry::{MAX_STORE_ATTEMPTS, STORE_RETRY_BACKOFF};

#[cfg(feature = "redis-tokio")]
mod redis_common;
#[cfg(feature = "redis-tokio")]
pub use redis_common::RedisKey;
#[cfg(feature = "redis-tokio")]
pub(crate) use redis_common::RedisKeyGenerator;

#[cfg(feature = "redis-tokio")]
mod redis_document_store;
#[cfg(feature = "redis-tokio")]
pub use redis_document_store::*;
