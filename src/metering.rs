//! Top-level entrypoint that wires the store, the token counters and the cache.

use std::sync::Arc;

use crate::{
    cache::{CacheOptions, DocumentCache},
    counter::CounterOptions,
    store::DocumentStore,
    token::TokenManager,
};

/// Top-level configuration for [`Metering`].
#[derive(Clone, Default)]
pub struct MeteringOptions {
    /// Shared document store. `None` disables metering and caching.
    pub store: Option<Arc<dyn DocumentStore>>,
    /// Options for the token counters.
    pub counter: CounterOptions,
    /// Options for the document cache.
    pub cache: CacheOptions,
}

/// Metering entrypoint.
///
/// ```ignore
/// use std::sync::Arc;
/// use tallyman::{Metering, MeteringOptions, store::MemoryDocumentStore};
///
/// let metering = Metering::new(MeteringOptions {
///     store: Some(Arc::new(MemoryDocumentStore::new())),
///     ..Default::default()
/// });
///
/// let check = metering.tokens().check(Some("Bearer abcdef1234"), &[]).await;
/// metering.shutdown().await;
/// ```
pub struct Metering {
    tokens: TokenManager,
    cache: DocumentCache,
}

impl Metering {
    /// Create a new [`Metering`].
    ///
    /// With a store this must be called from within a tokio runtime.
    pub fn new(options: MeteringOptions) -> Self {
        Self {
            tokens: TokenManager::new(options.store.clone(), options.counter),
            cache: DocumentCache::new(options.store, options.cache),
        }
    }

    /// Whether a store is configured.
    pub fn active(&self) -> bool {
        self.tokens.active()
    }

    /// Access the token manager.
    pub fn tokens(&self) -> &TokenManager {
        &self.tokens
    }

    /// Access the document cache.
    pub fn cache(&self) -> &DocumentCache {
        &self.cache
    }

    /// Flush buffered usage and stop the background workers.
    pub async fn shutdown(&self) {
        self.tokens.clean().await;
    }
}
