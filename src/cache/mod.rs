//! TTL read cache over the document store.

mod document_cache;
pub use document_cache::*;

mod escape;
pub use escape::*;
