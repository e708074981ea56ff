use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};

use crate::{
    StoreError,
    store::{AccountRecord, UsageDelta, UsageKey, UsageRow},
};

/// A schemaless document: field name to JSON value.
pub type Document = serde_json::Map<String, serde_json::Value>;

/// Outcome of an unordered bulk write.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BulkWriteSummary {
    /// Items written.
    pub upserted: usize,
    /// Items that could not be written. Their failure did not block the others.
    pub failed: usize,
}

impl BulkWriteSummary {
    /// Whether every item was written.
    pub fn is_complete(&self) -> bool {
        self.failed == 0
    }
}

/// Remote document store shared by every counter and cache.
///
/// Each write is an independent upsert; implementations rely on the store's
/// per-document atomicity and never span transactions across documents.
///
/// Implementations should report connection-level problems as
/// [`StoreError::Transient`] (or an error whose
/// [`is_transient`](StoreError::is_transient) is true) so the caller can retry.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Fetch one document by id from `table`.
    async fn find_one(&self, table: &str, id: &str) -> Result<Option<Document>, StoreError>;

    /// Merge `fields` into the document `id`, creating it if absent.
    async fn upsert(&self, table: &str, id: &str, fields: Document) -> Result<(), StoreError>;

    /// Unordered bulk upsert. One item's failure must not prevent the others.
    async fn bulk_upsert(
        &self,
        table: &str,
        items: Vec<(String, Document)>,
    ) -> Result<BulkWriteSummary, StoreError>;

    /// Find the account owning a token with the given raw value.
    async fn find_account_by_token(&self, value: &str)
    -> Result<Option<AccountRecord>, StoreError>;

    /// All ledger rows of `user_id` for the UTC calendar day `date`.
    async fn find_usage(&self, user_id: &str, date: NaiveDate)
    -> Result<Vec<UsageRow>, StoreError>;

    /// Apply a batched usage delta to the ledger row `key`.
    ///
    /// Increments `count` (and `overage` when non-zero), stamps `updated = now`,
    /// and records `overage_started = now` only if the row has none yet and the
    /// delta carries overage. Creates the row when absent.
    async fn increment_usage(
        &self,
        key: &UsageKey,
        delta: UsageDelta,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError>;
}
