use std::{
    collections::VecDeque,
    sync::{
        Mutex, PoisonError,
        atomic::{AtomicU64, AtomicUsize, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use dashmap::DashMap;

use crate::{
    StoreError,
    store::{
        AccountRecord, BulkWriteSummary, Document, DocumentStore, UsageDelta, UsageKey, UsageRow,
    },
};

/// Failure injected into the next store operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreFault {
    /// Fail with [`StoreError::Transient`].
    Transient,
    /// Fail with [`StoreError::Permanent`].
    Permanent,
}

/// In-process [`DocumentStore`].
///
/// Useful for tests and single-node deployments. Supports injected failures and
/// latency so callers can exercise the retry and deduplication paths.
#[derive(Debug, Default)]
pub struct MemoryDocumentStore {
    documents: DashMap<(String, String), Document>,
    accounts: DashMap<String, AccountRecord>,
    token_index: DashMap<String, String>,
    usage: DashMap<UsageKey, UsageRow>,

    faults: Mutex<VecDeque<StoreFault>>,
    latency_ms: AtomicU64,
    operations: AtomicUsize,
    account_lookups: AtomicUsize,
}

impl MemoryDocumentStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace an account and index its tokens.
    pub fn put_account(&self, account: AccountRecord) {
        if let Some(previous) = self.accounts.get(&account.user_id) {
            for token in &previous.tokens {
                self.token_index.remove(&token.value);
            }
        }

        for token in &account.tokens {
            self.token_index
                .insert(token.value.clone(), account.user_id.clone());
        }

        self.accounts.insert(account.user_id.clone(), account);
    }

    /// Overwrite a ledger row, e.g. to seed usage persisted by an earlier process.
    pub fn put_usage(&self, key: UsageKey, row: UsageRow) {
        self.usage.insert(key, row);
    }

    /// Current ledger row for `key`.
    pub fn usage_row(&self, key: &UsageKey) -> Option<UsageRow> {
        self.usage.get(key).map(|row| row.clone())
    }

    /// Stored document without any cache post-processing.
    pub fn raw_document(&self, table: &str, id: &str) -> Option<Document> {
        self.documents
            .get(&(table.to_string(), id.to_string()))
            .map(|doc| doc.clone())
    }

    /// Fail the next `times` operations with `fault`.
    pub fn inject_fault(&self, fault: StoreFault, times: usize) {
        let mut faults = self.faults.lock().unwrap_or_else(PoisonError::into_inner);
        faults.extend(std::iter::repeat_n(fault, times));
    }

    /// Delay every operation by `latency`.
    pub fn set_latency(&self, latency: Duration) {
        let latency_ms = u64::try_from(latency.as_millis()).unwrap_or(u64::MAX);
        self.latency_ms.store(latency_ms, Ordering::Relaxed);
    }

    /// Number of operations attempted, including failed ones.
    pub fn operations(&self) -> usize {
        self.operations.load(Ordering::Relaxed)
    }

    /// Number of account-by-token lookups attempted.
    pub fn account_lookups(&self) -> usize {
        self.account_lookups.load(Ordering::Relaxed)
    }

    async fn begin(&self) -> Result<(), StoreError> {
        self.operations.fetch_add(1, Ordering::Relaxed);

        let latency_ms = self.latency_ms.load(Ordering::Relaxed);
        if latency_ms > 0 {
            tokio::time::sleep(Duration::from_millis(latency_ms)).await;
        }

        let fault = self
            .faults
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front();

        match fault {
            None => Ok(()),
            Some(StoreFault::Transient) => Err(StoreError::Transient(
                "injected transient failure".to_string(),
            )),
            Some(StoreFault::Permanent) => Err(StoreError::Permanent(
                "injected permanent failure".to_string(),
            )),
        }
    }

    fn merge(&self, table: &str, id: &str, fields: Document) {
        self.documents
            .entry((table.to_string(), id.to_string()))
            .or_default()
            .extend(fields);
    }
}

#[async_trait]
impl DocumentStore for MemoryDocumentStore {
    async fn find_one(&self, table: &str, id: &str) -> Result<Option<Document>, StoreError> {
        self.begin().await?;
        Ok(self.raw_document(table, id))
    }

    async fn upsert(&self, table: &str, id: &str, fields: Document) -> Result<(), StoreError> {
        self.begin().await?;
        self.merge(table, id, fields);
        Ok(())
    }

    async fn bulk_upsert(
        &self,
        table: &str,
        items: Vec<(String, Document)>,
    ) -> Result<BulkWriteSummary, StoreError> {
        self.begin().await?;

        let mut summary = BulkWriteSummary::default();
        for (id, fields) in items {
            self.merge(table, &id, fields);
            summary.upserted += 1;
        }

        Ok(summary)
    }

    async fn find_account_by_token(
        &self,
        value: &str,
    ) -> Result<Option<AccountRecord>, StoreError> {
        self.account_lookups.fetch_add(1, Ordering::Relaxed);
        self.begin().await?;

        let Some(user_id) = self.token_index.get(value).map(|id| id.clone()) else {
            return Ok(None);
        };

        Ok(self.accounts.get(&user_id).map(|account| account.clone()))
    }

    async fn find_usage(
        &self,
        user_id: &str,
        date: NaiveDate,
    ) -> Result<Vec<UsageRow>, StoreError> {
        self.begin().await?;

        Ok(self
            .usage
            .iter()
            .filter(|entry| entry.key().user_id == user_id && entry.key().date == date)
            .map(|entry| entry.value().clone())
            .collect())
    }

    async fn increment_usage(
        &self,
        key: &UsageKey,
        delta: UsageDelta,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        self.begin().await?;

        let mut row = self.usage.entry(key.clone()).or_insert_with(|| UsageRow {
            token_id: key.token_id.clone(),
            ..UsageRow::default()
        });

        row.count += delta.count;
        row.updated = Some(now);

        if delta.overage > 0 {
            row.overage += delta.overage;
            row.overage_started.get_or_insert(now);
        }

        Ok(())
    }
}
