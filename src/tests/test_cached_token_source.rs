use std::{
    collections::HashMap,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
};

use async_trait::async_trait;
use chrono::{SecondsFormat, TimeDelta, Utc};
use serde_json::json;

use crate::{
    StoreError,
    cache::{CacheOptions, DocumentCache, TIMESTAMP_FIELD},
    store::{DocumentStore, MemoryDocumentStore},
    token::{CachedTokenSource, TOKEN_TABLE, TokenRow, TokenSource},
};

#[derive(Default)]
struct SqlTokens {
    rows: HashMap<String, TokenRow>,
    queries: AtomicUsize,
}

#[async_trait]
impl TokenSource for SqlTokens {
    async fn find_token(&self, value: &str) -> Result<Option<TokenRow>, StoreError> {
        self.queries.fetch_add(1, Ordering::SeqCst);
        Ok(self.rows.get(value).cloned())
    }
}

fn row(plan_type: &str) -> TokenRow {
    TokenRow {
        user: "user-1".to_string(),
        active: true,
        limit: Some(1000),
        name: "Plan".to_string(),
        plan_type: plan_type.to_string(),
    }
}

fn source_with(store: &Arc<MemoryDocumentStore>) -> CachedTokenSource<SqlTokens> {
    let mut tokens = SqlTokens::default();
    tokens.rows.insert("abcdef123456".to_string(), row("pro"));

    CachedTokenSource::new(
        tokens,
        DocumentCache::new(Some(store.clone()), CacheOptions::default()),
    )
}

#[tokio::test]
async fn second_lookup_is_served_from_cache() {
    let store = Arc::new(MemoryDocumentStore::new());
    let source = source_with(&store);

    let first = source.get("abcdef123456").await.unwrap();
    let second = source.get("abcdef123456").await.unwrap();

    assert_eq!(first, second);
    assert_eq!(first.plan_type(), "pro");
    assert_eq!(source.source().queries.load(Ordering::SeqCst), 1);

    let cached = store.raw_document(TOKEN_TABLE, "abcdef123456").unwrap();
    assert_eq!(cached["type"], json!("pro"));
}

#[tokio::test]
async fn unknown_tokens_are_not_cached() {
    let store = Arc::new(MemoryDocumentStore::new());
    let source = source_with(&store);

    assert!(source.get("missing123456").await.is_none());
    assert!(source.get("missing123456").await.is_none());

    assert_eq!(source.source().queries.load(Ordering::SeqCst), 2);
    assert!(store.raw_document(TOKEN_TABLE, "missing123456").is_none());
}

#[tokio::test]
async fn stale_cache_entries_are_refreshed() {
    let store = Arc::new(MemoryDocumentStore::new());
    let source = source_with(&store);

    let mut stale = serde_json::to_value(row("free"))
        .unwrap()
        .as_object()
        .unwrap()
        .clone();
    stale.insert(
        TIMESTAMP_FIELD.to_string(),
        json!((Utc::now() - TimeDelta::minutes(20)).to_rfc3339_opts(SecondsFormat::Secs, true)),
    );
    store
        .upsert(TOKEN_TABLE, "abcdef123456", stale)
        .await
        .unwrap();

    let token = source.get("abcdef123456").await.unwrap();
    assert_eq!(token.plan_type(), "pro");
    assert_eq!(source.source().queries.load(Ordering::SeqCst), 1);
}
