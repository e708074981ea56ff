use std::{sync::Arc, time::Duration};

use crate::{
    FlushIntervalSeconds, WorkerCount,
    counter::{CounterOptions, TokenUsageCounter},
    store::{AccountRecord, MemoryDocumentStore, PlanRecord, TokenEntry, UsageKey, UsageRow},
};

pub(super) const USER: &str = "user-1";
pub(super) const TOKEN: &str = "abcdef123456";
pub(super) const TOKEN_ID: &str = "token-1";
pub(super) const DEV_TOKEN: &str = "dev-abcdef123456";
pub(super) const DEV_TOKEN_ID: &str = "token-dev";

pub(super) fn plan(limit: Option<u64>, plan_type: &str, overage: bool) -> PlanRecord {
    PlanRecord {
        limit,
        name: format!("{plan_type} plan"),
        plan_type: plan_type.to_string(),
        overage,
    }
}

pub(super) fn token_entry(id: &str, value: &str, active: bool) -> TokenEntry {
    TokenEntry {
        id: id.to_string(),
        value: value.to_string(),
        active,
    }
}

pub(super) fn account(plan: PlanRecord, allow_overage: bool) -> AccountRecord {
    AccountRecord {
        user_id: USER.to_string(),
        tokens: vec![
            token_entry(TOKEN_ID, TOKEN, true),
            token_entry(DEV_TOKEN_ID, DEV_TOKEN, true),
        ],
        plan,
        allow_overage,
    }
}

pub(super) fn store_with(account: AccountRecord) -> Arc<MemoryDocumentStore> {
    let store = Arc::new(MemoryDocumentStore::new());
    store.put_account(account);
    store
}

pub(super) fn seed_usage(store: &MemoryDocumentStore, token_id: &str, count: u64) {
    store.put_usage(
        UsageKey::today(USER, token_id),
        UsageRow {
            token_id: token_id.to_string(),
            count,
            ..UsageRow::default()
        },
    );
}

pub(super) fn counter_options(flush_interval_seconds: u64) -> CounterOptions {
    CounterOptions {
        flush_interval: FlushIntervalSeconds::try_from(flush_interval_seconds).unwrap(),
        worker_count: WorkerCount::try_from(2).unwrap(),
        ..CounterOptions::default()
    }
}

pub(super) fn counter(store: Arc<MemoryDocumentStore>) -> TokenUsageCounter {
    TokenUsageCounter::new("normal", store, counter_options(60))
}

/// Poll until the counter's workers have processed every flushed commit.
pub(super) async fn drain(counter: &TokenUsageCounter) {
    for _ in 0..500 {
        if counter.pending_commits() == 0 {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    panic!("commits were not processed in time");
}
