#![cfg(feature = "redis-tokio")]

use std::{env, sync::Arc};

use chrono::{TimeDelta, Utc};
use serde_json::json;

use tallyman::counter::{BufferedCounter, CounterOptions, TokenUsageCounter};
use tallyman::store::{
    AccountRecord, Document, DocumentStore, PlanRecord, RedisDocumentStore,
    RedisDocumentStoreOptions, RedisKey, TokenEntry, UsageDelta, UsageKey,
};

fn redis_url() -> Option<String> {
    env::var("REDIS_URL").ok()
}

fn unique_prefix() -> RedisKey {
    let n: u64 = rand::random();
    RedisKey::try_from(format!("tallyman_test_{n}")).unwrap()
}

async fn build_store(url: &str) -> Arc<RedisDocumentStore> {
    build_store_with_prefix(url, unique_prefix()).await
}

async fn build_store_with_prefix(url: &str, prefix: RedisKey) -> Arc<RedisDocumentStore> {
    let client = redis::Client::open(url).unwrap();
    let connection_manager = client.get_connection_manager().await.unwrap();

    Arc::new(RedisDocumentStore::new(RedisDocumentStoreOptions {
        connection_manager,
        prefix: Some(prefix),
    }))
}

fn account(user_id: &str, token_value: &str) -> AccountRecord {
    AccountRecord {
        user_id: user_id.to_string(),
        tokens: vec![TokenEntry {
            id: format!("{user_id}-token"),
            value: token_value.to_string(),
            active: true,
        }],
        plan: PlanRecord {
            limit: Some(100),
            name: "Basic".to_string(),
            plan_type: "basic".to_string(),
            overage: false,
        },
        allow_overage: false,
    }
}

fn document(value: serde_json::Value) -> Document {
    value.as_object().unwrap().clone()
}

#[test]
fn accounts_are_found_by_token_value() {
    let Some(url) = redis_url() else {
        return;
    };

    let rt = tokio::runtime::Runtime::new().unwrap();
    rt.block_on(async {
        let store = build_store(&url).await;
        let record = account("user-1", "abcdef123456");
        store.put_account(&record).await.unwrap();

        let found = store
            .find_account_by_token("abcdef123456")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found, record);

        assert!(
            store
                .find_account_by_token("missing123456")
                .await
                .unwrap()
                .is_none()
        );
    });
}

#[test]
fn upsert_merges_fields() {
    let Some(url) = redis_url() else {
        return;
    };

    let rt = tokio::runtime::Runtime::new().unwrap();
    rt.block_on(async {
        let store = build_store(&url).await;

        store
            .upsert("token", "k", document(json!({"a": 1, "b": "x"})))
            .await
            .unwrap();
        store
            .upsert("token", "k", document(json!({"b": "y", "c": [1, 2]})))
            .await
            .unwrap();

        let found = store.find_one("token", "k").await.unwrap().unwrap();
        assert_eq!(found["a"], json!(1));
        assert_eq!(found["b"], json!("y"));
        assert_eq!(found["c"], json!([1, 2]));

        assert!(store.find_one("token", "other").await.unwrap().is_none());
    });
}

#[test]
fn bulk_upsert_writes_every_item() {
    let Some(url) = redis_url() else {
        return;
    };

    let rt = tokio::runtime::Runtime::new().unwrap();
    rt.block_on(async {
        let store = build_store(&url).await;

        let items = (0..5)
            .map(|i| (format!("k{i}"), document(json!({"i": i}))))
            .collect();
        let summary = store.bulk_upsert("token", items).await.unwrap();

        assert_eq!(summary.upserted, 5);
        assert_eq!(summary.failed, 0);

        let found = store.find_one("token", "k3").await.unwrap().unwrap();
        assert_eq!(found["i"], json!(3));
    });
}

#[test]
fn bulk_upsert_reports_items_that_fail_individually() {
    let Some(url) = redis_url() else {
        return;
    };

    let rt = tokio::runtime::Runtime::new().unwrap();
    rt.block_on(async {
        let prefix = unique_prefix();
        let store = build_store_with_prefix(&url, prefix.clone()).await;

        // A plain string where a hash is expected makes HSET fail with WRONGTYPE.
        let client = redis::Client::open(url.as_str()).unwrap();
        let mut connection_manager = client.get_connection_manager().await.unwrap();
        let _: () = redis::cmd("SET")
            .arg(format!("{}:doc:token:k1", &**prefix))
            .arg("not a hash")
            .query_async(&mut connection_manager)
            .await
            .unwrap();

        let items = (0..3)
            .map(|i| (format!("k{i}"), document(json!({"i": i}))))
            .collect();
        let summary = store.bulk_upsert("token", items).await.unwrap();

        assert_eq!(summary.upserted, 2);
        assert_eq!(summary.failed, 1);

        assert_eq!(store.find_one("token", "k0").await.unwrap().unwrap()["i"], json!(0));
        assert_eq!(store.find_one("token", "k2").await.unwrap().unwrap()["i"], json!(2));
    });
}

#[test]
fn replacing_an_account_unindexes_removed_tokens() {
    let Some(url) = redis_url() else {
        return;
    };

    let rt = tokio::runtime::Runtime::new().unwrap();
    rt.block_on(async {
        let store = build_store(&url).await;

        let mut record = account("user-1", "abcdef123456");
        record.tokens.push(TokenEntry {
            id: "user-1-second".to_string(),
            value: "second123456".to_string(),
            active: true,
        });
        store.put_account(&record).await.unwrap();
        assert!(
            store
                .find_account_by_token("second123456")
                .await
                .unwrap()
                .is_some()
        );

        record.tokens.truncate(1);
        store.put_account(&record).await.unwrap();

        assert!(
            store
                .find_account_by_token("second123456")
                .await
                .unwrap()
                .is_none()
        );
        assert_eq!(
            store
                .find_account_by_token("abcdef123456")
                .await
                .unwrap()
                .unwrap(),
            record
        );
    });
}

#[test]
fn keys_with_colons_do_not_collide() {
    let Some(url) = redis_url() else {
        return;
    };

    let rt = tokio::runtime::Runtime::new().unwrap();
    rt.block_on(async {
        let store = build_store(&url).await;

        store
            .upsert("a:b", "c", document(json!({"which": 1})))
            .await
            .unwrap();
        store
            .upsert("a", "b:c", document(json!({"which": 2})))
            .await
            .unwrap();

        assert_eq!(store.find_one("a:b", "c").await.unwrap().unwrap()["which"], json!(1));
        assert_eq!(store.find_one("a", "b:c").await.unwrap().unwrap()["which"], json!(2));
    });
}

#[test]
fn increment_usage_accumulates_and_keeps_first_overage_time() {
    let Some(url) = redis_url() else {
        return;
    };

    let rt = tokio::runtime::Runtime::new().unwrap();
    rt.block_on(async {
        let store = build_store(&url).await;
        let key = UsageKey::today("user-1", "token-1");

        let first = Utc::now();
        let later = first + TimeDelta::minutes(5);

        store
            .increment_usage(&key, UsageDelta { count: 3, overage: 0 }, first)
            .await
            .unwrap();
        store
            .increment_usage(&key, UsageDelta { count: 2, overage: 2 }, first)
            .await
            .unwrap();
        store
            .increment_usage(&key, UsageDelta { count: 1, overage: 1 }, later)
            .await
            .unwrap();

        let rows = store.find_usage("user-1", key.date).await.unwrap();
        assert_eq!(rows.len(), 1);

        let row = &rows[0];
        assert_eq!(row.token_id, "token-1");
        assert_eq!(row.count, 6);
        assert_eq!(row.overage, 3);
        assert_eq!(row.overage_started.unwrap().timestamp(), first.timestamp());
        assert_eq!(row.updated.unwrap().timestamp(), later.timestamp());

        let yesterday = key.date.pred_opt().unwrap();
        assert!(store.find_usage("user-1", yesterday).await.unwrap().is_empty());
    });
}

#[test]
fn counter_flushes_into_redis_ledger() {
    let Some(url) = redis_url() else {
        return;
    };

    let rt = tokio::runtime::Runtime::new().unwrap();
    rt.block_on(async {
        let store = build_store(&url).await;
        store
            .put_account(&account("user-1", "abcdef123456"))
            .await
            .unwrap();

        let counter = TokenUsageCounter::new("normal", store.clone(), CounterOptions::default());

        let data = counter.get("abcdef123456").await.unwrap();
        assert_eq!(data.limit, Some(100));

        for _ in 0..4 {
            assert!(counter.add("abcdef123456"));
        }

        counter.clean(true).await;

        let rows = store
            .find_usage("user-1", Utc::now().date_naive())
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].token_id, "user-1-token");
        assert_eq!(rows[0].count, 4);
    });
}
