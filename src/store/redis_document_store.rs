use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use redis::{Script, aio::ConnectionManager};

use crate::{
    StoreError,
    store::{
        AccountRecord, BulkWriteSummary, Document, DocumentStore, RedisKey, RedisKeyGenerator,
        UsageDelta, UsageKey, UsageRow,
    },
};

const INCREMENT_USAGE_LUA: &str = r#"
    local usage_key = KEYS[1]
    local usage_index_key = KEYS[2]

    local token_id = ARGV[1]
    local count = tonumber(ARGV[2])
    local overage = tonumber(ARGV[3])
    local now = ARGV[4]

    redis.call("HINCRBY", usage_key, "count", count)

    if overage > 0 then
        redis.call("HINCRBY", usage_key, "overage", overage)
        redis.call("HSETNX", usage_key, "overage_started", now)
    end

    redis.call("HSET", usage_key, "token_id", token_id, "updated", now)
    redis.call("SADD", usage_index_key, token_id)

    return 1
"#;

/// Configuration for [`RedisDocumentStore`].
///
/// # Examples
///
/// ```ignore
/// use tallyman::store::{RedisDocumentStore, RedisDocumentStoreOptions, RedisKey};
///
/// let client = redis::Client::open("redis://127.0.0.1:6379/")?;
/// let connection_manager = client.get_connection_manager().await?;
///
/// let store = RedisDocumentStore::new(RedisDocumentStoreOptions {
///     connection_manager,
///     prefix: Some(RedisKey::try_from("myapp".to_string())?),
/// });
/// ```
#[derive(Clone)]
pub struct RedisDocumentStoreOptions {
    /// Redis connection manager from the `redis` crate.
    pub connection_manager: ConnectionManager,

    /// Prefix for every key. Defaults to `"tallyman"`.
    pub prefix: Option<RedisKey>,
}

/// [`DocumentStore`] backed by Redis.
///
/// Layout:
/// - documents are hashes at `<prefix>:doc:<table>:<id>`, one JSON-encoded value per field
/// - accounts are JSON strings at `<prefix>:account:<user>`, indexed by `<prefix>:token:<value>`
/// - ledger rows are hashes at `<prefix>:usage:<user>:<date>:<token>`, indexed by a set at
///   `<prefix>:usage:<user>:<date>`
///
/// `:` and `%` inside key parts are percent-encoded. Usage increments run as a
/// Lua script so each row update is atomic.
pub struct RedisDocumentStore {
    connection_manager: ConnectionManager,
    key_generator: RedisKeyGenerator,
    increment_usage_script: Script,
}

impl RedisDocumentStore {
    /// Create a store from `options`.
    pub fn new(options: RedisDocumentStoreOptions) -> Self {
        let prefix = options.prefix.unwrap_or_else(RedisKey::default_prefix);

        Self {
            connection_manager: options.connection_manager,
            key_generator: RedisKeyGenerator::new(prefix),
            increment_usage_script: Script::new(INCREMENT_USAGE_LUA),
        }
    }

    /// Insert or replace an account and index its tokens.
    ///
    /// Index entries of tokens dropped from a replaced account are removed in
    /// the same transaction.
    pub async fn put_account(&self, account: &AccountRecord) -> Result<(), StoreError> {
        let encoded = serde_json::to_string(account)?;
        let account_key = self.key_generator.account_key(&account.user_id);
        let mut connection_manager = self.connection_manager.clone();

        let previous: Option<String> = redis::cmd("GET")
            .arg(&account_key)
            .query_async(&mut connection_manager)
            .await?;
        let previous: Option<AccountRecord> = previous
            .map(|previous| serde_json::from_str(&previous))
            .transpose()?;

        let mut pipe = redis::Pipeline::new();
        pipe.atomic();

        for token in previous.iter().flat_map(|previous| &previous.tokens) {
            if account.tokens.iter().all(|kept| kept.value != token.value) {
                pipe.cmd("DEL")
                    .arg(self.key_generator.token_key(&token.value))
                    .ignore();
            }
        }

        pipe.cmd("SET")
            .arg(account_key)
            .arg(encoded)
            .ignore();

        for token in &account.tokens {
            pipe.cmd("SET")
                .arg(self.key_generator.token_key(&token.value))
                .arg(&account.user_id)
                .ignore();
        }

        pipe.query_async::<()>(&mut connection_manager).await?;

        Ok(())
    } // end method put_account

    fn hset_command(key: String, fields: &Document) -> Result<redis::Cmd, StoreError> {
        let encoded = fields
            .iter()
            .map(|(name, value)| Ok((name.as_str(), serde_json::to_string(value)?)))
            .collect::<Result<Vec<_>, StoreError>>()?;

        let mut cmd = redis::cmd("HSET");
        cmd.arg(key);
        for (name, value) in encoded {
            cmd.arg(name).arg(value);
        }

        Ok(cmd)
    }

    fn parse_row(token_id: String, fields: HashMap<String, String>) -> UsageRow {
        let number = |name: &str| {
            fields
                .get(name)
                .and_then(|value| value.parse::<u64>().ok())
                .unwrap_or(0)
        };
        let timestamp = |name: &str| {
            fields
                .get(name)
                .and_then(|value| DateTime::parse_from_rfc3339(value).ok())
                .map(|value| value.with_timezone(&Utc))
        };

        UsageRow {
            count: number("count"),
            overage: number("overage"),
            updated: timestamp("updated"),
            overage_started: timestamp("overage_started"),
            token_id,
        }
    }
}

#[async_trait]
impl DocumentStore for RedisDocumentStore {
    async fn find_one(&self, table: &str, id: &str) -> Result<Option<Document>, StoreError> {
        let mut connection_manager = self.connection_manager.clone();

        let fields: HashMap<String, String> = redis::cmd("HGETALL")
            .arg(self.key_generator.document_key(table, id))
            .query_async(&mut connection_manager)
            .await?;

        if fields.is_empty() {
            return Ok(None);
        }

        let mut document = Document::new();
        for (name, value) in fields {
            document.insert(name, serde_json::from_str(&value)?);
        }

        Ok(Some(document))
    }

    async fn upsert(&self, table: &str, id: &str, fields: Document) -> Result<(), StoreError> {
        if fields.is_empty() {
            return Ok(());
        }

        let cmd = Self::hset_command(self.key_generator.document_key(table, id), &fields)?;

        let mut connection_manager = self.connection_manager.clone();
        cmd.query_async::<()>(&mut connection_manager).await?;

        Ok(())
    }

    async fn bulk_upsert(
        &self,
        table: &str,
        items: Vec<(String, Document)>,
    ) -> Result<BulkWriteSummary, StoreError> {
        let mut summary = BulkWriteSummary::default();
        let mut pipe = redis::Pipeline::new();
        // Commands run independently; a failed one is reported in its reply slot.
        pipe.ignore_errors();
        let mut queued = Vec::with_capacity(items.len());

        for (id, fields) in &items {
            if fields.is_empty() {
                summary.upserted += 1;
                continue;
            }

            match Self::hset_command(self.key_generator.document_key(table, id), fields) {
                Ok(cmd) => {
                    pipe.add_command(cmd);
                    queued.push(id.as_str());
                }
                Err(err) => {
                    tracing::warn!(table, id = %id, error = ?err, "redis.bulk_upsert.skip");
                    summary.failed += 1;
                }
            }
        }

        if queued.is_empty() {
            return Ok(summary);
        }

        let mut connection_manager = self.connection_manager.clone();
        let replies: Vec<redis::Value> = match pipe.query_async(&mut connection_manager).await {
            Ok(replies) => replies,
            Err(err) => {
                tracing::error!(table, error = ?err, "redis.bulk_upsert.error");
                return Err(err.into());
            }
        };

        for (index, id) in queued.iter().enumerate() {
            match replies.get(index) {
                Some(redis::Value::ServerError(err)) => {
                    tracing::warn!(table, id = %id, error = ?err, "redis.bulk_upsert.item.error");
                    summary.failed += 1;
                }
                Some(_) => summary.upserted += 1,
                None => summary.failed += 1,
            }
        }

        Ok(summary)
    }

    async fn find_account_by_token(
        &self,
        value: &str,
    ) -> Result<Option<AccountRecord>, StoreError> {
        let mut connection_manager = self.connection_manager.clone();

        let user_id: Option<String> = redis::cmd("GET")
            .arg(self.key_generator.token_key(value))
            .query_async(&mut connection_manager)
            .await?;

        let Some(user_id) = user_id else {
            return Ok(None);
        };

        let encoded: Option<String> = redis::cmd("GET")
            .arg(self.key_generator.account_key(&user_id))
            .query_async(&mut connection_manager)
            .await?;

        match encoded {
            Some(encoded) => Ok(Some(serde_json::from_str(&encoded)?)),
            None => Ok(None),
        }
    }

    async fn find_usage(
        &self,
        user_id: &str,
        date: NaiveDate,
    ) -> Result<Vec<UsageRow>, StoreError> {
        let mut connection_manager = self.connection_manager.clone();

        let token_ids: Vec<String> = redis::cmd("SMEMBERS")
            .arg(self.key_generator.usage_index_key(user_id, date))
            .query_async(&mut connection_manager)
            .await?;

        let mut rows = Vec::with_capacity(token_ids.len());
        for token_id in token_ids {
            let key = UsageKey {
                user_id: user_id.to_string(),
                token_id,
                date,
            };

            let fields: HashMap<String, String> = redis::cmd("HGETALL")
                .arg(self.key_generator.usage_key(&key))
                .query_async(&mut connection_manager)
                .await?;

            rows.push(Self::parse_row(key.token_id, fields));
        }

        Ok(rows)
    }

    async fn increment_usage(
        &self,
        key: &UsageKey,
        delta: UsageDelta,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let mut connection_manager = self.connection_manager.clone();

        let _: i64 = self
            .increment_usage_script
            .key(self.key_generator.usage_key(key))
            .key(self.key_generator.usage_index_key(&key.user_id, key.date))
            .arg(&key.token_id)
            .arg(delta.count)
            .arg(delta.overage)
            .arg(now.to_rfc3339())
            .invoke_async(&mut connection_manager)
            .await?;

        Ok(())
    }
}
