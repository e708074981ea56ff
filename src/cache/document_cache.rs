use std::{collections::HashMap, sync::Arc};

use chrono::{DateTime, NaiveDateTime, SecondsFormat, TimeDelta, Utc};
use serde_json::Value;

use crate::{
    CacheTtl,
    cache::{escape, unescape},
    store::{BulkWriteSummary, Document, DocumentStore, retry::with_retry},
};

/// Field stamped on every cached document with its write time.
pub const TIMESTAMP_FIELD: &str = "timestamp";

/// Tables whose TTL differs from the default unless overridden, in minutes.
pub const BUILTIN_TABLE_TTLS: [(&str, u64); 1] = [("token", 15)];

/// Configuration for [`DocumentCache`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheOptions {
    /// TTL of tables without an override.
    pub default_ttl: CacheTtl,

    /// Per-table TTLs, merged over [`BUILTIN_TABLE_TTLS`].
    pub table_ttls: HashMap<String, CacheTtl>,
}

/// Read cache storing one document per `(table, key)` with a write timestamp.
///
/// Entries are never evicted; reads past the table's TTL return `None` unless
/// forced. Without a store every read misses and every write is dropped.
#[derive(Clone)]
pub struct DocumentCache {
    store: Option<Arc<dyn DocumentStore>>,
    default_ttl: TimeDelta,
    table_ttls: Arc<HashMap<String, TimeDelta>>,
}

impl DocumentCache {
    /// Create a cache over `store`.
    pub fn new(store: Option<Arc<dyn DocumentStore>>, options: CacheOptions) -> Self {
        let mut table_ttls: HashMap<String, TimeDelta> = BUILTIN_TABLE_TTLS
            .iter()
            .map(|(table, minutes)| {
                let minutes = i64::try_from(*minutes).unwrap_or(i64::MAX);
                (table.to_string(), TimeDelta::minutes(minutes))
            })
            .collect();

        for (table, ttl) in options.table_ttls {
            table_ttls.insert(table.to_lowercase(), to_time_delta(ttl));
        }

        Self {
            store,
            default_ttl: to_time_delta(options.default_ttl),
            table_ttls: Arc::new(table_ttls),
        }
    }

    /// Whether a store is configured.
    pub fn is_active(&self) -> bool {
        self.store.is_some()
    }

    /// TTL applied to `table`.
    pub fn ttl(&self, table: &str) -> TimeDelta {
        self.table_ttls
            .get(&table.to_lowercase())
            .copied()
            .unwrap_or(self.default_ttl)
    }

    /// Whether a document written at `timestamp` is too old to serve from `table`.
    ///
    /// A missing timestamp counts as expired.
    pub fn has_expired(&self, timestamp: Option<DateTime<Utc>>, table: &str) -> bool {
        let Some(timestamp) = timestamp else {
            return true;
        };

        match timestamp.checked_add_signed(self.ttl(table)) {
            Some(expires_at) => Utc::now() > expires_at,
            None => false,
        }
    }

    /// Cached document for `key`, if present and fresh.
    ///
    /// With `force` the document is returned whatever its age.
    pub async fn get(&self, table: &str, key: &str, force: bool) -> Option<Document> {
        let store = self.store.as_ref()?;
        let table = table.to_lowercase();

        let document = match with_retry("cache.find_one", || store.find_one(&table, key)).await {
            Ok(document) => document?,
            Err(err) => {
                tracing::error!(table = %table, key, error = ?err, "cache.get.error");
                return None;
            }
        };

        let mut value = Value::Object(document);
        unescape(&mut value);

        let Value::Object(document) = value else {
            return None;
        };

        if force {
            return Some(document);
        }

        let timestamp = document.get(TIMESTAMP_FIELD).and_then(parse_timestamp);
        if self.has_expired(timestamp, &table) {
            tracing::debug!(table = %table, key, "cache.get.expired");
            return None;
        }

        Some(document)
    } // end method get

    /// Merge `data` into the cached document for `key` and refresh its timestamp.
    ///
    /// `data` must be a JSON object; anything else is dropped with a warning.
    pub async fn update(&self, table: &str, key: &str, data: Value) {
        let Some(store) = self.store.as_ref() else {
            return;
        };
        let table = table.to_lowercase();

        let Some(fields) = prepare(data, Utc::now()) else {
            tracing::warn!(table = %table, key, "cache.update.invalid");
            return;
        };

        if let Err(err) =
            with_retry("cache.upsert", || store.upsert(&table, key, fields.clone())).await
        {
            tracing::error!(table = %table, key, error = ?err, "cache.update.error");
        }
    } // end method update

    /// Write many documents at once, pairing `keys` and `datas` by position.
    ///
    /// Unpaired keys or payloads are ignored. Payloads that are not JSON
    /// objects count as failed without blocking the rest.
    pub async fn update_many(
        &self,
        table: &str,
        keys: Vec<String>,
        datas: Vec<Value>,
    ) -> BulkWriteSummary {
        let mut summary = BulkWriteSummary::default();

        let Some(store) = self.store.as_ref() else {
            return summary;
        };
        let table = table.to_lowercase();

        if keys.len() != datas.len() {
            tracing::warn!(
                table = %table,
                keys = keys.len(),
                datas = datas.len(),
                "cache.update_many.mismatch"
            );
        }

        let now = Utc::now();
        let mut items = Vec::with_capacity(keys.len().min(datas.len()));

        for (key, data) in keys.into_iter().zip(datas) {
            match prepare(data, now) {
                Some(fields) => items.push((key, fields)),
                None => {
                    tracing::warn!(table = %table, key = %key, "cache.update_many.invalid");
                    summary.failed += 1;
                }
            }
        }

        if items.is_empty() {
            return summary;
        }

        let attempted = items.len();
        match with_retry("cache.bulk_upsert", || store.bulk_upsert(&table, items.clone())).await {
            Ok(written) => {
                summary.upserted += written.upserted;
                summary.failed += written.failed;
            }
            Err(err) => {
                tracing::error!(table = %table, attempted, error = ?err, "cache.update_many.error");
                summary.failed += attempted;
            }
        }

        summary
    } // end method update_many
}

fn to_time_delta(ttl: CacheTtl) -> TimeDelta {
    TimeDelta::from_std(*ttl).unwrap_or(TimeDelta::MAX)
}

fn prepare(mut data: Value, now: DateTime<Utc>) -> Option<Document> {
    escape(&mut data);

    let Value::Object(mut fields) = data else {
        return None;
    };

    fields.insert(
        TIMESTAMP_FIELD.to_string(),
        Value::String(now.to_rfc3339_opts(SecondsFormat::Micros, true)),
    );

    Some(fields)
}

/// Read a stored timestamp.
///
/// Accepts RFC 3339 strings and offset-less `YYYY-MM-DD[T ]HH:MM:SS[.f]`
/// strings, which are taken as UTC.
pub fn parse_timestamp(value: &Value) -> Option<DateTime<Utc>> {
    let raw = value.as_str()?;

    if let Ok(timestamp) = DateTime::parse_from_rfc3339(raw) {
        return Some(timestamp.with_timezone(&Utc));
    }

    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"]
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(raw, format).ok())
        .map(|timestamp| timestamp.and_utc())
}
