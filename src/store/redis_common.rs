use std::{borrow::Cow, ops::Deref, sync::Arc};

use chrono::NaiveDate;

use crate::{TallymanError, store::UsageKey};

/// A validated newtype for Redis keys.
///
/// This is a string with the following constraints:
/// - Must not be empty
/// - Must not be longer than 255 bytes
/// - Must not contain colons
#[derive(Debug, Clone, PartialEq, PartialOrd, Hash, Eq)]
pub struct RedisKey(Arc<str>);

impl RedisKey {
    /// Create a new default prefix.
    pub fn default_prefix() -> Self {
        Self(Arc::from("tallyman"))
    }
}

impl Deref for RedisKey {
    type Target = Arc<str>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl TryFrom<String> for RedisKey {
    type Error = TallymanError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        if value.is_empty() {
            Err(TallymanError::InvalidRedisKey(
                "Redis key must not be empty".to_string(),
            ))
        } else if value.len() > 255 {
            Err(TallymanError::InvalidRedisKey(
                "Redis key must not be longer than 255 characters".to_string(),
            ))
        } else if value.contains(':') {
            Err(TallymanError::InvalidRedisKey(
                "Redis key must not contain colons".to_string(),
            ))
        } else {
            Ok(Self(Arc::from(value)))
        }
    }
}

/// Escape `%` and `:` so a caller-supplied part cannot span key segments.
pub(crate) fn key_segment(part: &str) -> Cow<'_, str> {
    if part.contains([':', '%']) {
        Cow::Owned(part.replace('%', "%25").replace(':', "%3A"))
    } else {
        Cow::Borrowed(part)
    }
}

/// Builds every key the Redis store touches under one prefix.
#[derive(Clone, Debug)]
pub(crate) struct RedisKeyGenerator {
    prefix: RedisKey,
}

impl RedisKeyGenerator {
    pub(crate) fn new(prefix: RedisKey) -> Self {
        Self { prefix }
    }

    pub(crate) fn document_key(&self, table: &str, id: &str) -> String {
        format!(
            "{}:doc:{}:{}",
            *self.prefix,
            key_segment(table),
            key_segment(id)
        )
    }

    pub(crate) fn account_key(&self, user_id: &str) -> String {
        format!("{}:account:{}", *self.prefix, key_segment(user_id))
    }

    pub(crate) fn token_key(&self, value: &str) -> String {
        format!("{}:token:{}", *self.prefix, key_segment(value))
    }

    pub(crate) fn usage_index_key(&self, user_id: &str, date: NaiveDate) -> String {
        format!("{}:usage:{}:{}", *self.prefix, key_segment(user_id), date)
    }

    pub(crate) fn usage_key(&self, key: &UsageKey) -> String {
        format!(
            "{}:{}",
            self.usage_index_key(&key.user_id, key.date),
            key_segment(&key.token_id)
        )
    }
}
