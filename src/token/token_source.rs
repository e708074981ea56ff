use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::{
    StoreError,
    cache::DocumentCache,
    store::retry::with_retry,
    token::Token,
};

/// Cache table holding token rows.
pub const TOKEN_TABLE: &str = "token";

/// Token metadata as returned by a relational lookup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenRow {
    /// Owning user id.
    pub user: String,
    /// Whether the token may be used.
    pub active: bool,
    /// Daily limit, `None` for unlimited.
    pub limit: Option<u64>,
    /// Plan name.
    pub name: String,
    /// Plan type.
    #[serde(rename = "type")]
    pub plan_type: String,
}

/// Looks up token metadata held outside the document store, e.g. in SQL.
///
/// Implementations run one parameterized query keyed by the raw value.
#[async_trait]
pub trait TokenSource: Send + Sync {
    /// The row for `value`, if any.
    async fn find_token(&self, value: &str) -> Result<Option<TokenRow>, StoreError>;
}

/// A [`TokenSource`] fronted by the [`TOKEN_TABLE`] cache table.
pub struct CachedTokenSource<S> {
    source: S,
    cache: DocumentCache,
}

impl<S: TokenSource> CachedTokenSource<S> {
    /// Wrap `source` with `cache`.
    pub fn new(source: S, cache: DocumentCache) -> Self {
        Self { source, cache }
    }

    /// The wrapped source.
    pub fn source(&self) -> &S {
        &self.source
    }

    /// Resolve `value`, serving fresh cached rows without touching the source.
    ///
    /// Unknown tokens are not cached.
    pub async fn get(&self, value: &str) -> Option<Token> {
        if let Some(document) = self.cache.get(TOKEN_TABLE, value, false).await {
            match serde_json::from_value::<TokenRow>(document.into()) {
                Ok(row) => return Some(Token::from_row(value, row)),
                Err(err) => {
                    tracing::warn!(error = ?err, "token_source.cache.invalid");
                }
            }
        }

        let row = match with_retry("find_token", || self.source.find_token(value)).await {
            Ok(row) => row?,
            Err(err) => {
                tracing::error!(error = ?err, "token_source.find.error");
                return None;
            }
        };

        match serde_json::to_value(&row) {
            Ok(data) => self.cache.update(TOKEN_TABLE, value, data).await,
            Err(err) => tracing::warn!(error = ?err, "token_source.cache.encode"),
        }

        Some(Token::from_row(value, row))
    }
}
