use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;

use crate::{
    QueueWorker, TallymanError,
    store::{DocumentStore, UsageDelta, UsageKey, retry::with_retry},
};

/// One flushed batch of usage for a single token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UsageCommit {
    /// Owning user.
    pub user: String,
    /// Ledger key of the token.
    pub token_id: String,
    /// Requests counted since the previous flush.
    pub count: u64,
    /// Overage requests counted since the previous flush.
    pub overage: u64,
}

/// Applies [`UsageCommit`]s to today's ledger rows.
pub struct UsageWorker {
    store: Arc<dyn DocumentStore>,
}

impl UsageWorker {
    /// Create a worker writing through `store`.
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl QueueWorker<UsageCommit> for UsageWorker {
    async fn process(&self, commit: &UsageCommit) -> Result<(), TallymanError> {
        let key = UsageKey::today(commit.user.as_str(), commit.token_id.as_str());
        let delta = UsageDelta {
            count: commit.count,
            overage: commit.overage,
        };
        let now = Utc::now();

        if let Err(err) =
            with_retry("increment_usage", || self.store.increment_usage(&key, delta, now)).await
        {
            tracing::error!(
                user = %commit.user,
                token_id = %commit.token_id,
                count = commit.count,
                overage = commit.overage,
                error = ?err,
                "usage.commit.error"
            );
            return Err(err.into());
        }

        Ok(())
    }
}
