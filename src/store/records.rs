use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// A user account together with its tokens and plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountRecord {
    /// Owning user id.
    #[serde(rename = "_id")]
    pub user_id: String,

    /// Every token of the user, across namespaces.
    #[serde(default)]
    pub tokens: Vec<TokenEntry>,

    /// Subscription plan.
    pub plan: PlanRecord,

    /// User-level opt-in to paid overage.
    #[serde(default)]
    pub allow_overage: bool,
}

/// One API token as stored on the account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenEntry {
    /// Stable token id used as the ledger key.
    #[serde(rename = "_id")]
    pub id: String,

    /// Raw token value presented by clients.
    pub value: String,

    /// Whether the token may be used.
    pub active: bool,
}

/// Quota plan attached to an account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanRecord {
    /// Daily request limit. `None` means unlimited.
    #[serde(default)]
    pub limit: Option<u64>,

    /// Display name.
    pub name: String,

    /// Plan type, e.g. `free`, `pro`, `dev`.
    #[serde(rename = "type")]
    pub plan_type: String,

    /// Whether the plan permits usage beyond `limit`.
    #[serde(default)]
    pub overage: bool,
}

/// Identity of one ledger row.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct UsageKey {
    /// Owning user.
    pub user_id: String,
    /// Token the usage was recorded against.
    pub token_id: String,
    /// UTC calendar day.
    pub date: NaiveDate,
}

impl UsageKey {
    /// Key for today's row (UTC).
    pub fn today(user_id: impl Into<String>, token_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            token_id: token_id.into(),
            date: Utc::now().date_naive(),
        }
    }
}

/// Batched change applied to a ledger row.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UsageDelta {
    /// Requests admitted since the last flush.
    pub count: u64,
    /// Requests admitted beyond the limit under overage.
    pub overage: u64,
}

/// A persisted ledger row.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UsageRow {
    /// Token the row belongs to.
    pub token_id: String,
    /// Total admitted requests for the day.
    pub count: u64,
    /// Total overage requests for the day.
    pub overage: u64,
    /// Last time a delta was applied.
    pub updated: Option<DateTime<Utc>>,
    /// First time overage was recorded. Never overwritten.
    pub overage_started: Option<DateTime<Utc>>,
}
