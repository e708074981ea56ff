use serde::{Deserialize, Serialize};

use crate::{TokenNamespace, counter::TokenData, token::TokenRow};

const FREE_PLAN: &str = "free";
const DEVELOPER_PLAN: &str = "dev";

/// An authenticated client token together with its plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Token {
    user: String,
    active: bool,
    value: String,
    limit: Option<u64>,
    name: String,
    #[serde(rename = "type")]
    plan_type: String,
    #[serde(default)]
    overage: bool,
    #[serde(default)]
    user_overage: bool,
}

impl Token {
    /// Build a token from a relational row; overage is never enabled there.
    pub fn from_row(value: impl Into<String>, row: TokenRow) -> Self {
        Self {
            user: row.user,
            active: row.active,
            value: value.into(),
            limit: row.limit,
            name: row.name,
            plan_type: row.plan_type,
            overage: false,
            user_overage: false,
        }
    }

    /// Owning user id.
    pub fn user(&self) -> &str {
        &self.user
    }

    /// Whether the token may be used.
    pub fn active(&self) -> bool {
        self.active
    }

    /// Raw token value.
    pub fn value(&self) -> &str {
        &self.value
    }

    /// Daily limit, `None` for unlimited.
    pub fn limit(&self) -> Option<u64> {
        self.limit
    }

    /// Plan name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Plan type.
    pub fn plan_type(&self) -> &str {
        &self.plan_type
    }

    /// Whether the plan allows overage.
    pub fn overage(&self) -> bool {
        self.overage
    }

    /// Whether the user opted in to overage.
    pub fn user_overage(&self) -> bool {
        self.user_overage
    }

    /// Counter namespace the token is metered in.
    pub fn namespace(&self) -> TokenNamespace {
        TokenNamespace::of(&self.value)
    }

    /// Active token on a developer plan.
    pub fn is_developer(&self) -> bool {
        self.active && self.plan_type == DEVELOPER_PLAN
    }

    /// Active token on any plan other than free or developer.
    pub fn is_paid(&self) -> bool {
        self.active && self.plan_type != FREE_PLAN && self.plan_type != DEVELOPER_PLAN
    }

    /// Active token whose plan type is one of `types`.
    pub fn valid_type(&self, types: &[&str]) -> bool {
        self.active && types.contains(&self.plan_type.as_str())
    }
}

impl From<TokenData> for Token {
    fn from(data: TokenData) -> Self {
        Self {
            user: data.user,
            active: data.active,
            value: data.value,
            limit: data.limit,
            name: data.name,
            plan_type: data.plan_type,
            overage: data.overage,
            user_overage: data.user_overage,
        }
    }
}

/// A token given either as its raw value or already resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenRef {
    /// Raw token value.
    Raw(String),
    /// Token returned by [`TokenManager::get`](crate::token::TokenManager::get).
    Resolved(Token),
}

impl TokenRef {
    /// Raw value of the referenced token.
    pub fn value(&self) -> &str {
        match self {
            Self::Raw(value) => value,
            Self::Resolved(token) => token.value(),
        }
    }
}

impl From<&str> for TokenRef {
    fn from(value: &str) -> Self {
        Self::Raw(value.to_string())
    }
}

impl From<String> for TokenRef {
    fn from(value: String) -> Self {
        Self::Raw(value)
    }
}

impl From<Token> for TokenRef {
    fn from(token: Token) -> Self {
        Self::Resolved(token)
    }
}

impl From<&Token> for TokenRef {
    fn from(token: &Token) -> Self {
        Self::Resolved(token.clone())
    }
}
