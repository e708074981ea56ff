use std::{sync::Arc, time::Duration};

use crate::{
    TokenNamespace,
    counter::{BufferedCounter, CounterOptions, TokenUsageCounter},
    store::DocumentStore,
    token::{Token, TokenRef, parse_token},
};

/// Outcome of [`TokenManager::check`], in the order the checks run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenCheck {
    /// The request may proceed. `None` when metering is inactive.
    Allowed(Option<Token>),
    /// No token was supplied.
    Missing,
    /// The supplied token is malformed.
    Invalid,
    /// No account owns the token.
    NotFound,
    /// The token exists but is disabled.
    Inactive(Token),
    /// The token's plan is not accepted here.
    WrongPlan(Token),
    /// The token exceeded its daily limit.
    RateLimited(Token),
}

impl TokenCheck {
    /// Whether the request may proceed.
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allowed(_))
    }

    /// The resolved token, when one was found.
    pub fn token(&self) -> Option<&Token> {
        match self {
            Self::Allowed(token) => token.as_ref(),
            Self::Inactive(token) | Self::WrongPlan(token) | Self::RateLimited(token) => {
                Some(token)
            }
            Self::Missing | Self::Invalid | Self::NotFound => None,
        }
    }
}

struct TokenCounters {
    normal: Arc<TokenUsageCounter>,
    developer: Arc<TokenUsageCounter>,
}

/// Resolves and meters tokens, routing developer tokens to their own counter.
///
/// Without a store the manager is inactive: nothing is resolved and every
/// request is admitted.
pub struct TokenManager {
    counters: Option<TokenCounters>,
}

impl TokenManager {
    /// Create a manager over `store`.
    ///
    /// With a store this must be called from within a tokio runtime.
    pub fn new(store: Option<Arc<dyn DocumentStore>>, options: CounterOptions) -> Self {
        let counters = store.map(|store| TokenCounters {
            normal: Arc::new(TokenUsageCounter::new("normal", store.clone(), options)),
            developer: Arc::new(TokenUsageCounter::new("developer", store, options)),
        });

        Self { counters }
    }

    /// Whether a store is configured.
    pub fn active(&self) -> bool {
        self.counters.is_some()
    }

    /// Counter for regular tokens.
    pub fn normal(&self) -> Option<&Arc<TokenUsageCounter>> {
        self.counters.as_ref().map(|counters| &counters.normal)
    }

    /// Counter for developer tokens.
    pub fn developer(&self) -> Option<&Arc<TokenUsageCounter>> {
        self.counters.as_ref().map(|counters| &counters.developer)
    }

    fn counter_for(&self, value: &str) -> Option<&Arc<TokenUsageCounter>> {
        let counters = self.counters.as_ref()?;

        Some(match TokenNamespace::of(value) {
            TokenNamespace::Normal => &counters.normal,
            TokenNamespace::Developer => &counters.developer,
        })
    }

    /// Resolve a raw token value.
    pub async fn get(&self, value: &str) -> Option<Token> {
        let counter = self.counter_for(value)?;
        counter.get(value).await.map(Token::from)
    }

    /// Count one request for `token`. Returns `false` when it is over its limit
    /// or was not resolved first.
    pub fn increment(&self, token: impl Into<TokenRef>) -> bool {
        let token = token.into();

        match self.counter_for(token.value()) {
            Some(counter) => counter.add(token.value()),
            None => true,
        }
    }

    /// Authenticate and meter one request.
    ///
    /// `plan_types` restricts the accepted plans; empty accepts every plan.
    /// Developer tokens bypass the plan restriction.
    pub async fn check(&self, raw: Option<&str>, plan_types: &[&str]) -> TokenCheck {
        if !self.active() {
            return TokenCheck::Allowed(None);
        }

        let Some(raw) = raw.filter(|raw| !raw.trim().is_empty()) else {
            return TokenCheck::Missing;
        };

        let value = match parse_token(raw) {
            Ok(value) => value,
            Err(err) => {
                tracing::debug!(error = %err, "token.check.invalid");
                return TokenCheck::Invalid;
            }
        };

        let Some(token) = self.get(&value).await else {
            return TokenCheck::NotFound;
        };

        if !token.active() {
            return TokenCheck::Inactive(token);
        }

        if !plan_types.is_empty() && !token.is_developer() && !token.valid_type(plan_types) {
            return TokenCheck::WrongPlan(token);
        }

        if !self.increment(&token) {
            return TokenCheck::RateLimited(token);
        }

        TokenCheck::Allowed(Some(token))
    } // end method check

    /// Start the background flush task of both counters.
    pub fn run_flush_loop(&self, period: Duration) {
        if let Some(counters) = &self.counters {
            counters.normal.run_flush_loop(period);
            counters.developer.run_flush_loop(period);
        }
    }

    /// Flush both counters and wait until every count is persisted.
    pub async fn clean(&self) {
        if let Some(counters) = &self.counters {
            counters.normal.clean(true).await;
            counters.developer.clean(true).await;
        }
    }
}
