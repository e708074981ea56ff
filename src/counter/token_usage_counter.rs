use std::{
    collections::HashMap,
    sync::{Arc, Mutex, PoisonError},
    time::Duration,
};

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::{sync::watch, task::JoinHandle};

use crate::{
    DEVELOPER_TOKEN_LIMIT, FlushIntervalSeconds, TokenNamespace, WorkQueue, WorkerCount,
    counter::{BufferedCounter, DelayedCounter, UsageCommit, UsageWorker},
    store::{AccountRecord, DocumentStore, retry::with_retry},
};

/// Settings shared by every [`TokenUsageCounter`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CounterOptions {
    /// How often buffered counts are handed to the workers.
    pub flush_interval: FlushIntervalSeconds,
    /// Workers persisting flushed counts.
    pub worker_count: WorkerCount,
    /// Daily limit applied to developer tokens.
    pub developer_limit: u64,
}

impl Default for CounterOptions {
    fn default() -> Self {
        Self {
            flush_interval: FlushIntervalSeconds::default(),
            worker_count: WorkerCount::default(),
            developer_limit: DEVELOPER_TOKEN_LIMIT,
        }
    }
}

/// Token metadata merged with the owner's plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenData {
    /// Owning user id.
    pub user: String,
    /// Raw token value.
    pub value: String,
    /// Whether the token may be used.
    pub active: bool,
    /// Daily limit, `None` for unlimited.
    pub limit: Option<u64>,
    /// Plan name.
    pub name: String,
    /// Plan type.
    #[serde(rename = "type")]
    pub plan_type: String,
    /// Whether the plan allows usage beyond the limit.
    pub overage: bool,
    /// Whether the user opted in to overage.
    pub user_overage: bool,
}

impl TokenData {
    /// Requests beyond the limit are admitted only when both plan and user allow it.
    pub fn allows_overage(&self) -> bool {
        self.overage && self.user_overage
    }
}

/// In-flight usage of one token since the last flush.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CounterEntry {
    /// Token metadata.
    pub data: TokenData,
    /// Requests admitted or attempted.
    pub count: u64,
    /// Requests admitted beyond the limit.
    pub overage: u64,
    /// Ledger key of the token.
    pub token_id: String,
}

#[derive(Debug, Clone)]
enum FetchState {
    Fetching,
    Done(Option<TokenData>),
}

impl FetchState {
    fn is_done(&self) -> bool {
        matches!(self, Self::Done(_))
    }

    fn outcome(&self) -> Option<TokenData> {
        match self {
            Self::Fetching => None,
            Self::Done(data) => data.clone(),
        }
    }
}

#[derive(Debug)]
enum Slot {
    Pending(watch::Receiver<FetchState>),
    Ready(CounterEntry),
}

/// Buffered state of a [`TokenUsageCounter`].
///
/// `retired` holds the entries loaded before the last flush, with zeroed
/// counts, so a request resolved just before a flush can still be counted.
/// They are never returned by `get`; the next `get` reloads from the store.
#[derive(Debug, Default)]
pub(crate) struct UsageState {
    slots: HashMap<String, Slot>,
    user_totals: HashMap<String, u64>,
    retired: HashMap<String, CounterEntry>,
    retired_totals: HashMap<String, u64>,
}

impl UsageState {
    /// State installed by a flush: empty, except for the retired entries.
    ///
    /// Retired totals include the counts being flushed, which are on their
    /// way to the store but not yet visible in it.
    fn successor(&self) -> Self {
        let mut retired = HashMap::new();
        let mut retired_totals = HashMap::new();

        for (value, slot) in &self.slots {
            let Slot::Ready(entry) = slot else {
                continue;
            };

            let user = &entry.data.user;
            let total = retired_totals
                .entry(user.clone())
                .or_insert_with(|| self.user_totals.get(user).copied().unwrap_or(0));
            *total = total.saturating_add(entry.count);

            retired.insert(
                value.clone(),
                CounterEntry {
                    count: 0,
                    overage: 0,
                    ..entry.clone()
                },
            );
        }

        Self {
            retired,
            retired_totals,
            ..Self::default()
        }
    }

    fn remove_pending(&mut self, value: &str, receiver: &watch::Receiver<FetchState>) {
        if let Some(Slot::Pending(current)) = self.slots.get(value)
            && current.same_channel(receiver)
        {
            self.slots.remove(value);
        }
    }
}

enum Lookup {
    Ready(TokenData),
    Wait(watch::Receiver<FetchState>),
    Fetch(watch::Sender<FetchState>),
}

/// Marks an in-progress fetch. Releases the pending slot if dropped unfinished.
struct PendingFetch<'a> {
    counter: &'a DelayedCounter<UsageState>,
    value: &'a str,
    sender: watch::Sender<FetchState>,
    completed: bool,
}

impl PendingFetch<'_> {
    fn complete(mut self, outcome: Option<TokenData>) {
        self.completed = true;
        self.sender.send_replace(FetchState::Done(outcome));
    }
}

impl Drop for PendingFetch<'_> {
    fn drop(&mut self) {
        if self.completed {
            return;
        }

        let receiver = self.sender.subscribe();
        self.counter
            .with_state(|state| state.remove_pending(self.value, &receiver));
    }
}

struct LoadedAccount {
    user: String,
    total: u64,
    entries: Vec<CounterEntry>,
}

/// Daily token usage counter with write-behind persistence.
///
/// Call [`get`](Self::get) before [`add`](Self::add) for every request: `get`
/// loads the token, its siblings and the user's persisted usage on first
/// sight, `add` counts the request and decides admission from memory.
///
/// The persisted total is refreshed once per flush, so a user may overshoot
/// their limit by whatever was admitted in up to two flush intervals.
pub struct TokenUsageCounter {
    name: &'static str,
    store: Arc<dyn DocumentStore>,
    developer_limit: u64,
    counter: DelayedCounter<UsageState>,
    queue: WorkQueue<UsageCommit>,
    flush_loop: Mutex<Option<JoinHandle<()>>>,
}

impl TokenUsageCounter {
    /// Create a counter persisting through `store`.
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(name: &'static str, store: Arc<dyn DocumentStore>, options: CounterOptions) -> Self {
        let worker = Arc::new(UsageWorker::new(store.clone()));

        Self {
            name,
            store,
            developer_limit: options.developer_limit,
            counter: DelayedCounter::new(options.flush_interval),
            queue: WorkQueue::new(worker, options.worker_count),
            flush_loop: Mutex::new(None),
        }
    }

    /// Label used in logs.
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Fetch the metadata of `value`, loading it from the store on first sight.
    ///
    /// Concurrent calls for the same unseen token share one store fetch.
    /// Returns `None` when the token is unknown or the store is unreachable.
    pub async fn get(&self, value: &str) -> Option<TokenData> {
        if self.counter.take_due() {
            self.flush();
        }

        loop {
            let lookup = self.counter.with_state(|state| match state.slots.get(value) {
                Some(Slot::Ready(entry)) => Lookup::Ready(entry.data.clone()),
                Some(Slot::Pending(receiver)) => Lookup::Wait(receiver.clone()),
                None => {
                    let (sender, receiver) = watch::channel(FetchState::Fetching);
                    state
                        .slots
                        .insert(value.to_string(), Slot::Pending(receiver));
                    Lookup::Fetch(sender)
                }
            });

            match lookup {
                Lookup::Ready(data) => return Some(data),
                Lookup::Wait(mut receiver) => {
                    let outcome = receiver
                        .wait_for(FetchState::is_done)
                        .await
                        .map(|state| state.outcome());

                    match outcome {
                        Ok(outcome) => return outcome,
                        // The fetcher went away without finishing; try again.
                        Err(_) => self
                            .counter
                            .with_state(|state| state.remove_pending(value, &receiver)),
                    }
                }
                Lookup::Fetch(sender) => {
                    let pending = PendingFetch {
                        counter: &self.counter,
                        value,
                        sender,
                        completed: false,
                    };

                    return self.fetch(value, pending).await;
                }
            }
        }
    } // end method get

    async fn fetch(&self, value: &str, pending: PendingFetch<'_>) -> Option<TokenData> {
        let loaded = self.load(value).await;
        let receiver = pending.sender.subscribe();

        let outcome = self.counter.with_state(|state| {
            let Some(loaded) = loaded else {
                state.remove_pending(value, &receiver);
                return None;
            };

            state.user_totals.insert(loaded.user, loaded.total);

            let mut outcome = None;
            for entry in loaded.entries {
                if entry.data.value == value {
                    outcome = Some(entry.data.clone());
                }

                if !matches!(state.slots.get(&entry.data.value), Some(Slot::Ready(_))) {
                    state
                        .slots
                        .insert(entry.data.value.clone(), Slot::Ready(entry));
                }
            }

            if outcome.is_none() {
                state.remove_pending(value, &receiver);
            }

            outcome
        });

        pending.complete(outcome.clone());
        outcome
    } // end method fetch

    async fn load(&self, value: &str) -> Option<LoadedAccount> {
        let account = match with_retry("find_account_by_token", || {
            self.store.find_account_by_token(value)
        })
        .await
        {
            Ok(Some(account)) => account,
            Ok(None) => {
                tracing::debug!(counter = self.name, "usage.fetch.not_found");
                return None;
            }
            Err(err) => {
                tracing::error!(counter = self.name, error = ?err, "usage.fetch.error");
                return None;
            }
        };

        let namespace = TokenNamespace::of(value);
        let AccountRecord {
            user_id,
            tokens,
            plan,
            allow_overage,
        } = account;

        let tokens: Vec<_> = tokens
            .into_iter()
            .filter(|token| TokenNamespace::of(&token.value) == namespace)
            .collect();

        let limit = match namespace {
            TokenNamespace::Developer => Some(self.developer_limit),
            TokenNamespace::Normal => plan.limit,
        };

        let today = Utc::now().date_naive();
        let total: u64 = match with_retry("find_usage", || self.store.find_usage(&user_id, today)).await
        {
            Ok(rows) => rows
                .iter()
                .filter(|row| tokens.iter().any(|token| token.id == row.token_id))
                .fold(0_u64, |total, row| total.saturating_add(row.count)),
            Err(err) => {
                tracing::error!(counter = self.name, user = %user_id, error = ?err, "usage.fetch.totals.error");
                0
            }
        };

        let entries = tokens
            .into_iter()
            .map(|token| CounterEntry {
                data: TokenData {
                    user: user_id.clone(),
                    value: token.value,
                    active: token.active,
                    limit,
                    name: plan.name.clone(),
                    plan_type: plan.plan_type.clone(),
                    overage: plan.overage,
                    user_overage: allow_overage,
                },
                count: 0,
                overage: 0,
                token_id: token.id,
            })
            .collect();

        tracing::debug!(counter = self.name, user = %user_id, total, "usage.fetch");

        Some(LoadedAccount {
            user: user_id,
            total,
            entries,
        })
    } // end method load

    /// Count one request for `value` and decide whether it is admitted.
    ///
    /// Returns `false` for tokens that [`get`](Self::get) has not loaded since
    /// the flush before last. Tokens loaded before the last flush are counted
    /// against the totals carried over from it.
    pub fn add(&self, value: &str) -> bool {
        self.counter.with_state(|state| {
            let UsageState {
                slots,
                user_totals,
                retired,
                retired_totals,
            } = state;

            // A flush may have landed between this request's `get` and now.
            let (entry, totals) = match slots.get_mut(value) {
                Some(Slot::Ready(entry)) => (entry, &*user_totals),
                _ => match retired.get_mut(value) {
                    Some(entry) => (entry, &*retired_totals),
                    None => return false,
                },
            };

            entry.count += 1;

            let Some(limit) = entry.data.limit else {
                return true;
            };

            let total = totals.get(&entry.data.user).copied().unwrap_or(0);

            if total.saturating_add(entry.count) <= limit {
                return true;
            }

            if entry.data.allows_overage() {
                entry.overage += 1;
                return true;
            }

            false
        })
    } // end method add

    fn flush(&self) {
        let state = self.counter.gather_data_with(UsageState::successor);

        let ready = state.slots.into_values().filter_map(|slot| match slot {
            Slot::Ready(entry) => Some(entry),
            Slot::Pending(_) => None,
        });

        let mut commits = 0;
        for entry in ready.chain(state.retired.into_values()) {
            if entry.count == 0 {
                continue;
            }

            self.queue.add(UsageCommit {
                user: entry.data.user,
                token_id: entry.token_id,
                count: entry.count,
                overage: entry.overage,
            });
            commits += 1;
        }

        tracing::debug!(counter = self.name, commits, "usage.flush");
    }

    /// In-flight entry of `value`, if loaded.
    pub fn entry(&self, value: &str) -> Option<CounterEntry> {
        self.counter.with_state(|state| match state.slots.get(value) {
            Some(Slot::Ready(entry)) => Some(entry.clone()),
            _ => None,
        })
    }

    /// Whether a store fetch for `value` is in progress.
    pub fn is_fetching(&self, value: &str) -> bool {
        self.counter
            .with_state(|state| matches!(state.slots.get(value), Some(Slot::Pending(_))))
    }

    /// Persisted usage of `user` for today, as of the last fetch.
    pub fn user_total(&self, user: &str) -> Option<u64> {
        self.counter
            .with_state(|state| state.user_totals.get(user).copied())
    }

    /// Commits handed to the workers and not yet processed.
    pub fn pending_commits(&self) -> usize {
        self.queue.pending()
    }

    /// The flush interval.
    pub fn flush_interval(&self) -> Duration {
        self.counter.interval()
    }

    /// Start a background task that flushes whenever the deadline passes, so
    /// idle counters still persist their counts.
    ///
    /// The task checks every `period` and stops once the counter is dropped.
    /// Calling this while a loop is running is a no-op.
    pub fn run_flush_loop(self: &Arc<Self>, period: Duration) {
        let mut flush_loop = self
            .flush_loop
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        if flush_loop
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
        {
            return;
        }

        let counter = Arc::downgrade(self);
        let period = period.max(Duration::from_millis(1));

        *flush_loop = Some(tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);

            // Tokio's interval ticks immediately on first await.
            interval.tick().await;

            loop {
                interval.tick().await;

                let Some(counter) = counter.upgrade() else {
                    break;
                };

                if counter.counter.take_due() {
                    counter.flush();
                }
            }
        }));
    } // end method run_flush_loop

    /// Stop the background flush task. Idempotent.
    pub fn stop_flush_loop(&self) {
        let handle = self
            .flush_loop
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();

        if let Some(handle) = handle {
            handle.abort();
        }
    }
}

#[async_trait]
impl BufferedCounter for TokenUsageCounter {
    fn update(&self) {
        self.flush();
        self.counter.advance_deadline();
    }

    async fn clean(&self, wait: bool) {
        self.stop_flush_loop();
        self.update();
        self.queue.clean(wait).await;
    }
}

impl Drop for TokenUsageCounter {
    fn drop(&mut self) {
        self.stop_flush_loop();
    }
}
