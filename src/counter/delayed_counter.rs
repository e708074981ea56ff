use std::{
    sync::{Mutex, PoisonError},
    time::Duration,
};

use async_trait::async_trait;
use tokio::time::Instant;

use crate::FlushIntervalSeconds;

/// A counter that buffers writes in memory and flushes them in batches.
#[async_trait]
pub trait BufferedCounter: Send + Sync {
    /// Swap out the buffered state and enqueue it for persistence.
    fn update(&self);

    /// Flush one last time, then drain and stop the background workers.
    async fn clean(&self, wait: bool);
}

/// Buffered state of type `S` with a periodic flush deadline.
///
/// Callers mutate the live state through [`with_state`](Self::with_state) and
/// drain it with [`gather_data`](Self::gather_data). Both go through one mutex,
/// so every mutation lands in exactly one gathered snapshot.
#[derive(Debug)]
pub struct DelayedCounter<S> {
    state: Mutex<S>,
    deadline: Mutex<Instant>,
    interval: Duration,
}

impl<S: Default> DelayedCounter<S> {
    /// Create an empty counter whose first flush is due one interval from now.
    pub fn new(interval: FlushIntervalSeconds) -> Self {
        let interval = interval.as_duration();

        Self {
            state: Mutex::new(S::default()),
            deadline: Mutex::new(Instant::now() + interval),
            interval,
        }
    }

    /// Run `f` against the live state.
    ///
    /// `f` must not block: the state lock is held for its whole duration.
    pub fn with_state<R>(&self, f: impl FnOnce(&mut S) -> R) -> R {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut state)
    }

    /// Take the current state, leaving an empty one behind.
    pub fn gather_data(&self) -> S {
        self.gather_data_with(|_| S::default())
    }

    /// Take the current state, leaving `next(&current)` behind.
    ///
    /// The swap happens under the state lock, so no mutation can land between
    /// reading the old state and installing the new one.
    pub fn gather_data_with(&self, next: impl FnOnce(&S) -> S) -> S {
        self.with_state(|state| {
            let fresh = next(state);
            std::mem::replace(state, fresh)
        })
    }

    /// The flush interval.
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Whether the flush deadline has passed.
    pub fn is_due(&self) -> bool {
        Instant::now() >= *self.deadline.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Claim a due flush.
    ///
    /// Returns `true` for exactly one caller per deadline crossing, and pushes
    /// the deadline one interval ahead for everyone else.
    pub fn take_due(&self) -> bool {
        let mut deadline = self.deadline.lock().unwrap_or_else(PoisonError::into_inner);
        let now = Instant::now();

        if now < *deadline {
            return false;
        }

        *deadline = now + self.interval;
        true
    }

    /// Set the next deadline to one interval from now.
    pub fn advance_deadline(&self) {
        *self.deadline.lock().unwrap_or_else(PoisonError::into_inner) =
            Instant::now() + self.interval;
    }
}
