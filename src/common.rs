use std::{ops::Deref, time::Duration};

use crate::TallymanError;

/// Value prefix reserved for developer tokens.
pub const DEVELOPER_TOKEN_PREFIX: &str = "dev-";

/// Fixed daily limit granted to developer tokens regardless of the stored plan.
pub const DEVELOPER_TOKEN_LIMIT: u64 = 4000;

/// Which counter namespace a raw token value belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TokenNamespace {
    /// Regular customer tokens.
    Normal,
    /// Tokens whose value starts with [`DEVELOPER_TOKEN_PREFIX`].
    Developer,
}

impl TokenNamespace {
    /// Classify a raw token value by its prefix.
    pub fn of(value: &str) -> Self {
        if value.starts_with(DEVELOPER_TOKEN_PREFIX) {
            Self::Developer
        } else {
            Self::Normal
        }
    }

    /// Short label used in logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Normal => "normal",
            Self::Developer => "developer",
        }
    }
}

/// Period after which buffered counts are drained to the worker queue.
///
/// Usage totals used for admission may lag in-flight state by up to twice this
/// interval.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct FlushIntervalSeconds(u64);

impl FlushIntervalSeconds {
    /// The interval as a [`Duration`].
    pub fn as_duration(&self) -> Duration {
        Duration::from_secs(self.0)
    }
}

impl Default for FlushIntervalSeconds {
    /// Returns a flush interval of 60 seconds.
    fn default() -> Self {
        Self(60)
    }
}

impl Deref for FlushIntervalSeconds {
    type Target = u64;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl TryFrom<u64> for FlushIntervalSeconds {
    type Error = TallymanError;

    fn try_from(value: u64) -> Result<Self, Self::Error> {
        if value == 0 {
            Err(TallymanError::InvalidFlushInterval(
                "Flush interval must be at least 1 second".to_string(),
            ))
        } else {
            Ok(Self(value))
        }
    }
}

/// Number of background workers consuming a [`WorkQueue`](crate::WorkQueue).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct WorkerCount(usize);

impl Default for WorkerCount {
    /// Returns 3 workers.
    fn default() -> Self {
        Self(3)
    }
}

impl Deref for WorkerCount {
    type Target = usize;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl TryFrom<usize> for WorkerCount {
    type Error = TallymanError;

    fn try_from(value: usize) -> Result<Self, Self::Error> {
        if value == 0 {
            Err(TallymanError::InvalidWorkerCount(
                "Worker count must be greater than 0".to_string(),
            ))
        } else {
            Ok(Self(value))
        }
    }
}

/// Maximum age of a cached document before it stops being served.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct CacheTtl(Duration);

impl CacheTtl {
    /// Build a TTL from whole minutes.
    pub fn from_minutes(minutes: u64) -> Result<Self, TallymanError> {
        Self::try_from(Duration::from_secs(minutes.saturating_mul(60)))
    }
}

impl Default for CacheTtl {
    /// Returns a TTL of 2 minutes.
    fn default() -> Self {
        Self(Duration::from_secs(2 * 60))
    }
}

impl Deref for CacheTtl {
    type Target = Duration;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl TryFrom<Duration> for CacheTtl {
    type Error = TallymanError;

    fn try_from(value: Duration) -> Result<Self, Self::Error> {
        if value.is_zero() {
            Err(TallymanError::InvalidCacheTtl(
                "Cache ttl must be greater than 0".to_string(),
            ))
        } else {
            Ok(Self(value))
        }
    }
}
