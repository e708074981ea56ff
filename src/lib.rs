#![doc = include_str!("../README.md")]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

mod metering;
pub use metering::*;

mod queue;
pub use queue::*;

pub mod cache;
pub mod counter;
pub mod store;
pub mod token;

mod error;
pub use error::*;

mod common;
pub use common::{
    CacheTtl, DEVELOPER_TOKEN_LIMIT, DEVELOPER_TOKEN_PREFIX, FlushIntervalSeconds, TokenNamespace,
    WorkerCount,
};

#[cfg(test)]
mod tests;
