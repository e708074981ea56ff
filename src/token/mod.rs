//! Token resolution, validation and metering.

#[allow(clippy::module_inception)]
mod token;
pub use token::*;

mod token_manager;
pub use token_manager::*;

mod token_source;
pub use token_source::*;

mod validate;
pub use validate::*;
