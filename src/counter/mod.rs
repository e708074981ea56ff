//! Write-behind counters.

mod delayed_counter;
pub use delayed_counter::*;

mod token_usage_counter;
pub use token_usage_counter::*;

mod usage_worker;
pub use usage_worker::*;
