//! Rate limiting logic and state management.

mod ledger;
mod limiter;

pub use ledger::{ClientRecord, Ledger};
pub use limiter::{Decision, RateLimiter};
