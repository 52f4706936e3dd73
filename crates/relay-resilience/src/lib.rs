//! # Relay Resilience
//!
//! Send rate limiting and timeouts for Relay.

pub mod rate_limiter;
pub mod timeout;

pub use rate_limiter::*;
pub use timeout::*;
