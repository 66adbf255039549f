//! Resilience patterns for fault tolerance
//!
//! Provides:
//! - Circuit Breaker pattern with a sliding failure-rate window
//! - Time limiter that abandons (not cancels) overrunning operations
//!
//! These are the building blocks the executor composes around each
//! registered endpoint.

mod circuit_breaker;
mod time_limiter;

pub use circuit_breaker::{CallPermit, CircuitBreaker, CircuitState, Outcome};
pub use time_limiter::{run_bounded, TimeLimitExceeded};
