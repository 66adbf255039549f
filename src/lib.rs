//! faultgate
//!
//! Resilient remote-call execution: a circuit breaker and a time limiter
//! composed around named endpoints.
//!
//! Architecture:
//! - Endpoints are registered once at startup (name + async call function +
//!   resilience configuration), then the registry is frozen
//! - Every call asks the endpoint's circuit breaker for admission, runs under
//!   a time bound, and reports its outcome back to the breaker
//! - The library performs no I/O and no retries; transport lives inside the
//!   registered call functions, retry policy is composed around [`execute`]
//!
//! ```text
//! caller -> ResilientExecutor::execute(name, args)
//!            -> Registry::resolve(name)
//!            -> CircuitBreaker::try_admit()     (fail fast when open)
//!            -> run_bounded(call(args), limit)  (timeout = failure)
//!            -> CircuitBreaker::record_outcome(...)
//! ```
//!
//! [`execute`]: ResilientExecutor::execute

pub mod config;
pub mod error;
pub mod executor;
pub mod registry;
pub mod resilience;

pub use config::{
    BreakerConfig, BreakerOverrides, EndpointOverrides, RegistryConfig, TimeLimiterConfig,
    TimeLimiterOverrides,
};
pub use error::{CallError, ErrorKind, UpstreamError};
pub use executor::ResilientExecutor;
pub use registry::{CallFn, EndpointRegistration, EndpointSnapshot, Registry, RegistryBuilder};
pub use resilience::{
    run_bounded, CallPermit, CircuitBreaker, CircuitState, Outcome, TimeLimitExceeded,
};
