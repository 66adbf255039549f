//! Endpoint registry
//!
//! Maps a logical client name to its call function and resilience
//! configuration. Registration happens during a startup phase through
//! [`RegistryBuilder`]; the built [`Registry`] is immutable, so lookups at
//! call time need no synchronization.
//!
//! Configuration is resolved per endpoint as: global defaults, then
//! config-file overrides for the name, then overrides passed to
//! `register_with`. Later layers win field by field.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use futures::future::BoxFuture;
use futures::FutureExt;
use serde::Serialize;
use serde_json::Value;
use tracing::{info, warn};

use crate::config::{BreakerConfig, EndpointOverrides, RegistryConfig, TimeLimiterConfig};
use crate::error::{CallError, UpstreamError};
use crate::resilience::CircuitBreaker;

/// Boxed async call function for a registered endpoint.
///
/// The registry never performs I/O itself; the actual transport lives inside
/// this closure.
pub type CallFn = Arc<dyn Fn(Value) -> BoxFuture<'static, Result<Value, UpstreamError>> + Send + Sync>;

/// A registered endpoint: call function plus its resilience state
pub struct EndpointRegistration {
    name: String,
    pub(crate) call: CallFn,
    pub(crate) breaker: CircuitBreaker,
    pub(crate) breaker_config: BreakerConfig,
    pub(crate) time_limiter: TimeLimiterConfig,
}

impl EndpointRegistration {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The endpoint's circuit breaker (for manual control: reset,
    /// force_half_open)
    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }
}

// Not derivable: the call function has no Debug
impl fmt::Debug for EndpointRegistration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EndpointRegistration")
            .field("name", &self.name)
            .field("breaker_config", &self.breaker_config)
            .field("time_limiter", &self.time_limiter)
            .finish_non_exhaustive()
    }
}

/// Builder for the startup registration phase
pub struct RegistryBuilder {
    default_breaker: BreakerConfig,
    default_limiter: TimeLimiterConfig,
    file_overrides: HashMap<String, EndpointOverrides>,
    endpoints: HashMap<String, EndpointRegistration>,
}

impl RegistryBuilder {
    /// Builder with library defaults and no per-endpoint overrides
    pub fn new() -> Self {
        Self {
            default_breaker: BreakerConfig::default(),
            default_limiter: TimeLimiterConfig::default(),
            file_overrides: HashMap::new(),
            endpoints: HashMap::new(),
        }
    }

    /// Builder seeded from a loaded [`RegistryConfig`]
    ///
    /// The config's defaults replace the library defaults and its per-name
    /// overrides apply to matching `register` calls.
    pub fn with_config(config: RegistryConfig) -> Result<Self, CallError> {
        config.validate()?;
        Ok(Self {
            default_breaker: config.breaker,
            default_limiter: config.time_limiter,
            file_overrides: config.endpoints,
            endpoints: HashMap::new(),
        })
    }

    /// Replace the default breaker configuration
    pub fn default_breaker(mut self, config: BreakerConfig) -> Result<Self, CallError> {
        config.validate()?;
        self.default_breaker = config;
        Ok(self)
    }

    /// Replace the default time limiter configuration
    pub fn default_time_limiter(mut self, config: TimeLimiterConfig) -> Result<Self, CallError> {
        config.validate()?;
        self.default_limiter = config;
        Ok(self)
    }

    /// Register an endpoint under the merged default configuration
    pub fn register<F, Fut>(&mut self, name: impl Into<String>, call: F) -> Result<(), CallError>
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, UpstreamError>> + Send + 'static,
    {
        self.register_with(name, call, EndpointOverrides::default())
    }

    /// Register an endpoint with explicit overrides
    ///
    /// Overrides passed here win over config-file overrides for the same
    /// name, which win over the defaults, field by field. Fails with
    /// `InvalidConfig` on a duplicate name or an invalid merged
    /// configuration.
    pub fn register_with<F, Fut>(
        &mut self,
        name: impl Into<String>,
        call: F,
        overrides: EndpointOverrides,
    ) -> Result<(), CallError>
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, UpstreamError>> + Send + 'static,
    {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(CallError::InvalidConfig(
                "endpoint name cannot be empty".to_string(),
            ));
        }
        if self.endpoints.contains_key(&name) {
            return Err(CallError::InvalidConfig(format!(
                "endpoint '{}' is already registered",
                name
            )));
        }

        let mut breaker_config = self.default_breaker.clone();
        let mut limiter_config = self.default_limiter.clone();
        if let Some(file) = self.file_overrides.get(&name) {
            breaker_config = breaker_config.merged(&file.breaker);
            limiter_config = limiter_config.merged(&file.time_limiter);
        }
        let breaker_config = breaker_config.merged(&overrides.breaker);
        let limiter_config = limiter_config.merged(&overrides.time_limiter);
        breaker_config.validate()?;
        limiter_config.validate()?;

        let call: CallFn = Arc::new(move |args| call(args).boxed());
        let breaker = CircuitBreaker::new(name.clone(), breaker_config.clone());

        info!(
            "Registered endpoint '{}' (threshold {}%, window {}, timeout {}ms)",
            name,
            breaker_config.failure_rate_threshold,
            breaker_config.sliding_window_size,
            limiter_config.timeout_ms
        );

        self.endpoints.insert(
            name.clone(),
            EndpointRegistration {
                name,
                call,
                breaker,
                breaker_config,
                time_limiter: limiter_config,
            },
        );
        Ok(())
    }

    /// Finish the startup phase
    pub fn build(self) -> Registry {
        for name in self.file_overrides.keys() {
            if !self.endpoints.contains_key(name) {
                warn!("Config overrides for unregistered endpoint '{}'", name);
            }
        }
        info!("Endpoint registry built with {} endpoints", self.endpoints.len());
        Registry {
            endpoints: self.endpoints,
        }
    }
}

impl Default for RegistryBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Immutable endpoint registry
pub struct Registry {
    endpoints: HashMap<String, EndpointRegistration>,
}

impl Registry {
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::new()
    }

    /// Look up an endpoint by name
    pub fn resolve(&self, name: &str) -> Result<&EndpointRegistration, CallError> {
        self.endpoints
            .get(name)
            .ok_or_else(|| CallError::UnknownEndpoint(name.to_string()))
    }

    /// Registered endpoint names (unordered)
    pub fn endpoint_names(&self) -> impl Iterator<Item = &str> {
        self.endpoints.keys().map(String::as_str)
    }

    /// Point-in-time view of every breaker, for monitoring
    pub fn snapshot(&self) -> Vec<EndpointSnapshot> {
        self.endpoints
            .values()
            .map(|reg| EndpointSnapshot {
                name: reg.name.clone(),
                state: reg.breaker.state_name(),
                failure_rate: reg.breaker.failure_rate(),
                recorded_calls: reg.breaker.recorded_calls(),
            })
            .collect()
    }
}

/// Breaker status of one endpoint
#[derive(Debug, Clone, Serialize)]
pub struct EndpointSnapshot {
    pub name: String,
    pub state: &'static str,
    /// Failure rate in percent over the current window contents
    pub failure_rate: u32,
    pub recorded_calls: usize,
}
