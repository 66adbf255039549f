//! Configuration for circuit breakers, time limiters and the endpoint registry.
//!
//! Handles loading registry configuration from YAML files: global defaults
//! plus per-endpoint overrides, merged field-by-field (override wins).
//! Unknown options are rejected at parse time.

use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::Context;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{CallError, ErrorKind};

/// Circuit breaker configuration
///
/// Controls fault isolation behavior for one endpoint (or the registry-wide
/// default when no override is present).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BreakerConfig {
    /// Failure rate (percent, 1-100) at or above which the circuit opens
    #[serde(default = "default_failure_rate_threshold")]
    pub failure_rate_threshold: u8,

    /// Number of recent call outcomes kept for the failure-rate window.
    /// The rate is only evaluated once the window is full.
    #[serde(default = "default_sliding_window_size")]
    pub sliding_window_size: usize,

    /// Number of trial calls admitted in half-open state
    #[serde(default = "default_permitted_calls_in_half_open")]
    pub permitted_calls_in_half_open: u32,

    /// Time in milliseconds to stay open before recovery is attempted
    #[serde(default = "default_wait_duration_in_open_ms")]
    pub wait_duration_in_open_ms: u64,

    /// Move from open to half-open automatically once the wait elapses.
    /// When false, the transition must be forced externally.
    #[serde(default)]
    pub auto_transition_to_half_open: bool,

    /// Upstream failure kinds that count as neither success nor failure
    #[serde(default)]
    pub ignored_failure_kinds: Vec<ErrorKind>,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_rate_threshold: default_failure_rate_threshold(),
            sliding_window_size: default_sliding_window_size(),
            permitted_calls_in_half_open: default_permitted_calls_in_half_open(),
            wait_duration_in_open_ms: default_wait_duration_in_open_ms(),
            auto_transition_to_half_open: false,
            ignored_failure_kinds: Vec::new(),
        }
    }
}

impl BreakerConfig {
    /// Wait duration in open state as a `Duration`
    pub fn wait_duration(&self) -> Duration {
        Duration::from_millis(self.wait_duration_in_open_ms)
    }

    /// Whether failures of this kind are excluded from the failure rate
    pub fn is_ignored(&self, kind: ErrorKind) -> bool {
        self.ignored_failure_kinds.contains(&kind)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), CallError> {
        if self.failure_rate_threshold == 0 || self.failure_rate_threshold > 100 {
            return Err(CallError::InvalidConfig(format!(
                "failure_rate_threshold must be 1-100, got {}",
                self.failure_rate_threshold
            )));
        }
        if self.sliding_window_size == 0 {
            return Err(CallError::InvalidConfig(
                "sliding_window_size must be > 0".to_string(),
            ));
        }
        if self.permitted_calls_in_half_open == 0 {
            return Err(CallError::InvalidConfig(
                "permitted_calls_in_half_open must be > 0".to_string(),
            ));
        }
        if self.wait_duration_in_open_ms == 0 {
            return Err(CallError::InvalidConfig(
                "wait_duration_in_open_ms must be > 0".to_string(),
            ));
        }
        Ok(())
    }

    /// Apply per-endpoint overrides on top of this config, field by field
    pub fn merged(&self, overrides: &BreakerOverrides) -> BreakerConfig {
        BreakerConfig {
            failure_rate_threshold: overrides
                .failure_rate_threshold
                .unwrap_or(self.failure_rate_threshold),
            sliding_window_size: overrides
                .sliding_window_size
                .unwrap_or(self.sliding_window_size),
            permitted_calls_in_half_open: overrides
                .permitted_calls_in_half_open
                .unwrap_or(self.permitted_calls_in_half_open),
            wait_duration_in_open_ms: overrides
                .wait_duration_in_open_ms
                .unwrap_or(self.wait_duration_in_open_ms),
            auto_transition_to_half_open: overrides
                .auto_transition_to_half_open
                .unwrap_or(self.auto_transition_to_half_open),
            ignored_failure_kinds: overrides
                .ignored_failure_kinds
                .clone()
                .unwrap_or_else(|| self.ignored_failure_kinds.clone()),
        }
    }
}

/// Per-endpoint circuit breaker overrides (every field optional)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BreakerOverrides {
    pub failure_rate_threshold: Option<u8>,
    pub sliding_window_size: Option<usize>,
    pub permitted_calls_in_half_open: Option<u32>,
    pub wait_duration_in_open_ms: Option<u64>,
    pub auto_transition_to_half_open: Option<bool>,
    pub ignored_failure_kinds: Option<Vec<ErrorKind>>,
}

/// Time limiter configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TimeLimiterConfig {
    /// Maximum call duration in milliseconds before a timeout failure
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

impl Default for TimeLimiterConfig {
    fn default() -> Self {
        Self {
            timeout_ms: default_timeout_ms(),
        }
    }
}

impl TimeLimiterConfig {
    /// Timeout as a `Duration`
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), CallError> {
        if self.timeout_ms == 0 {
            return Err(CallError::InvalidConfig(
                "timeout_ms must be > 0".to_string(),
            ));
        }
        Ok(())
    }

    /// Apply per-endpoint overrides on top of this config
    pub fn merged(&self, overrides: &TimeLimiterOverrides) -> TimeLimiterConfig {
        TimeLimiterConfig {
            timeout_ms: overrides.timeout_ms.unwrap_or(self.timeout_ms),
        }
    }
}

/// Per-endpoint time limiter overrides
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TimeLimiterOverrides {
    pub timeout_ms: Option<u64>,
}

/// Per-endpoint resilience overrides
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EndpointOverrides {
    /// Circuit breaker overrides
    #[serde(default)]
    pub breaker: BreakerOverrides,

    /// Time limiter overrides
    #[serde(default)]
    pub time_limiter: TimeLimiterOverrides,
}

/// Registry configuration: global defaults plus per-endpoint overrides
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RegistryConfig {
    /// Default circuit breaker configuration
    #[serde(default)]
    pub breaker: BreakerConfig,

    /// Default time limiter configuration
    #[serde(default)]
    pub time_limiter: TimeLimiterConfig,

    /// Per-endpoint overrides, keyed by endpoint name
    #[serde(default)]
    pub endpoints: HashMap<String, EndpointOverrides>,
}

impl RegistryConfig {
    /// Parse registry configuration from a YAML string
    ///
    /// Unknown options anywhere in the document are rejected.
    pub fn from_yaml(content: &str) -> Result<Self, CallError> {
        let config: RegistryConfig = serde_yaml::from_str(content)
            .map_err(|e| CallError::InvalidConfig(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load registry configuration from a YAML file
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        debug!("Loading registry config from {}", path.display());

        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config = Self::from_yaml(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }

    /// Validate defaults and every endpoint's effective (merged) configuration
    pub fn validate(&self) -> Result<(), CallError> {
        self.breaker.validate()?;
        self.time_limiter.validate()?;

        for (name, overrides) in &self.endpoints {
            if name.trim().is_empty() {
                return Err(CallError::InvalidConfig(
                    "endpoint name cannot be empty".to_string(),
                ));
            }
            self.breaker.merged(&overrides.breaker).validate()?;
            self.time_limiter
                .merged(&overrides.time_limiter)
                .validate()?;
        }

        Ok(())
    }

    /// Effective breaker config for an endpoint (defaults + overrides)
    pub fn breaker_for(&self, name: &str) -> BreakerConfig {
        match self.endpoints.get(name) {
            Some(overrides) => self.breaker.merged(&overrides.breaker),
            None => self.breaker.clone(),
        }
    }

    /// Effective time limiter config for an endpoint (defaults + overrides)
    pub fn time_limiter_for(&self, name: &str) -> TimeLimiterConfig {
        match self.endpoints.get(name) {
            Some(overrides) => self.time_limiter.merged(&overrides.time_limiter),
            None => self.time_limiter.clone(),
        }
    }
}

fn default_failure_rate_threshold() -> u8 {
    50
}
fn default_sliding_window_size() -> usize {
    100
}
fn default_permitted_calls_in_half_open() -> u32 {
    10
}
fn default_wait_duration_in_open_ms() -> u64 {
    30_000
}
fn default_timeout_ms() -> u64 {
    5_000
}
