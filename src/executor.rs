//! Resilient call executor
//!
//! Composes the circuit breaker and time limiter around a single endpoint
//! call:
//!
//! ```text
//! execute(name, args):
//!     registry.resolve(name)          -> UnknownEndpoint
//!     breaker.try_admit()             -> RejectedByBreaker (no call made)
//!     run_bounded(call(args), limit)  -> TimedOut (recorded as failure)
//!     classify upstream error         -> Upstream (ignored kinds excluded
//!                                        from the failure rate)
//! ```
//!
//! The executor never retries; retry policy is a caller concern composed
//! around `execute`.

use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, warn};

use crate::error::CallError;
use crate::registry::Registry;
use crate::resilience::{run_bounded, Outcome};

/// Executes calls against registered endpoints with breaker admission and a
/// time bound
#[derive(Clone)]
pub struct ResilientExecutor {
    registry: Arc<Registry>,
}

impl ResilientExecutor {
    pub fn new(registry: Arc<Registry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Execute a call against a named endpoint
    ///
    /// Every admitted call reports exactly one outcome back to the
    /// endpoint's breaker: success, failure (including timeout), or ignored
    /// when the upstream failure kind is on the endpoint's ignore list.
    /// Rejected calls never reach the call function.
    pub async fn execute(&self, endpoint: &str, args: Value) -> Result<Value, CallError> {
        let reg = self.registry.resolve(endpoint)?;

        let Some(permit) = reg.breaker.try_admit() else {
            warn!("Call to '{}' rejected by circuit breaker", endpoint);
            return Err(CallError::RejectedByBreaker {
                endpoint: endpoint.to_string(),
            });
        };

        let limit = reg.time_limiter.timeout();
        let call = (reg.call)(args);

        // Holding the permit across the await matters: if the caller cancels
        // this future mid-call, the dropped permit releases its half-open
        // trial slot instead of leaving the breaker stuck
        match run_bounded(call, limit, reg.name()).await {
            Ok(Ok(value)) => {
                permit.record(Outcome::Success);
                Ok(value)
            }
            Ok(Err(upstream)) => {
                let outcome = if reg.breaker_config.is_ignored(upstream.kind) {
                    debug!(
                        "Call to '{}' failed with ignored kind '{}'",
                        endpoint, upstream.kind
                    );
                    Outcome::Ignored
                } else {
                    Outcome::Failure
                };
                permit.record(outcome);
                Err(CallError::Upstream {
                    endpoint: endpoint.to_string(),
                    source: upstream,
                })
            }
            Err(timeout) => {
                warn!("Call to '{}' timed out after {:?}", endpoint, timeout.limit);
                permit.record(Outcome::Failure);
                Err(CallError::TimedOut {
                    endpoint: endpoint.to_string(),
                    limit: timeout.limit,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    use serde_json::json;

    use crate::config::{BreakerOverrides, EndpointOverrides, TimeLimiterOverrides};
    use crate::error::{ErrorKind, UpstreamError};
    use crate::registry::RegistryBuilder;
    use crate::resilience::CircuitState;

    fn init_tracing() {
        use tracing_subscriber::{fmt, prelude::*, EnvFilter};

        let _ = tracing_subscriber::registry()
            .with(fmt::layer())
            .with(EnvFilter::from_default_env())
            .try_init();
    }

    fn breaker_overrides(threshold: u8, window: usize, wait_ms: u64) -> EndpointOverrides {
        EndpointOverrides {
            breaker: BreakerOverrides {
                failure_rate_threshold: Some(threshold),
                sliding_window_size: Some(window),
                permitted_calls_in_half_open: Some(1),
                wait_duration_in_open_ms: Some(wait_ms),
                auto_transition_to_half_open: Some(true),
                ignored_failure_kinds: None,
            },
            ..Default::default()
        }
    }

    fn executor(builder: RegistryBuilder) -> ResilientExecutor {
        ResilientExecutor::new(Arc::new(builder.build()))
    }

    #[tokio::test]
    async fn test_success_path_returns_value() {
        let mut builder = RegistryBuilder::new();
        builder
            .register("weather", |args| async move {
                Ok(json!({ "echo": args }))
            })
            .unwrap();
        let exec = executor(builder);

        let value = exec.execute("weather", json!("zhr")).await.unwrap();
        assert_eq!(value, json!({ "echo": "zhr" }));
    }

    #[tokio::test]
    async fn test_unknown_endpoint() {
        let exec = executor(RegistryBuilder::new());
        let err = exec.execute("nope", Value::Null).await.unwrap_err();
        assert!(matches!(err, CallError::UnknownEndpoint(_)));
    }

    #[tokio::test]
    async fn test_failures_trip_breaker_and_fail_fast() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();

        let mut builder = RegistryBuilder::new();
        builder
            .register_with(
                "flaky",
                move |_| {
                    let counter = counter.clone();
                    async move {
                        counter.fetch_add(1, Ordering::SeqCst);
                        Err(UpstreamError::new(ErrorKind::Server, "boom"))
                    }
                },
                breaker_overrides(50, 4, 60_000),
            )
            .unwrap();
        let exec = executor(builder);

        for _ in 0..4 {
            let err = exec.execute("flaky", Value::Null).await.unwrap_err();
            assert!(matches!(err, CallError::Upstream { .. }));
        }
        assert_eq!(calls.load(Ordering::SeqCst), 4);

        // Window full at 100% failure rate: breaker is open, call function
        // is no longer reached
        let err = exec.execute("flaky", Value::Null).await.unwrap_err();
        assert!(matches!(err, CallError::RejectedByBreaker { .. }));
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_timeout_surfaces_and_counts_as_failure() {
        let mut builder = RegistryBuilder::new();
        builder
            .register_with(
                "slow",
                |_| async move {
                    tokio::time::sleep(Duration::from_secs(30)).await;
                    Ok(Value::Null)
                },
                EndpointOverrides {
                    breaker: BreakerOverrides {
                        sliding_window_size: Some(1),
                        ..Default::default()
                    },
                    time_limiter: TimeLimiterOverrides {
                        timeout_ms: Some(20),
                    },
                },
            )
            .unwrap();
        let exec = executor(builder);

        let err = exec.execute("slow", Value::Null).await.unwrap_err();
        assert!(matches!(err, CallError::TimedOut { .. }));

        // The timeout was recorded as a breaker failure (window of 1,
        // default 50% threshold)
        let reg = exec.registry().resolve("slow").unwrap();
        assert_eq!(reg.breaker().state(), CircuitState::Open);
    }

    #[tokio::test]
    async fn test_ignored_kind_surfaces_but_never_trips() {
        let mut builder = RegistryBuilder::new();
        builder
            .register_with(
                "picky",
                |_| async move { Err(UpstreamError::new(ErrorKind::Client, "405")) },
                EndpointOverrides {
                    breaker: BreakerOverrides {
                        sliding_window_size: Some(2),
                        ignored_failure_kinds: Some(vec![ErrorKind::Client]),
                        ..Default::default()
                    },
                    ..Default::default()
                },
            )
            .unwrap();
        let exec = executor(builder);

        for _ in 0..10 {
            // Still surfaced to the caller
            let err = exec.execute("picky", Value::Null).await.unwrap_err();
            assert!(matches!(
                err,
                CallError::Upstream {
                    source: UpstreamError {
                        kind: ErrorKind::Client,
                        ..
                    },
                    ..
                }
            ));
        }

        // But never recorded against the failure rate
        let reg = exec.registry().resolve("picky").unwrap();
        assert_eq!(reg.breaker().state(), CircuitState::Closed);
        assert_eq!(reg.breaker().recorded_calls(), 0);
    }

    #[tokio::test]
    async fn test_cancelled_call_frees_half_open_trial_slot() {
        init_tracing();

        let healthy = Arc::new(AtomicU32::new(0));
        let switch = healthy.clone();

        let mut builder = RegistryBuilder::new();
        builder
            .register_with(
                "wobbly",
                move |_| {
                    let switch = switch.clone();
                    async move {
                        if switch.load(Ordering::SeqCst) == 0 {
                            Err(UpstreamError::new(ErrorKind::Transport, "down"))
                        } else {
                            tokio::time::sleep(Duration::from_millis(30)).await;
                            Ok(json!("up"))
                        }
                    }
                },
                breaker_overrides(100, 1, 10),
            )
            .unwrap();
        let exec = executor(builder);

        exec.execute("wobbly", Value::Null).await.unwrap_err();
        let reg = exec.registry().resolve("wobbly").unwrap();
        assert_eq!(reg.breaker().state(), CircuitState::Open);

        healthy.store(1, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(20)).await;

        // The caller gives up on the single trial call mid-flight
        let cancelled =
            tokio::time::timeout(Duration::from_millis(10), exec.execute("wobbly", Value::Null))
                .await;
        assert!(cancelled.is_err());

        // Its trial slot was released, so the breaker can still probe and
        // recover instead of rejecting every call from half-open forever
        let value = exec.execute("wobbly", Value::Null).await.unwrap();
        assert_eq!(value, json!("up"));
        assert_eq!(reg.breaker().state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_recovery_through_half_open() {
        init_tracing();

        let healthy = Arc::new(AtomicU32::new(0));
        let switch = healthy.clone();

        let mut builder = RegistryBuilder::new();
        builder
            .register_with(
                "recovering",
                move |_| {
                    let switch = switch.clone();
                    async move {
                        if switch.load(Ordering::SeqCst) == 0 {
                            Err(UpstreamError::new(ErrorKind::Transport, "down"))
                        } else {
                            Ok(json!("up"))
                        }
                    }
                },
                breaker_overrides(100, 2, 50),
            )
            .unwrap();
        let exec = executor(builder);

        // Trip the breaker
        for _ in 0..2 {
            exec.execute("recovering", Value::Null).await.unwrap_err();
        }
        let reg = exec.registry().resolve("recovering").unwrap();
        assert_eq!(reg.breaker().state(), CircuitState::Open);

        // Upstream recovers; after the wait the trial call closes the circuit
        healthy.store(1, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(80)).await;

        let value = exec.execute("recovering", Value::Null).await.unwrap();
        assert_eq!(value, json!("up"));
        assert_eq!(reg.breaker().state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_concurrent_executions_against_one_endpoint() {
        let mut builder = RegistryBuilder::new();
        builder
            .register_with(
                "shared",
                |_| async move {
                    tokio::time::sleep(Duration::from_millis(5)).await;
                    Ok(json!(1))
                },
                breaker_overrides(50, 100, 60_000),
            )
            .unwrap();
        let exec = executor(builder);

        let mut tasks = Vec::new();
        for _ in 0..20 {
            let exec = exec.clone();
            tasks.push(tokio::spawn(
                async move { exec.execute("shared", Value::Null).await },
            ));
        }
        for task in tasks {
            assert!(task.await.unwrap().is_ok());
        }

        let reg = exec.registry().resolve("shared").unwrap();
        assert_eq!(reg.breaker().recorded_calls(), 20);
        assert_eq!(reg.breaker().failure_rate(), 0);
    }
}
