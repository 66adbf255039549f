//! Time limiter for async operations
//!
//! Bounds how long the caller waits for an operation. On overrun the
//! operation is abandoned, not cancelled: it was spawned onto the runtime, so
//! it may still run to completion in the background, but its result is
//! discarded and the caller gets a timeout immediately.

use std::future::Future;
use std::time::Duration;

use thiserror::Error;

/// Timeout error
#[derive(Debug, Error)]
#[error("{operation} exceeded its time limit of {limit:?}")]
pub struct TimeLimitExceeded {
    pub operation: String,
    pub limit: Duration,
}

/// Execute an async operation with a hard time bound
///
/// # Arguments
/// * `operation` - The async operation to execute
/// * `limit` - Maximum duration to wait
/// * `operation_name` - Name for error messages and logging
///
/// # Returns
/// * `Ok(T)` - Operation completed within the limit
/// * `Err(TimeLimitExceeded)` - Limit hit; the operation keeps running
///   detached and its result is dropped
///
/// A panic inside the operation is resumed on the caller.
pub async fn run_bounded<T, F>(
    operation: F,
    limit: Duration,
    operation_name: &str,
) -> Result<T, TimeLimitExceeded>
where
    F: Future<Output = T> + Send + 'static,
    T: Send + 'static,
{
    // Spawned rather than awaited in place: dropping a timed-out future would
    // cancel it mid-flight, but the contract is fire-and-forget abandonment.
    let handle = tokio::spawn(operation);

    match tokio::time::timeout(limit, handle).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(join_err)) => {
            if join_err.is_panic() {
                std::panic::resume_unwind(join_err.into_panic());
            }
            // Task cancelled out from under us (runtime shutdown); the caller
            // never gets a result, which is what a timeout reports too.
            Err(TimeLimitExceeded {
                operation: operation_name.to_string(),
                limit,
            })
        }
        Err(_) => {
            tracing::debug!("{} abandoned after {:?}", operation_name, limit);
            Err(TimeLimitExceeded {
                operation: operation_name.to_string(),
                limit,
            })
        }
    }
}
