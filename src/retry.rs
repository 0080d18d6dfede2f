//! Fixed-backoff retry policies for whole-call retries.
//!
//! Convergence waits go through [`crate::poller`]. This module covers the
//! other kind of retry: re-issuing an entire call that failed transiently
//! (pause/resume exporting during leadership renegotiation, establishing a
//! port-forward). Delays are constant with no jitter; call volume is low and
//! operations are minutes-scale.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::time::Duration;
//! use cluster_orchestrator::retry::{self, FixedRetry};
//! use cluster_orchestrator::error::{OrchestratorError, Result};
//!
//! async fn example() -> Result<()> {
//!     retry::with_fixed_policy(
//!         "pause-exporting",
//!         FixedRetry::new(10, Duration::from_secs(30)),
//!         || async { Ok(()) },
//!         |e: &OrchestratorError| e.is_retriable(),
//!     )
//!     .await
//! }
//! ```

use std::time::Duration;

use backon::{ConstantBuilder, Retryable};
use tracing::warn;

use crate::metrics;

/// Total attempts and the fixed delay between them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FixedRetry {
    /// Total calls including the first one.
    pub attempts: u32,
    pub delay: Duration,
}

impl FixedRetry {
    pub fn new(attempts: u32, delay: Duration) -> Self {
        Self { attempts, delay }
    }

    /// Backoff builder performing `attempts - 1` retries.
    pub fn policy(&self) -> ConstantBuilder {
        ConstantBuilder::default()
            .with_delay(self.delay)
            .with_max_times(self.attempts.saturating_sub(1) as usize)
    }
}

/// Execute an async operation under a fixed retry policy.
///
/// `condition` decides which errors are retried; everything else is
/// returned immediately. Each retry is logged and counted under `operation_name`.
pub async fn with_fixed_policy<F, Fut, T, E, C>(
    operation_name: &'static str,
    policy: FixedRetry,
    operation: F,
    condition: C,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
    E: std::fmt::Display,
    C: FnMut(&E) -> bool,
{
    let result = operation
        .retry(policy.policy())
        .when(condition)
        .notify(|err: &E, delay: Duration| {
            metrics::record_retry_attempt(operation_name);
            warn!(
                operation = operation_name,
                error = %err,
                retry_in = ?delay,
                "Retrying after failure"
            );
        })
        .await;
    metrics::record_retry_outcome(operation_name, result.is_ok());
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::OrchestratorError;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn unavailable() -> OrchestratorError {
        OrchestratorError::from_status("pause exporting", "host:9600", 503, "leader change")
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_until_success() {
        let calls = AtomicU32::new(0);
        let result = with_fixed_policy(
            "test-success",
            FixedRetry::new(10, Duration::from_secs(30)),
            || async {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                if n < 3 { Err(unavailable()) } else { Ok(n) }
            },
            |e| e.is_retriable(),
        )
        .await;
        assert_eq!(result.unwrap(), 3);
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stops_after_attempt_budget() {
        let calls = AtomicU32::new(0);
        let start = tokio::time::Instant::now();
        let result: Result<(), _> = with_fixed_policy(
            "test-exhaust",
            FixedRetry::new(5, Duration::from_secs(15)),
            || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(unavailable())
            },
            |e| e.is_retriable(),
        )
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 5);
        assert_eq!(start.elapsed(), Duration::from_secs(60));
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_retriable_error_returns_immediately() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = with_fixed_policy(
            "test-fatal",
            FixedRetry::new(10, Duration::from_secs(30)),
            || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(OrchestratorError::from_status("pause", "host:9600", 400, "bad"))
            },
            |e| e.is_retriable(),
        )
        .await;
        assert!(matches!(result, Err(OrchestratorError::Rejected { status: 400, .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_single_attempt_policy_never_retries() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = with_fixed_policy(
            "test-single",
            FixedRetry::new(1, Duration::from_secs(30)),
            || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(unavailable())
            },
            |e| e.is_retriable(),
        )
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
