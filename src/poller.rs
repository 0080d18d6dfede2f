//! Bounded fixed-interval polling.
//!
//! [`await_condition`] is the one waiting primitive used by every component:
//! evaluate a check, return as soon as it reports [`Poll::Ready`], sleep
//! `interval` otherwise, and give up after `max_attempts` with a
//! [`OrchestratorError::ConvergenceTimeout`] that carries the last observed
//! state.
//!
//! Check errors are fatal under [`ErrorTolerance::Strict`]. Under
//! [`ErrorTolerance::TolerateTransient`] transient errors count as "not yet";
//! decode and acceptance errors stay fatal.

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, warn};

use crate::error::{OrchestratorError, Result};
use crate::metrics;

/// Outcome of a single check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Poll<T> {
    /// Target state reached.
    Ready(T),
    /// Not there yet; the string describes what was observed.
    Pending(String),
}

/// Attempt budget and interval of a poll loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    pub max_attempts: u32,
    pub interval: Duration,
}

impl PollPolicy {
    pub fn new(max_attempts: u32, interval: Duration) -> Self {
        Self {
            max_attempts,
            interval,
        }
    }

    /// Worst-case wall time: `max_attempts * interval`.
    pub fn budget(&self) -> Duration {
        self.interval * self.max_attempts
    }
}

/// How check errors are treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorTolerance {
    /// Any check error ends the loop.
    Strict,
    /// Transient errors count as "not yet".
    TolerateTransient,
}

/// Poll `check` until it is ready or the budget runs out.
///
/// `what` names the wait in logs, metrics and the timeout error.
pub async fn await_condition<T, F, Fut>(
    what: &str,
    policy: PollPolicy,
    tolerance: ErrorTolerance,
    mut check: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Poll<T>>>,
{
    let start = Instant::now();
    let mut last_observed = String::from("no observation");

    for attempt in 1..=policy.max_attempts {
        match check().await {
            Ok(Poll::Ready(value)) => {
                metrics::record_poll_attempt(what, "ready");
                metrics::record_poll_finished(what, "converged", start.elapsed().as_secs_f64());
                debug!(what, attempt, elapsed = ?start.elapsed(), "Condition reached");
                return Ok(value);
            }
            Ok(Poll::Pending(observed)) => {
                metrics::record_poll_attempt(what, "pending");
                debug!(what, attempt, max_attempts = policy.max_attempts, observed = %observed, "Not yet");
                last_observed = observed;
            }
            Err(e) if tolerance == ErrorTolerance::TolerateTransient && e.is_transient() => {
                metrics::record_poll_attempt(what, "transient_error");
                warn!(what, attempt, error = %e, "Transient error while polling, treating as not yet");
                last_observed = format!("transient error: {e}");
            }
            Err(e) => {
                metrics::record_poll_attempt(what, "error");
                metrics::record_poll_finished(what, "error", start.elapsed().as_secs_f64());
                return Err(e);
            }
        }

        if attempt < policy.max_attempts {
            tokio::time::sleep(policy.interval).await;
        }
    }

    metrics::record_poll_finished(what, "timeout", start.elapsed().as_secs_f64());
    let err = OrchestratorError::ConvergenceTimeout {
        what: what.to_string(),
        attempts: policy.max_attempts,
        elapsed: start.elapsed(),
        last_observed,
    };
    warn!(what, error = %err, "Gave up waiting");
    Err(err)
}
