//! Error types for the orchestrator.
//!
//! # Error Classes
//!
//! Every [`OrchestratorError`] belongs to exactly one [`ErrorClass`]:
//!
//! - **Acceptance**: the control plane (or a local pre-check) refused the
//!   request. Never retried.
//! - **Transient**: 5xx responses, connection refused, timeouts. Retried by
//!   callers that opt into tolerance (pollers, exporting pause/resume).
//! - **ConvergenceTimeout**: an attempt budget ran out while waiting for a
//!   target state. Carries the last observed state.
//! - **InvariantViolation**: a post-condition check failed (sizes, partition
//!   ids, region parity, backup presence). Never retried.
//! - **ResourceAcquisition**: a tunnel or service could not be acquired.
//! - **Configuration**: invalid settings or environment.
//! - **Decode**: a response body could not be parsed. Fatal even inside a
//!   tolerant poll loop.
//!
//! Sagas wrap the failing step's error in [`OrchestratorError::SagaAborted`]
//! so the operator sees which step stopped the procedure; the class of the
//! wrapper is the class of the cause.

use std::time::Duration;
use thiserror::Error;

/// Result type for orchestrator operations.
pub type Result<T> = std::result::Result<T, OrchestratorError>;

/// Coarse failure classification used for retry decisions and metrics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorClass {
    Acceptance,
    Transient,
    ConvergenceTimeout,
    InvariantViolation,
    ResourceAcquisition,
    Configuration,
    Decode,
}

impl ErrorClass {
    /// Returns a string label for metrics.
    pub fn as_metric_label(&self) -> &'static str {
        match self {
            ErrorClass::Acceptance => "acceptance",
            ErrorClass::Transient => "transient",
            ErrorClass::ConvergenceTimeout => "convergence_timeout",
            ErrorClass::InvariantViolation => "invariant_violation",
            ErrorClass::ResourceAcquisition => "resource_acquisition",
            ErrorClass::Configuration => "configuration",
            ErrorClass::Decode => "decode",
        }
    }
}

/// Errors produced while driving cluster reconfiguration.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    /// The remote side answered with a status the operation does not accept.
    #[error("{operation} rejected by {endpoint}: HTTP {status}: {body}")]
    Rejected {
        operation: &'static str,
        endpoint: String,
        status: u16,
        body: String,
    },

    /// The remote side could not be reached or answered with a server error.
    #[error("{operation} against {endpoint} unavailable: {reason}")]
    Unavailable {
        operation: &'static str,
        endpoint: String,
        status: Option<u16>,
        reason: String,
    },

    /// A request that fails local validation and is never sent.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// The control plane accepted a change but recorded it as failed.
    #[error("Change {change_id} ended in state {status}")]
    ChangeFailed { change_id: i64, status: String },

    /// A poll loop exhausted its attempt budget.
    #[error("{what} did not converge after {attempts} attempts ({elapsed:?}); last observed: {last_observed}")]
    ConvergenceTimeout {
        what: String,
        attempts: u32,
        elapsed: Duration,
        last_observed: String,
    },

    /// A post-condition on the cluster does not hold.
    #[error("Invariant violated ({check}): {detail}")]
    InvariantViolation { check: &'static str, detail: String },

    /// A tunnel, service or other scoped resource could not be acquired.
    #[error("Could not acquire {resource}: {reason}")]
    ResourceUnavailable {
        resource: String,
        reason: String,
        retriable: bool,
    },

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// A response body did not have the expected shape.
    #[error("Malformed response from {endpoint}: {source}")]
    Decode {
        endpoint: String,
        #[source]
        source: serde_json::Error,
    },

    /// IO error from a spawned platform or deployment tool.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A saga step failed; the saga stopped at that step.
    #[error("Saga aborted at step {step}: {source}")]
    SagaAborted {
        step: &'static str,
        #[source]
        source: Box<OrchestratorError>,
    },
}

impl OrchestratorError {
    /// Build the error for an unexpected HTTP status.
    ///
    /// 5xx answers are transient, everything else is a rejection.
    pub fn from_status(
        operation: &'static str,
        endpoint: impl Into<String>,
        status: u16,
        body: impl Into<String>,
    ) -> Self {
        let endpoint = endpoint.into();
        let body = body.into();
        if (500..600).contains(&status) {
            OrchestratorError::Unavailable {
                operation,
                endpoint,
                status: Some(status),
                reason: format!("HTTP {status}: {body}"),
            }
        } else {
            OrchestratorError::Rejected {
                operation,
                endpoint,
                status,
                body,
            }
        }
    }

    /// Shorthand for an invariant violation.
    pub fn invariant(check: &'static str, detail: impl Into<String>) -> Self {
        OrchestratorError::InvariantViolation {
            check,
            detail: detail.into(),
        }
    }

    /// The failure class of this error.
    pub fn class(&self) -> ErrorClass {
        match self {
            OrchestratorError::Rejected { .. } => ErrorClass::Acceptance,
            OrchestratorError::InvalidRequest(_) => ErrorClass::Acceptance,
            OrchestratorError::Unavailable { .. } => ErrorClass::Transient,
            OrchestratorError::ChangeFailed { .. } => ErrorClass::ConvergenceTimeout,
            OrchestratorError::ConvergenceTimeout { .. } => ErrorClass::ConvergenceTimeout,
            OrchestratorError::InvariantViolation { .. } => ErrorClass::InvariantViolation,
            OrchestratorError::ResourceUnavailable { .. } => ErrorClass::ResourceAcquisition,
            OrchestratorError::Config(_) => ErrorClass::Configuration,
            OrchestratorError::Decode { .. } => ErrorClass::Decode,
            OrchestratorError::Io(e) if Self::is_io_error_retryable(e) => ErrorClass::Transient,
            OrchestratorError::Io(_) => ErrorClass::ResourceAcquisition,
            OrchestratorError::SagaAborted { source, .. } => source.class(),
        }
    }

    /// Whether a poll loop configured as tolerant may treat this as "not yet".
    #[inline]
    pub fn is_transient(&self) -> bool {
        self.class() == ErrorClass::Transient
    }

    /// Check if this error is retriable (transient infrastructure issue).
    ///
    /// Acceptance, invariant, decode and configuration failures are never
    /// retried. Resource acquisition is retried unless the resource is
    /// known to be missing.
    #[inline]
    pub fn is_retriable(&self) -> bool {
        match self {
            OrchestratorError::ResourceUnavailable { retriable, .. } => *retriable,
            OrchestratorError::SagaAborted { .. } => false,
            other => other.is_transient(),
        }
    }

    /// The innermost error, unwrapping saga step context.
    pub fn root_cause(&self) -> &OrchestratorError {
        match self {
            OrchestratorError::SagaAborted { source, .. } => source.root_cause(),
            other => other,
        }
    }

    fn is_io_error_retryable(e: &std::io::Error) -> bool {
        use std::io::ErrorKind;

        matches!(
            e.kind(),
            ErrorKind::ConnectionRefused
                | ErrorKind::ConnectionReset
                | ErrorKind::ConnectionAborted
                | ErrorKind::NotConnected
                | ErrorKind::BrokenPipe
                | ErrorKind::TimedOut
                | ErrorKind::Interrupted
                | ErrorKind::UnexpectedEof
        )
    }
}

impl From<Box<dyn std::error::Error>> for OrchestratorError {
    fn from(e: Box<dyn std::error::Error>) -> Self {
        OrchestratorError::Config(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error;

    fn decode_error() -> OrchestratorError {
        let source = serde_json::from_str::<serde_json::Value>("{not json").unwrap_err();
        OrchestratorError::Decode {
            endpoint: "10.0.0.1:9600".to_string(),
            source,
        }
    }

    #[test]
    fn test_from_status_splits_server_errors() {
        let err = OrchestratorError::from_status("patch", "host:9600", 503, "busy");
        assert_eq!(err.class(), ErrorClass::Transient);
        assert!(err.is_retriable());

        let err = OrchestratorError::from_status("patch", "host:9600", 400, "bad");
        assert_eq!(err.class(), ErrorClass::Acceptance);
        assert!(!err.is_retriable());

        let err = OrchestratorError::from_status("patch", "host:9600", 409, "concurrent");
        assert_eq!(err.class(), ErrorClass::Acceptance);
    }

    #[test]
    fn test_rejected_display_includes_status_and_body() {
        let err = OrchestratorError::from_status("patch topology", "host:9600", 400, "no such broker");
        let display = err.to_string();
        assert!(display.contains("patch topology"));
        assert!(display.contains("400"));
        assert!(display.contains("no such broker"));
    }

    #[test]
    fn test_convergence_timeout_carries_last_observed() {
        let err = OrchestratorError::ConvergenceTimeout {
            what: "broker addition".to_string(),
            attempts: 40,
            elapsed: Duration::from_secs(600),
            last_observed: "pending change 7 IN_PROGRESS".to_string(),
        };
        assert_eq!(err.class(), ErrorClass::ConvergenceTimeout);
        assert!(!err.is_retriable());
        assert!(err.to_string().contains("pending change 7"));
        assert!(err.to_string().contains("40 attempts"));
    }

    #[test]
    fn test_decode_is_never_transient() {
        let err = decode_error();
        assert_eq!(err.class(), ErrorClass::Decode);
        assert!(!err.is_transient());
        assert!(err.source().is_some());
    }

    #[test]
    fn test_resource_unavailable_retriable_flag() {
        let missing = OrchestratorError::ResourceUnavailable {
            resource: "service camunda-zeebe-gateway".to_string(),
            reason: "not found".to_string(),
            retriable: false,
        };
        let flaky = OrchestratorError::ResourceUnavailable {
            resource: "port-forward".to_string(),
            reason: "exited early".to_string(),
            retriable: true,
        };
        assert_eq!(missing.class(), ErrorClass::ResourceAcquisition);
        assert!(!missing.is_retriable());
        assert!(flaky.is_retriable());
        assert!(!flaky.is_transient());
    }

    #[test]
    fn test_io_error_classification() {
        let refused: OrchestratorError =
            std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused").into();
        assert!(refused.is_transient());

        let missing: OrchestratorError =
            std::io::Error::new(std::io::ErrorKind::NotFound, "kubectl").into();
        assert_eq!(missing.class(), ErrorClass::ResourceAcquisition);
        assert!(!missing.is_retriable());
    }

    #[test]
    fn test_saga_aborted_inherits_class_and_is_terminal() {
        let inner = OrchestratorError::from_status("create snapshot", "es:9200", 503, "busy");
        let err = OrchestratorError::SagaAborted {
            step: "create-backup",
            source: Box::new(inner),
        };
        assert_eq!(err.class(), ErrorClass::Transient);
        assert!(!err.is_retriable());
        assert!(err.to_string().contains("create-backup"));
        assert!(matches!(
            err.root_cause(),
            OrchestratorError::Unavailable { status: Some(503), .. }
        ));
    }

    #[test]
    fn test_invariant_shorthand() {
        let err = OrchestratorError::invariant("region-parity", "node 3 in primary region");
        assert_eq!(err.class(), ErrorClass::InvariantViolation);
        assert!(err.to_string().contains("region-parity"));
    }

    #[test]
    fn test_metric_labels_are_distinct() {
        let classes = [
            ErrorClass::Acceptance,
            ErrorClass::Transient,
            ErrorClass::ConvergenceTimeout,
            ErrorClass::InvariantViolation,
            ErrorClass::ResourceAcquisition,
            ErrorClass::Configuration,
            ErrorClass::Decode,
        ];
        let labels: std::collections::HashSet<_> =
            classes.iter().map(|c| c.as_metric_label()).collect();
        assert_eq!(labels.len(), classes.len());
    }
}
