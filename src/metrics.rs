//! Prometheus metrics for the orchestrator.
//!
//! Metrics cover:
//! - Poll loops (attempts per check, time to converge)
//! - Retried calls (pause/resume exporting, tunnel acquisition)
//! - Topology and exporter changes submitted
//! - Saga steps and the current saga state
//! - Open tunnels
//!
//! All metrics are registered to a custom registry with the "orchestrator"
//! prefix. Registration errors are logged and the unregistered metric is
//! used instead of panicking.

use once_cell::sync::Lazy;
use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounterVec, IntGauge, IntGaugeVec, Registry,
    TextEncoder, opts,
};
use tracing::warn;

use crate::error::ErrorClass;

/// Custom Prometheus registry for orchestrator metrics.
pub static REGISTRY: Lazy<Registry> = Lazy::new(|| {
    Registry::new_custom(Some("orchestrator".to_string()), None).unwrap_or_else(|_| Registry::new())
});

// =============================================================================
// Metric Declaration Macros
// =============================================================================

macro_rules! define_gauge {
    ($name:ident, $metric_name:expr, $help:expr) => {
        #[doc = $help]
        pub static $name: Lazy<IntGauge> =
            Lazy::new(|| register_int_gauge_safe(&REGISTRY, $metric_name, $help));
    };
}

macro_rules! define_gauge_vec {
    ($name:ident, $metric_name:expr, $help:expr, [$($label:expr),+ $(,)?]) => {
        #[doc = $help]
        pub static $name: Lazy<IntGaugeVec> = Lazy::new(|| {
            register_int_gauge_vec_safe(&REGISTRY, $metric_name, $help, &[$($label),+])
        });
    };
}

macro_rules! define_counter_vec {
    ($name:ident, $metric_name:expr, $help:expr, [$($label:expr),+ $(,)?]) => {
        #[doc = $help]
        pub static $name: Lazy<IntCounterVec> = Lazy::new(|| {
            register_int_counter_vec_safe(&REGISTRY, $metric_name, $help, &[$($label),+])
        });
    };
}

macro_rules! define_histogram_vec {
    ($name:ident, $metric_name:expr, $help:expr, [$($label:expr),+ $(,)?], [$($bucket:expr),+ $(,)?]) => {
        #[doc = $help]
        pub static $name: Lazy<HistogramVec> = Lazy::new(|| {
            register_histogram_vec_safe(&REGISTRY, $metric_name, $help, &[$($label),+], vec![$($bucket),+])
        });
    };
}

// =============================================================================
// Poll metrics
// =============================================================================

define_counter_vec!(
    POLL_ATTEMPTS,
    "poll_attempts_total",
    "Check invocations inside poll loops",
    ["operation", "outcome"]
);
define_histogram_vec!(
    POLL_DURATION,
    "poll_duration_seconds",
    "Time from first check to loop exit",
    ["operation", "outcome"],
    [1.0, 5.0, 15.0, 30.0, 60.0, 120.0, 300.0, 600.0, 900.0, 1800.0]
);

// =============================================================================
// Retry metrics
// =============================================================================

define_counter_vec!(
    RETRY_ATTEMPTS,
    "retry_attempts_total",
    "Retries of fixed-backoff operations",
    ["operation"]
);
define_counter_vec!(
    RETRY_OUTCOMES,
    "retry_outcomes_total",
    "Final outcome of fixed-backoff operations",
    ["operation", "outcome"]
);

// =============================================================================
// Change metrics
// =============================================================================

define_counter_vec!(
    TOPOLOGY_CHANGES,
    "topology_changes_total",
    "Topology changes submitted to the control plane",
    ["kind", "outcome"]
);
define_counter_vec!(
    EXPORTER_CHANGES,
    "exporter_changes_total",
    "Exporter enable/disable requests",
    ["action", "outcome"]
);
define_counter_vec!(
    ERRORS,
    "errors_total",
    "Errors surfaced to callers, by class",
    ["class"]
);

// =============================================================================
// Saga metrics
// =============================================================================

define_counter_vec!(
    SAGA_STEPS,
    "saga_steps_total",
    "Saga step executions",
    ["procedure", "step", "outcome"]
);
define_gauge_vec!(
    SAGA_STATE,
    "saga_state",
    "1 for the current saga state, 0 otherwise",
    ["state"]
);

// =============================================================================
// Tunnel metrics
// =============================================================================

define_gauge!(
    OPEN_TUNNELS,
    "open_tunnels",
    "Port-forwards currently held open"
);

// =============================================================================
// Safe Registration Helpers
// =============================================================================

fn register_int_gauge_safe(registry: &Registry, name: &str, help: &str) -> IntGauge {
    let gauge = IntGauge::new(name, help).expect("metric name/help should be valid");
    match registry.register(Box::new(gauge.clone())) {
        Ok(()) => gauge,
        Err(e) => {
            warn!(name, error = %e, "Failed to register IntGauge metric, using unregistered fallback");
            gauge
        }
    }
}

fn register_int_gauge_vec_safe(
    registry: &Registry,
    name: &str,
    help: &str,
    labels: &[&str],
) -> IntGaugeVec {
    let gauge = IntGaugeVec::new(opts!(name, help), labels).expect("metric opts should be valid");
    match registry.register(Box::new(gauge.clone())) {
        Ok(()) => gauge,
        Err(e) => {
            warn!(name, error = %e, "Failed to register IntGaugeVec metric, using unregistered fallback");
            gauge
        }
    }
}

fn register_int_counter_vec_safe(
    registry: &Registry,
    name: &str,
    help: &str,
    labels: &[&str],
) -> IntCounterVec {
    let counter =
        IntCounterVec::new(opts!(name, help), labels).expect("metric opts should be valid");
    match registry.register(Box::new(counter.clone())) {
        Ok(()) => counter,
        Err(e) => {
            warn!(name, error = %e, "Failed to register IntCounterVec metric, using unregistered fallback");
            counter
        }
    }
}

fn register_histogram_vec_safe(
    registry: &Registry,
    name: &str,
    help: &str,
    labels: &[&str],
    buckets: Vec<f64>,
) -> HistogramVec {
    let histogram = HistogramVec::new(HistogramOpts::new(name, help).buckets(buckets), labels)
        .expect("metric opts should be valid");
    match registry.register(Box::new(histogram.clone())) {
        Ok(()) => histogram,
        Err(e) => {
            warn!(name, error = %e, "Failed to register HistogramVec metric, using unregistered fallback");
            histogram
        }
    }
}

/// Force registration of every metric. Idempotent.
pub fn init_metrics() {
    let _ = &*POLL_ATTEMPTS;
    let _ = &*POLL_DURATION;
    let _ = &*RETRY_ATTEMPTS;
    let _ = &*RETRY_OUTCOMES;
    let _ = &*TOPOLOGY_CHANGES;
    let _ = &*EXPORTER_CHANGES;
    let _ = &*ERRORS;
    let _ = &*SAGA_STEPS;
    let _ = &*SAGA_STATE;
    let _ = &*OPEN_TUNNELS;
}

/// Encode all metrics in Prometheus text format.
pub fn gather_text() -> Result<String, Box<dyn std::error::Error>> {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    Ok(String::from_utf8(buffer)?)
}

pub fn record_poll_attempt(operation: &str, outcome: &str) {
    POLL_ATTEMPTS.with_label_values(&[operation, outcome]).inc();
}

pub fn record_poll_finished(operation: &str, outcome: &str, duration_secs: f64) {
    POLL_DURATION
        .with_label_values(&[operation, outcome])
        .observe(duration_secs);
}

pub fn record_retry_attempt(operation: &str) {
    RETRY_ATTEMPTS.with_label_values(&[operation]).inc();
}

pub fn record_retry_outcome(operation: &str, success: bool) {
    let outcome = if success { "success" } else { "failure" };
    RETRY_OUTCOMES.with_label_values(&[operation, outcome]).inc();
}

pub fn record_topology_change(kind: &str, outcome: &str) {
    TOPOLOGY_CHANGES.with_label_values(&[kind, outcome]).inc();
}

pub fn record_exporter_change(action: &str, outcome: &str) {
    EXPORTER_CHANGES.with_label_values(&[action, outcome]).inc();
}

pub fn record_error(class: ErrorClass) {
    ERRORS.with_label_values(&[class.as_metric_label()]).inc();
}

pub fn record_saga_step(procedure: &str, step: &str, outcome: &str) {
    SAGA_STEPS.with_label_values(&[procedure, step, outcome]).inc();
}

/// Mark `current` as the active saga state among `all`.
pub fn set_saga_state(current: &str, all: &[&str]) {
    for state in all {
        SAGA_STATE
            .with_label_values(&[state])
            .set(i64::from(*state == current));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recording_helpers_do_not_panic() {
        init_metrics();
        record_poll_attempt("broker-change", "pending");
        record_poll_finished("broker-change", "converged", 30.0);
        record_retry_attempt("pause-exporting");
        record_retry_outcome("pause-exporting", true);
        record_topology_change("add_brokers", "accepted");
        record_exporter_change("disable", "accepted");
        record_error(ErrorClass::Transient);
        record_saga_step("failover", "teardown-region", "completed");
    }

    #[test]
    fn test_gather_text_contains_prefix() {
        init_metrics();
        record_topology_change("resize_partitions", "accepted");
        let text = gather_text().unwrap();
        assert!(text.contains("orchestrator_topology_changes_total"));
    }

    #[test]
    fn test_saga_state_gauge_is_one_hot() {
        let states = ["steady_test", "degraded_test"];
        set_saga_state("degraded_test", &states);
        assert_eq!(SAGA_STATE.with_label_values(&["degraded_test"]).get(), 1);
        assert_eq!(SAGA_STATE.with_label_values(&["steady_test"]).get(), 0);
    }
}
