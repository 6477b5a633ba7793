//! Prometheus metrics for the cadence scheduler.
//!
//! Covers:
//! - Job fires and their outcome
//! - Jobs that could not be armed
//! - Next scheduled fire per job
//! - Signal generation and status transitions
//! - Configuration reloads
//!
//! # Panics
//!
//! Metric registration uses `unwrap()` intentionally. A registration failure
//! means duplicate metric names, which should crash at startup. These panics
//! only occur during static initialization, never at runtime.

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use prometheus::{
    register_counter_vec, register_gauge_vec, CounterVec, Encoder, GaugeVec, TextEncoder,
};

use crate::error::{TelemetryError, TelemetryResult};

/// Job fires.
/// Labels: strategy, job (generation/execution), outcome (ok/error/retry/manual)
pub static JOB_FIRES_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "cadence_job_fires_total",
        "Total scheduled job fires",
        &["strategy", "job", "outcome"]
    )
    .unwrap()
});

/// Jobs left unarmed because their fire time could not be resolved.
/// Labels: strategy, reason
pub static JOB_ARM_FAILURES_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "cadence_job_arm_failures_total",
        "Total failures to arm a scheduled job",
        &["strategy", "reason"]
    )
    .unwrap()
});

/// Next fire time as a Unix timestamp (seconds).
pub static NEXT_FIRE_TIMESTAMP: Lazy<GaugeVec> = Lazy::new(|| {
    register_gauge_vec!(
        "cadence_next_fire_timestamp",
        "Next scheduled fire time (unix seconds)",
        &["strategy", "job"]
    )
    .unwrap()
});

pub static SIGNALS_GENERATED_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "cadence_signals_generated_total",
        "Total signals recorded by generation fires",
        &["strategy"]
    )
    .unwrap()
});

/// Signal status transitions.
/// Labels: strategy, status (executed/retry/failed/cancelled)
pub static SIGNAL_TRANSITIONS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "cadence_signal_transitions_total",
        "Total signal status transitions",
        &["strategy", "status"]
    )
    .unwrap()
});

pub static CONFIG_RELOADS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "cadence_config_reloads_total",
        "Total configuration reload attempts",
        &["outcome"]
    )
    .unwrap()
});

/// Metrics facade.
pub struct Metrics;

impl Metrics {
    /// Record a job fire.
    pub fn job_fire(strategy: &str, job: &str, outcome: &str) {
        JOB_FIRES_TOTAL
            .with_label_values(&[strategy, job, outcome])
            .inc();
    }

    /// Record a job that could not be armed.
    pub fn arm_failure(strategy: &str, reason: &str) {
        JOB_ARM_FAILURES_TOTAL
            .with_label_values(&[strategy, reason])
            .inc();
    }

    /// Publish a job's next fire time.
    pub fn next_fire(strategy: &str, job: &str, at: DateTime<Utc>) {
        NEXT_FIRE_TIMESTAMP
            .with_label_values(&[strategy, job])
            .set(at.timestamp() as f64);
    }

    /// Forget a cancelled job's next fire time.
    pub fn clear_next_fire(strategy: &str, job: &str) {
        // Absent label sets are fine
        let _ = NEXT_FIRE_TIMESTAMP.remove_label_values(&[strategy, job]);
    }

    pub fn signals_generated(strategy: &str, count: usize) {
        SIGNALS_GENERATED_TOTAL
            .with_label_values(&[strategy])
            .inc_by(count as f64);
    }

    pub fn signal_transition(strategy: &str, status: &str) {
        SIGNAL_TRANSITIONS_TOTAL
            .with_label_values(&[strategy, status])
            .inc();
    }

    pub fn config_reload(outcome: &str) {
        CONFIG_RELOADS_TOTAL.with_label_values(&[outcome]).inc();
    }

    /// Render all registered metrics in the Prometheus text format.
    pub fn render() -> TelemetryResult<String> {
        let mut buffer = Vec::new();
        TextEncoder::new()
            .encode(&prometheus::gather(), &mut buffer)
            .map_err(|e| TelemetryError::Metrics(e.to_string()))?;
        String::from_utf8(buffer).map_err(|e| TelemetryError::Metrics(e.to_string()))
    }
}
