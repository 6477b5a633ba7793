//! Response bodies.

use cadence_core::{JobKey, JobKind, Signal, SignalId, StrategyId};
use cadence_engine::{ExecutionSummary, ManualReport};
use cadence_lifecycle::SignalStats;
use chrono::{DateTime, Utc};
use serde::Serialize;

#[derive(Debug, Clone, Serialize)]
pub struct ErrorBody {
    pub success: bool,
    pub error: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub service: &'static str,
    pub version: &'static str,
    pub uptime_seconds: u64,
    /// Registry snapshot version in effect.
    pub config_version: u64,
    pub armed_jobs: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct JobView {
    pub job: String,
    pub strategy: StrategyId,
    pub kind: JobKind,
    pub fire_at: DateTime<Utc>,
}

impl From<(JobKey, DateTime<Utc>)> for JobView {
    fn from((key, fire_at): (JobKey, DateTime<Utc>)) -> Self {
        Self {
            job: key.to_string(),
            strategy: key.strategy,
            kind: key.kind,
            fire_at,
        }
    }
}

/// Pending signals of one strategy.
#[derive(Debug, Clone, Serialize)]
pub struct StrategySignals {
    pub strategy: StrategyId,
    pub stats: SignalStats,
    pub signals: Vec<Signal>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SignalsResponse {
    pub success: bool,
    pub count: usize,
    pub strategies: Vec<StrategySignals>,
}

/// One strategy's manual run.
#[derive(Debug, Clone, Serialize)]
pub struct ManualOutcome {
    pub strategy: StrategyId,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub generated: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub execution: Option<ExecutionSummary>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<String>,
}

impl From<ManualReport> for ManualOutcome {
    fn from(report: ManualReport) -> Self {
        let mut errors = Vec::new();
        let generated = match report.generated {
            Some(Ok(count)) => Some(count),
            Some(Err(e)) => {
                errors.push(format!("generation: {e}"));
                None
            }
            None => None,
        };
        let execution = match report.execution {
            Some(Ok(summary)) => Some(summary),
            Some(Err(e)) => {
                errors.push(format!("execution: {e}"));
                None
            }
            None => None,
        };

        Self {
            strategy: report.strategy,
            success: errors.is_empty(),
            generated,
            execution,
            errors,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ManualResponse {
    pub success: bool,
    pub results: Vec<ManualOutcome>,
}

impl ManualResponse {
    #[must_use]
    pub fn new(results: Vec<ManualOutcome>) -> Self {
        Self {
            success: results.iter().all(|r| r.success),
            results,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CancelResponse {
    pub success: bool,
    pub signal_id: SignalId,
    /// False when the signal was already cancelled.
    pub cancelled: bool,
}
