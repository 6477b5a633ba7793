//! Engine error types.

use cadence_core::{JobKind, StrategyId};
use cadence_lifecycle::LifecycleError;
use cadence_resolver::ResolveError;
use thiserror::Error;

/// Failure reported by a signal generator.
///
/// A failed generation records no signals.
#[derive(Debug, Error)]
pub enum GenerationError {
    #[error("Generator failed: {0}")]
    Failed(String),

    #[error("Generator command exited with {status}: {stderr}")]
    CommandFailed { status: String, stderr: String },

    #[error("Invalid generator output: {0}")]
    InvalidOutput(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Failure reported by a signal executor for one signal.
#[derive(Debug, Error)]
pub enum ExecutionError {
    #[error("Execution failed: {0}")]
    Failed(String),

    #[error("No webhook URL for signal")]
    MissingUrl,

    #[error("HTTP request failed: {0}")]
    Http(String),

    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Resolve(#[from] ResolveError),

    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),

    #[error(transparent)]
    Generation(#[from] GenerationError),

    #[error("Unknown {kind} capability '{name}' for strategy {strategy}")]
    UnknownCapability {
        strategy: StrategyId,
        kind: JobKind,
        name: String,
    },

    #[error("Unknown or disabled strategy: {0}")]
    UnknownStrategy(StrategyId),

    #[error("Capability task aborted: {0}")]
    TaskAborted(String),
}

pub type EngineResult<T> = Result<T, EngineError>;
