//! Lifecycle error types.

use cadence_core::{ExecutionStatus, SignalId};
use cadence_persistence::PersistenceError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("Signal not found: {0}")]
    SignalNotFound(SignalId),

    #[error("Invalid transition for signal {id}: {from} -> {to}")]
    InvalidTransition {
        id: SignalId,
        from: ExecutionStatus,
        to: ExecutionStatus,
    },

    #[error("Journal write failed: {0}")]
    Persistence(#[from] PersistenceError),
}

pub type LifecycleResult<T> = Result<T, LifecycleError>;
