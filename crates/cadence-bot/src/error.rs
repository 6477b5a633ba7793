//! Application error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Registry error: {0}")]
    Registry(#[from] cadence_registry::RegistryError),

    #[error("Persistence error: {0}")]
    Persistence(#[from] cadence_persistence::PersistenceError),

    #[error("Capability error: {0}")]
    Capability(String),

    #[error("Signal error: {0}")]
    Lifecycle(#[from] cadence_lifecycle::LifecycleError),
}

pub type AppResult<T> = Result<T, AppError>;
