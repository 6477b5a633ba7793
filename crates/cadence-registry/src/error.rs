//! Registry error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum RegistryError {
    /// Structural or semantic problem in the scheduling document.
    #[error("Config parse error: {0}")]
    ConfigParse(String),

    #[error("Failed to read config {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

impl RegistryError {
    pub(crate) fn strategy(id: &str, message: impl std::fmt::Display) -> Self {
        Self::ConfigParse(format!("strategy '{id}': {message}"))
    }
}

pub type RegistryResult<T> = Result<T, RegistryError>;
