//! Control API error types.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use cadence_core::StrategyId;
use cadence_engine::EngineError;
use cadence_lifecycle::LifecycleError;
use thiserror::Error;

use crate::types::ErrorBody;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Unknown strategy: {0}")]
    UnknownStrategy(StrategyId),

    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),

    #[error("Metrics unavailable: {0}")]
    Metrics(String),

    #[error("Failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        source: std::io::Error,
    },

    #[error("Server error: {0}")]
    Io(#[from] std::io::Error),
}

pub type ApiResult<T> = Result<T, ApiError>;

impl ApiError {
    #[must_use]
    pub fn status(&self) -> StatusCode {
        match self {
            Self::UnknownStrategy(_)
            | Self::Engine(EngineError::UnknownStrategy(_))
            | Self::Lifecycle(LifecycleError::SignalNotFound(_)) => StatusCode::NOT_FOUND,
            Self::Lifecycle(LifecycleError::InvalidTransition { .. }) => StatusCode::CONFLICT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            success: false,
            error: self.to_string(),
        };
        (self.status(), Json(body)).into_response()
    }
}
