//! HTTP control surface for the cadence scheduler.
//!
//! Exposes health, armed jobs, pending signals, manual generation/execution
//! triggers and signal cancellation over a small axum router.

pub mod config;
pub mod error;
pub mod server;
pub mod types;

pub use config::ApiConfig;
pub use error::{ApiError, ApiResult};
pub use server::{create_router, run_server, ApiState};
