//! Observability for the cadence scheduler.
//!
//! - Prometheus metrics for job fires, arming failures, signal transitions
//!   and configuration reloads
//! - Structured logging with tracing (JSON in production)

pub mod error;
pub mod logging;
pub mod metrics;

pub use error::{TelemetryError, TelemetryResult};
pub use logging::init_logging;
pub use metrics::Metrics;
