//! Cadence signal scheduler process.
//!
//! Wires the registry, journal, lifecycle tracker and engine together and
//! drives them in one of two modes:
//! - Automated: arm every job and run until interrupted, hot-reloading the
//!   scheduling document
//! - Manual: run the requested jobs once for every enabled strategy and exit
//!
//! In automated mode the HTTP control API from `cadence-api` is served
//! alongside the scheduler when enabled.

pub mod app;
pub mod config;
pub mod error;

pub use app::{Application, ConfigWatcher};
pub use config::{AppConfig, ExecutorConfig, GeneratorConfig};
pub use error::{AppError, AppResult};
