//! Strategy registry for the cadence scheduler.
//!
//! Provides:
//! - `ConfigDocument`: the parsed scheduling document (TOML or JSON)
//! - `StrategyRegistry`: atomically swapped configuration snapshots
//! - `RegistryDiff`: what changed between two snapshots
//! - `CapabilityCatalog`: names of generators/executors known at startup

pub mod document;
pub mod error;
pub mod registry;

pub use document::{ConfigDocument, DocumentFormat, ExecutionSettings, StrategyConfig};
pub use error::{RegistryError, RegistryResult};
pub use registry::{CapabilityCatalog, RegistryDiff, RegistrySnapshot, StrategyRegistry};
