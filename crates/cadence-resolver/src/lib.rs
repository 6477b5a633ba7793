//! Schedule resolution for the cadence scheduler.
//!
//! Converts a strategy's declared generation/execution schedules into
//! absolute fire instants, honouring the trading calendar:
//! - `next_generation_fire`: next generation slot strictly after "now"
//! - `next_execution_fire`: execution instant implied by a generation instant
//! - `execution_anchor`: the execution slot the engine should arm

pub mod error;
pub mod resolver;

pub use error::{ResolveError, ResolveResult};
pub use resolver::ScheduleResolver;
