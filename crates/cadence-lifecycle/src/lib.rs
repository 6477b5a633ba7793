//! Signal lifecycle tracking for the cadence scheduler.
//!
//! Tracks every generated signal through `pending` to one of the terminal
//! states (`executed`, `failed`, `cancelled`) with bounded retries.

pub mod error;
pub mod policy;
pub mod tracker;

pub use error::{LifecycleError, LifecycleResult};
pub use policy::{FailureOutcome, RetryPolicy};
pub use tracker::{SignalLifecycleTracker, SignalStats};
