//! Signal persistence for the cadence scheduler.
//!
//! Signal rows are journaled as JSON Lines, one file per signal table.
//! Replaying the journal rebuilds the latest state of every signal.

pub mod error;
pub mod journal;

pub use error::{PersistenceError, PersistenceResult};
pub use journal::{SignalJournal, SignalRecord};
