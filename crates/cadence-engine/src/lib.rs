//! Scheduler engine for the cadence signal scheduler.
//!
//! Owns one scheduled job per enabled (strategy, job kind) pair:
//! - A single dispatcher task sleeps until the earliest queued fire
//! - Each fire runs on its own task and re-arms the job when it completes
//! - Generators and executors are pluggable capabilities resolved by name
//!
//! Bundled capabilities: [`WebhookExecutor`] and [`CommandGenerator`].

pub mod capability;
pub mod command;
pub mod engine;
pub mod error;
pub mod queue;
pub mod webhook;

pub use capability::{
    BoxFuture, Capabilities, GenerationContext, MockExecutor, MockGenerator, SignalExecutor,
    SignalGenerator,
};
pub use command::CommandGenerator;
pub use engine::{ExecutionSummary, ManualReport, SchedulerEngine};
pub use error::{EngineError, EngineResult, ExecutionError, GenerationError};
pub use queue::{FireEntry, FireQueue, FireReason};
pub use webhook::WebhookExecutor;
