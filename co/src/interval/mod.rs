//! Self-rescheduling interval loop
//!
//! Runs an async task over and over: immediately at first, then after a delay
//! following each completion. Executions never overlap. The task steers the
//! loop through the [`Directive`] it returns, and the caller can stop it at any
//! time through the [`CancelHandle`].

mod directive;
mod engine;
mod handle;
mod report;

pub use directive::{Directive, IntervalStats, LoopState, StopReason};
pub use engine::{IntervalLoop, run_interval};
pub use handle::{CancelHandle, IntervalHandle, start_interval, start_interval_with_reporter};
pub use report::{FailureReporter, TaskFailure, TracingReporter};
