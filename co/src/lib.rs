//! CoopSync - cooperative concurrency primitives for tokio
//!
//! Two independent building blocks for code that runs on a cooperative async
//! runtime:
//!
//! - [`AsyncLock`] - a fair FIFO mutex. Waiters are admitted strictly in the
//!   order they called [`AsyncLock::enter`], one critical section at a time.
//! - [`IntervalLoop`] - runs an async task repeatedly, immediately at first and
//!   then after a delay following each completion, with per-run delay
//!   overrides, cancellation, and containment of failing runs.
//!
//! # Example
//!
//! ```ignore
//! use std::time::Duration;
//! use coopsync::{AsyncLock, Directive, start_interval};
//!
//! let lock = AsyncLock::new();
//! let release = lock.enter().await;
//! // critical section
//! release.release();
//!
//! let handle = start_interval(|| async { Ok(Directive::Continue) }, Duration::from_secs(1));
//! handle.cancel();
//! ```

pub mod cli;
pub mod config;
pub mod interval;
mod lock;

pub use config::Config;
pub use interval::{
    CancelHandle, Directive, FailureReporter, IntervalHandle, IntervalLoop, IntervalStats, LoopState, StopReason,
    TaskFailure, TracingReporter, run_interval, start_interval, start_interval_with_reporter,
};
pub use lock::{Acquire, AsyncLock, LockRelease};

/// Default delay between interval runs (1s)
pub const DEFAULT_DELAY_MS: u64 = 1000;

/// Default number of demo interval runs
pub const DEFAULT_MAX_RUNS: u64 = 5;

/// Default number of lock demo workers
pub const DEFAULT_WORKERS: usize = 4;

/// Default time each lock demo worker holds the lock (10ms)
pub const DEFAULT_HOLD_MS: u64 = 10;
