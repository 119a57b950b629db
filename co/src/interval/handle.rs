//! Caller-side handles for a spawned interval loop

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use eyre::{Context, Result};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::debug;

use super::directive::{Directive, IntervalStats, LoopState};
use super::engine::IntervalLoop;
use super::report::FailureReporter;

/// Idempotent stop switch for an interval loop.
///
/// Cheap to clone; every clone flips the same switch.
#[derive(Debug, Clone)]
pub struct CancelHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl CancelHandle {
    /// Create a switch in the "not cancelled" position
    pub fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    /// Stop future invocations. Safe to call any number of times.
    pub fn cancel(&self) {
        let was_cancelled = self.tx.send_replace(true);
        debug!(was_cancelled, "CancelHandle::cancel: called");
    }

    /// Check if cancel has been requested
    pub fn is_cancelled(&self) -> bool {
        *self.tx.borrow()
    }

    pub(crate) fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }
}

impl Default for CancelHandle {
    fn default() -> Self {
        Self::new()
    }
}

/// Handle to a loop spawned with [`start_interval`].
///
/// Dropping the handle detaches the loop; it keeps running until the task
/// returns [`Directive::Cancel`] or a [`CancelHandle`] obtained from
/// [`IntervalHandle::canceller`] is used.
#[derive(Debug)]
pub struct IntervalHandle {
    canceller: CancelHandle,
    state: watch::Receiver<LoopState>,
    join: JoinHandle<IntervalStats>,
}

impl IntervalHandle {
    pub(crate) fn new(
        canceller: CancelHandle,
        state: watch::Receiver<LoopState>,
        join: JoinHandle<IntervalStats>,
    ) -> Self {
        Self { canceller, state, join }
    }

    /// Stop future invocations; an in-flight invocation runs to completion
    pub fn cancel(&self) {
        self.canceller.cancel();
    }

    /// A detachable cancel switch for this loop
    pub fn canceller(&self) -> CancelHandle {
        self.canceller.clone()
    }

    /// Check if cancel has been requested
    pub fn is_cancelled(&self) -> bool {
        self.canceller.is_cancelled()
    }

    /// Current lifecycle state
    pub fn state(&self) -> LoopState {
        *self.state.borrow()
    }

    /// Check if the loop has reached `Stopped` and its task has exited
    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    /// Wait for the loop to stop
    pub async fn join(self) -> Result<IntervalStats> {
        debug!("IntervalHandle::join: called");
        self.join.await.context("Interval loop task did not complete")
    }
}

/// Start repeatedly running `task`, first immediately, then `default_delay`
/// after each completion. Failures go to the tracing log.
pub fn start_interval<F, Fut>(task: F, default_delay: Duration) -> IntervalHandle
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = Result<Directive>> + Send + 'static,
{
    IntervalLoop::new(task, default_delay).spawn()
}

/// [`start_interval`] with failures sent to `reporter`
pub fn start_interval_with_reporter<F, Fut>(
    task: F,
    default_delay: Duration,
    reporter: Arc<dyn FailureReporter>,
) -> IntervalHandle
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = Result<Directive>> + Send + 'static,
{
    IntervalLoop::new(task, default_delay).with_reporter(reporter).spawn()
}
