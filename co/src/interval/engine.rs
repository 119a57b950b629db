//! IntervalLoop - the Running/Waiting state machine

use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;

use eyre::Result;
use futures::FutureExt;
use tokio::sync::watch;
use tracing::{debug, error, info};

use super::directive::{Directive, IntervalStats, LoopState, StopReason};
use super::handle::{CancelHandle, IntervalHandle};
use super::report::{FailureReporter, TaskFailure, TracingReporter};

/// Message handed to the reporter for every caught failure
const FAILURE_MESSAGE: &str = "unhandled failure in interval task";

/// Drives a task repeatedly with a delay between completions.
///
/// State machine: `Idle -> Running -> Waiting -> Running -> ... -> Stopped`.
/// The first invocation happens without delay. Cancellation is checked before
/// every invocation, whenever the task completes, and while the timer is
/// pending; an in-flight invocation is never interrupted.
pub struct IntervalLoop<F> {
    task: F,
    default_delay: Duration,
    reporter: Arc<dyn FailureReporter>,
    state: watch::Sender<LoopState>,
    invocations: u64,
    failures: u64,
}

impl<F, Fut> IntervalLoop<F>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Directive>>,
{
    /// Create a loop that waits `default_delay` between invocations
    pub fn new(task: F, default_delay: Duration) -> Self {
        debug!(?default_delay, "IntervalLoop::new: called");
        let (state, _) = watch::channel(LoopState::Idle);
        Self {
            task,
            default_delay,
            reporter: Arc::new(TracingReporter),
            state,
            invocations: 0,
            failures: 0,
        }
    }

    /// Send caught task failures to `reporter` instead of the log
    pub fn with_reporter(mut self, reporter: Arc<dyn FailureReporter>) -> Self {
        self.reporter = reporter;
        self
    }

    /// Watch the loop's state transitions
    pub fn subscribe_state(&self) -> watch::Receiver<LoopState> {
        self.state.subscribe()
    }

    /// Run the loop on the current task until it stops.
    ///
    /// `canceller` is kept alive for the whole run, so the loop only stops on
    /// an explicit cancel or a [`Directive::Cancel`].
    pub async fn run(mut self, canceller: CancelHandle) -> IntervalStats {
        info!(default_delay = ?self.default_delay, "IntervalLoop started");
        let mut cancelled = canceller.subscribe();

        let stop_reason = loop {
            if *cancelled.borrow_and_update() {
                break StopReason::External;
            }

            self.state.send_replace(LoopState::Running);
            let directive = self.invoke().await;

            // Cancel arrived while the task was in flight
            if *cancelled.borrow_and_update() {
                break StopReason::External;
            }

            let next_delay = match directive {
                Directive::Cancel => {
                    debug!(invocation = self.invocations, "run: task requested cancel");
                    break StopReason::Directive;
                }
                Directive::Delay(delay) => delay,
                Directive::Continue => self.default_delay,
            };

            self.state.send_replace(LoopState::Waiting);
            debug!(?next_delay, "run: waiting before next invocation");

            // Dropping the sleep is what clears the pending timer
            let cancelled_while_waiting = tokio::select! {
                _ = tokio::time::sleep(next_delay) => false,
                _ = cancelled.changed() => true,
            };
            if cancelled_while_waiting {
                break StopReason::External;
            }
        };

        self.state.send_replace(LoopState::Stopped);
        let stats = IntervalStats {
            invocations: self.invocations,
            failures: self.failures,
            stop_reason,
        };
        info!(
            invocations = stats.invocations,
            failures = stats.failures,
            ?stop_reason,
            "IntervalLoop stopped"
        );
        stats
    }

    /// Invoke the task once; failures are reported and read as `Continue`
    async fn invoke(&mut self) -> Directive {
        self.invocations += 1;
        debug!(invocation = self.invocations, "invoke: called");

        // The task can panic while building its future or while it runs
        let outcome = match panic::catch_unwind(AssertUnwindSafe(|| (self.task)())) {
            Ok(fut) => AssertUnwindSafe(fut).catch_unwind().await,
            Err(payload) => Err(payload),
        };

        let failure = match outcome {
            Ok(Ok(directive)) => return directive,
            Ok(Err(report)) => TaskFailure::Error(report),
            Err(payload) => TaskFailure::from_panic(payload),
        };

        self.failures += 1;
        debug!(invocation = self.invocations, %failure, "invoke: task failed");
        // A panicking reporter must not take the loop down with it
        let reporter = &self.reporter;
        let reported = panic::catch_unwind(AssertUnwindSafe(|| reporter.report(FAILURE_MESSAGE, &failure)));
        if let Err(payload) = reported {
            let reporter_failure = TaskFailure::from_panic(payload);
            error!(error = %reporter_failure, task_error = %failure, "failure reporter panicked");
        }
        Directive::Continue
    }
}

impl<F, Fut> IntervalLoop<F>
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = Result<Directive>> + Send + 'static,
{
    /// Spawn the loop onto the tokio runtime
    pub fn spawn(self) -> IntervalHandle {
        debug!("IntervalLoop::spawn: called");
        let canceller = CancelHandle::new();
        let state = self.subscribe_state();
        let join = tokio::spawn(self.run(canceller.clone()));
        IntervalHandle::new(canceller, state, join)
    }
}

/// Run `task` on the current task until the loop stops.
///
/// Inline form of [`IntervalLoop`] for callers that drive the loop themselves
/// instead of spawning it; `canceller` stops it from elsewhere.
pub async fn run_interval<F, Fut>(
    task: F,
    default_delay: Duration,
    reporter: Arc<dyn FailureReporter>,
    canceller: CancelHandle,
) -> IntervalStats
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Directive>>,
{
    IntervalLoop::new(task, default_delay)
        .with_reporter(reporter)
        .run(canceller)
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicU64, Ordering};
    use tokio::time::Instant;

    fn recording_reporter() -> (Arc<dyn FailureReporter>, Arc<Mutex<Vec<String>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let reporter = move |message: &str, failure: &TaskFailure| {
            sink.lock().unwrap().push(format!("{message}: {failure}"));
        };
        (Arc::new(reporter), seen)
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_invocation_is_immediate() {
        let start = Instant::now();
        let first_at = Arc::new(Mutex::new(None));
        let slot = first_at.clone();

        let looped = IntervalLoop::new(
            move || {
                *slot.lock().unwrap() = Some(Instant::now());
                async { Ok(Directive::Cancel) }
            },
            Duration::from_secs(60),
        );
        let stats = looped.run(CancelHandle::new()).await;

        assert_eq!(stats.invocations, 1);
        assert_eq!(stats.stop_reason, StopReason::Directive);
        assert_eq!(first_at.lock().unwrap().unwrap(), start);
    }

    #[tokio::test(start_paused = true)]
    async fn test_default_and_override_delays() {
        let start = Instant::now();
        let times = Arc::new(Mutex::new(Vec::new()));
        let sink = times.clone();

        let looped = IntervalLoop::new(
            move || {
                let mut times = sink.lock().unwrap();
                times.push(Instant::now() - start);
                let directive = match times.len() {
                    1 => Directive::Continue,
                    2 => Directive::Delay(Duration::from_secs(5)),
                    3 => Directive::Delay(Duration::ZERO),
                    _ => Directive::Cancel,
                };
                async move { Ok(directive) }
            },
            Duration::from_secs(1),
        );
        let stats = looped.run(CancelHandle::new()).await;

        assert_eq!(stats.invocations, 4);
        assert_eq!(
            *times.lock().unwrap(),
            vec![
                Duration::ZERO,
                Duration::from_secs(1),
                Duration::from_secs(6),
                Duration::from_secs(6),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_invocations_never_overlap() {
        let in_flight = Arc::new(AtomicU64::new(0));
        let max_seen = Arc::new(AtomicU64::new(0));
        let count = Arc::new(AtomicU64::new(0));
        let (in_flight2, max_seen2, count2) = (in_flight.clone(), max_seen.clone(), count.clone());

        let looped = IntervalLoop::new(
            move || {
                let in_flight = in_flight2.clone();
                let max_seen = max_seen2.clone();
                let n = count2.fetch_add(1, Ordering::SeqCst) + 1;
                async move {
                    let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                    max_seen.fetch_max(now, Ordering::SeqCst);
                    // Task takes longer than the delay
                    tokio::time::sleep(Duration::from_millis(250)).await;
                    in_flight.fetch_sub(1, Ordering::SeqCst);
                    Ok(if n >= 5 { Directive::Cancel } else { Directive::Continue })
                }
            },
            Duration::from_millis(10),
        );
        let stats = looped.run(CancelHandle::new()).await;

        assert_eq!(stats.invocations, 5);
        assert_eq!(max_seen.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_error_is_reported_once_and_uses_default_delay() {
        let start = Instant::now();
        let times = Arc::new(Mutex::new(Vec::new()));
        let sink = times.clone();
        let (reporter, seen) = recording_reporter();

        let looped = IntervalLoop::new(
            move || {
                let mut times = sink.lock().unwrap();
                times.push(Instant::now() - start);
                let n = times.len();
                async move {
                    match n {
                        // Would have been an override, but the error wins
                        1 => Err(eyre::eyre!("flaky backend")),
                        _ => Ok(Directive::Cancel),
                    }
                }
            },
            Duration::from_secs(2),
        )
        .with_reporter(reporter);
        let stats = looped.run(CancelHandle::new()).await;

        assert_eq!(stats.invocations, 2);
        assert_eq!(stats.failures, 1);
        assert_eq!(*times.lock().unwrap(), vec![Duration::ZERO, Duration::from_secs(2)]);

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert!(seen[0].starts_with(FAILURE_MESSAGE));
        assert!(seen[0].contains("flaky backend"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_panics_are_contained() {
        let count = Arc::new(AtomicU64::new(0));
        let counter = count.clone();
        let (reporter, seen) = recording_reporter();

        let looped = IntervalLoop::new(
            move || {
                let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
                if n == 1 {
                    panic!("panicked before returning a future");
                }
                async move {
                    if n == 2 {
                        panic!("panicked inside the future");
                    }
                    Ok(Directive::Cancel)
                }
            },
            Duration::from_millis(100),
        )
        .with_reporter(reporter);
        let stats = looped.run(CancelHandle::new()).await;

        assert_eq!(stats.invocations, 3);
        assert_eq!(stats.failures, 2);
        let seen = seen.lock().unwrap();
        assert!(seen[0].contains("panicked before returning a future"));
        assert!(seen[1].contains("panicked inside the future"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_during_wait_clears_timer() {
        let count = Arc::new(AtomicU64::new(0));
        let counter = count.clone();
        let looped = IntervalLoop::new(
            move || {
                counter.fetch_add(1, Ordering::SeqCst);
                async { Ok(Directive::Continue) }
            },
            Duration::from_secs(3600),
        );
        let mut state = looped.subscribe_state();
        let canceller = CancelHandle::new();
        let run = tokio::spawn(looped.run(canceller.clone()));

        state.wait_for(|s| *s == LoopState::Waiting).await.unwrap();
        let before = Instant::now();
        canceller.cancel();
        let stats = run.await.unwrap();

        // Stopped without sitting out the hour
        assert_eq!(Instant::now(), before);
        assert_eq!(stats.invocations, 1);
        assert_eq!(stats.stop_reason, StopReason::External);
        assert_eq!(*state.borrow(), LoopState::Stopped);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_during_run_lets_task_finish() {
        let finished = Arc::new(AtomicU64::new(0));
        let done = finished.clone();
        let looped = IntervalLoop::new(
            move || {
                let done = done.clone();
                async move {
                    tokio::time::sleep(Duration::from_secs(1)).await;
                    done.fetch_add(1, Ordering::SeqCst);
                    Ok(Directive::Continue)
                }
            },
            Duration::from_millis(10),
        );
        let mut state = looped.subscribe_state();
        let canceller = CancelHandle::new();
        let run = tokio::spawn(looped.run(canceller.clone()));

        state.wait_for(|s| *s == LoopState::Running).await.unwrap();
        canceller.cancel();
        let stats = run.await.unwrap();

        assert_eq!(finished.load(Ordering::SeqCst), 1);
        assert_eq!(stats.invocations, 1);
        assert_eq!(stats.stop_reason, StopReason::External);
    }

    #[tokio::test]
    async fn test_cancel_before_start_never_invokes() {
        let canceller = CancelHandle::new();
        canceller.cancel();

        let count = Arc::new(AtomicU64::new(0));
        let counter = count.clone();
        let looped = IntervalLoop::new(
            move || {
                counter.fetch_add(1, Ordering::SeqCst);
                async { Ok(Directive::Continue) }
            },
            Duration::from_secs(1),
        );
        let mut state = looped.subscribe_state();
        let stats = looped.run(canceller).await;

        assert_eq!(stats.invocations, 0);
        assert_eq!(stats.stop_reason, StopReason::External);
        assert_eq!(count.load(Ordering::SeqCst), 0);
        assert_eq!(*state.borrow_and_update(), LoopState::Stopped);
    }

    struct PanickingReporter;

    impl FailureReporter for PanickingReporter {
        fn report(&self, _: &str, _: &TaskFailure) {
            panic!("reporter blew up");
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_panicking_reporter_does_not_stop_loop() {
        let count = Arc::new(AtomicU64::new(0));
        let counter = count.clone();

        let looped = IntervalLoop::new(
            move || {
                let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
                async move {
                    if n < 3 {
                        return Err(eyre::eyre!("run {n} failed"));
                    }
                    Ok(Directive::Cancel)
                }
            },
            Duration::from_millis(10),
        )
        .with_reporter(Arc::new(PanickingReporter));
        let stats = looped.run(CancelHandle::new()).await;

        assert_eq!(stats.invocations, 3);
        assert_eq!(stats.failures, 2);
        assert_eq!(stats.stop_reason, StopReason::Directive);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_interval_inline() {
        let start = Instant::now();
        let times = Arc::new(Mutex::new(Vec::new()));
        let sink = times.clone();
        let (reporter, seen) = recording_reporter();

        let stats = run_interval(
            move || {
                let n = {
                    let mut times = sink.lock().unwrap();
                    times.push(Instant::now() - start);
                    times.len()
                };
                async move {
                    match n {
                        1 => Err(eyre::eyre!("cold cache")),
                        2 => Ok(Directive::Delay(Duration::from_secs(5))),
                        _ => Ok(Directive::Cancel),
                    }
                }
            },
            Duration::from_secs(1),
            reporter,
            CancelHandle::new(),
        )
        .await;

        assert_eq!(stats.invocations, 3);
        assert_eq!(stats.failures, 1);
        assert_eq!(seen.lock().unwrap().len(), 1);
        assert_eq!(
            *times.lock().unwrap(),
            vec![Duration::ZERO, Duration::from_secs(1), Duration::from_secs(6)]
        );
    }
}
