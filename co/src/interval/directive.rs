//! Value types exchanged between the interval loop, its task, and its caller

use std::fmt;
use std::time::Duration;

/// What the task wants the loop to do after this invocation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Directive {
    /// Wait the loop's default delay, then run again
    #[default]
    Continue,
    /// Wait this long instead of the default delay, then run again
    Delay(Duration),
    /// Stop permanently; no further invocations
    Cancel,
}

impl From<()> for Directive {
    fn from(_: ()) -> Self {
        Directive::Continue
    }
}

impl From<Duration> for Directive {
    fn from(delay: Duration) -> Self {
        Directive::Delay(delay)
    }
}

impl From<Option<Duration>> for Directive {
    fn from(delay: Option<Duration>) -> Self {
        delay.map_or(Directive::Continue, Directive::Delay)
    }
}

/// Lifecycle of an interval loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    /// Created, not started
    Idle,
    /// A task invocation is in flight
    Running,
    /// Between invocations, timer pending
    Waiting,
    /// Terminal
    Stopped,
}

impl fmt::Display for LoopState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LoopState::Idle => write!(f, "idle"),
            LoopState::Running => write!(f, "running"),
            LoopState::Waiting => write!(f, "waiting"),
            LoopState::Stopped => write!(f, "stopped"),
        }
    }
}

/// Why a loop reached [`LoopState::Stopped`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// The task returned [`Directive::Cancel`]
    Directive,
    /// The cancel handle was invoked
    External,
}

/// Summary returned once a loop has stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IntervalStats {
    /// Number of times the task was invoked
    pub invocations: u64,
    /// Invocations that returned an error or panicked
    pub failures: u64,
    /// What stopped the loop
    pub stop_reason: StopReason,
}
