//! Failure reporting for interval tasks

use std::any::Any;

use thiserror::Error;
use tracing::error;

/// A task invocation that did not produce a directive
#[derive(Debug, Error)]
pub enum TaskFailure {
    #[error("task returned an error: {0:#}")]
    Error(eyre::Report),

    #[error("task panicked: {0}")]
    Panicked(String),
}

impl TaskFailure {
    /// Build a failure from a caught panic payload
    pub(crate) fn from_panic(payload: Box<dyn Any + Send>) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "non-string panic payload".to_string()
        };
        TaskFailure::Panicked(message)
    }

    /// Check if this failure was a panic
    pub fn is_panic(&self) -> bool {
        matches!(self, TaskFailure::Panicked(_))
    }
}

/// Sink for task failures caught by the loop.
///
/// Fire-and-forget: the loop carries on after reporting.
pub trait FailureReporter: Send + Sync {
    fn report(&self, message: &str, failure: &TaskFailure);
}

impl<F> FailureReporter for F
where
    F: Fn(&str, &TaskFailure) + Send + Sync,
{
    fn report(&self, message: &str, failure: &TaskFailure) {
        self(message, failure)
    }
}

/// Default reporter, logs at error level
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingReporter;

impl FailureReporter for TracingReporter {
    fn report(&self, message: &str, failure: &TaskFailure) {
        error!(error = %failure, panic = failure.is_panic(), "{}", message);
    }
}
