//! AsyncLock - FIFO asynchronous mutex
//!
//! The lock keeps no queue. Its only state is the *tail*: the completion signal
//! of the most recently admitted waiter. Each call to [`AsyncLock::enter`]
//! installs a fresh unsettled signal as the new tail and waits on the one it
//! replaced, so the chain of signals is the queue and admission order is call
//! order.
//!
//! ```ignore
//! let lock = AsyncLock::new();
//!
//! let release = lock.enter().await;
//! // critical section
//! release.release();
//! ```

use std::future::Future;
use std::pin::Pin;
use std::sync::{Mutex, PoisonError};
use std::task::{Context, Poll};

use tokio::sync::oneshot;
use tokio::sync::oneshot::error::TryRecvError;
use tracing::debug;

/// Message sent down a settled tail signal.
///
/// `None` means the holder released. `Some(signal)` is sent by an acquisition
/// that was abandoned while still queued: its successor inherits the signal it
/// was waiting on instead of being admitted early.
#[derive(Debug)]
struct Handoff(Option<Signal>);

type Signal = oneshot::Receiver<Handoff>;

/// A fair, strictly FIFO asynchronous mutex.
///
/// The lock does not wrap any data; it only orders critical sections.
#[derive(Debug, Default)]
pub struct AsyncLock {
    /// `None` is the already-settled initial tail
    tail: Mutex<Option<Signal>>,
}

impl AsyncLock {
    /// Create an unlocked lock
    pub fn new() -> Self {
        debug!("AsyncLock::new: called");
        Self::default()
    }

    /// Queue for the lock.
    ///
    /// The tail swap runs here, synchronously, before the returned future is
    /// ever polled. Two `enter` calls are admitted in the order they were
    /// made, regardless of the order their futures are first polled.
    ///
    /// Dropping the returned future before it resolves gives up the place in
    /// line without admitting the next waiter ahead of the current holder.
    pub fn enter(&self) -> Acquire {
        let (tx, rx) = oneshot::channel();
        let prev = {
            let mut tail = self.tail.lock().unwrap_or_else(PoisonError::into_inner);
            tail.replace(rx)
        };
        debug!(queued = prev.is_some(), "AsyncLock::enter: called");
        Acquire {
            waiting: prev,
            tx: Some(tx),
        }
    }

    /// Run `critical` while holding the lock.
    ///
    /// The place in line is taken when `with` is called. The lock is released
    /// on every exit path of the returned future, including panics and the
    /// future being dropped.
    pub fn with<F>(&self, critical: F) -> impl Future<Output = F::Output> + use<F>
    where
        F: Future,
    {
        let acquire = self.enter();
        async move {
            let _release = acquire.await;
            critical.await
        }
    }

    /// Whether some admitted or queued caller has not released yet
    pub fn is_locked(&self) -> bool {
        let mut tail = self.tail.lock().unwrap_or_else(PoisonError::into_inner);
        // Walk settled signals forward so the answer reflects the live holder
        while let Some(signal) = tail.as_mut() {
            match signal.try_recv() {
                Err(TryRecvError::Empty) => return true,
                Ok(Handoff(next)) => *tail = next,
                Err(TryRecvError::Closed) => *tail = None,
            }
        }
        false
    }
}

/// Future returned by [`AsyncLock::enter`], resolving to the release token
#[derive(Debug)]
#[must_use = "the place in line is given up when this future is dropped"]
pub struct Acquire {
    /// Signal of the predecessor; `None` once admitted
    waiting: Option<Signal>,
    /// Settles this caller's own tail signal
    tx: Option<oneshot::Sender<Handoff>>,
}

impl Future for Acquire {
    type Output = LockRelease;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        while let Some(signal) = self.waiting.as_mut() {
            match Pin::new(signal).poll(cx) {
                Poll::Pending => return Poll::Pending,
                Poll::Ready(Ok(Handoff(next))) => self.waiting = next,
                // Sender dropped: the predecessor released without sending
                Poll::Ready(Err(_)) => self.waiting = None,
            }
        }
        Poll::Ready(LockRelease { tx: self.tx.take() })
    }
}

impl Drop for Acquire {
    fn drop(&mut self) {
        // Abandoned while still queued: pass our predecessor to our successor
        let (Some(tx), Some(mut waiting)) = (self.tx.take(), self.waiting.take()) else {
            return;
        };
        // Skip past settled handoffs so a handed-off signal never nests another
        loop {
            match waiting.try_recv() {
                Err(TryRecvError::Empty) => {
                    debug!("Acquire::drop: abandoned while queued, handing off");
                    let _ = tx.send(Handoff(Some(waiting)));
                    return;
                }
                Ok(Handoff(Some(inner))) => waiting = inner,
                // Predecessor already released; dropping tx admits the successor
                Ok(Handoff(None)) | Err(TryRecvError::Closed) => {
                    debug!("Acquire::drop: abandoned after predecessor released");
                    return;
                }
            }
        }
    }
}

/// Release token for one admission to an [`AsyncLock`].
///
/// Call [`LockRelease::release`] when the critical section is done. Dropping
/// the token releases as well, so the lock is freed on every exit path.
/// Leaking the token (`mem::forget`) starves every later waiter.
#[derive(Debug)]
#[must_use = "dropping the token releases the lock immediately"]
pub struct LockRelease {
    tx: Option<oneshot::Sender<Handoff>>,
}

impl LockRelease {
    /// Relinquish the lock, admitting the next waiter in line
    pub fn release(mut self) {
        self.settle();
    }

    fn settle(&mut self) {
        if let Some(tx) = self.tx.take() {
            debug!("LockRelease::settle: releasing");
            // Nobody queued behind us is fine
            let _ = tx.send(Handoff(None));
        }
    }
}

impl Drop for LockRelease {
    fn drop(&mut self) {
        self.settle();
    }
}
