//! The crate's one-shot, externally-settable value cell.
//!
//! A [`Future`] is the single suspension primitive in `duet`: `sleep`, `Limiter::acquire`, scope
//! child-joins and plain user-created futures are all, underneath, one of these. Keeping every
//! leaf await in the crate routed through the same `poll` implementation gives interrupt delivery
//! a single choke point instead of requiring every combinator to re-implement it.

use std::fmt;
use std::future::Future as StdFuture;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll, Waker};

use parking_lot::Mutex;

use crate::error::{Error, Result};
use crate::task;

enum Outcome<T> {
    Unset,
    Value(T),
    Error(Error),
    Cancelled,
}

struct Inner<T> {
    outcome: Mutex<Outcome<T>>,
    wakers: Mutex<Vec<Waker>>,
    callbacks: Mutex<Vec<Box<dyn FnOnce() + Send>>>,
}

/// A one-shot value/error cell that can be settled from any thread and awaited from a task.
///
/// Cloning a `Future` gives another handle to the same underlying cell (it is reference counted
/// internally); settling through any clone settles all of them.
#[must_use = "futures do nothing unless `.await`ed or polled"]
pub struct Future<T> {
    inner: Arc<Inner<T>>,
}

impl<T> Clone for Future<T> {
    fn clone(&self) -> Self {
        Future {
            inner: self.inner.clone(),
        }
    }
}

impl<T> fmt::Debug for Future<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match &*self.inner.outcome.lock() {
            Outcome::Unset => "unset",
            Outcome::Value(_) => "value",
            Outcome::Error(_) => "error",
            Outcome::Cancelled => "cancelled",
        };
        f.debug_struct("Future").field("state", &state).finish()
    }
}

impl<T> Default for Future<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Future<T> {
    /// Creates a new, unset future.
    pub fn new() -> Self {
        Future {
            inner: Arc::new(Inner {
                outcome: Mutex::new(Outcome::Unset),
                wakers: Mutex::new(Vec::new()),
                callbacks: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Returns `true` if this future has reached a terminal state.
    #[must_use]
    pub fn is_done(&self) -> bool {
        !matches!(&*self.inner.outcome.lock(), Outcome::Unset)
    }

    /// Registers `cb` to run once this future settles. Runs `cb` immediately if already settled.
    ///
    /// Callbacks are meant only to schedule a wake, not to run user code; this entry point exists
    /// for that internal use (e.g. waking a [`crate::scope::Scope`]'s any-child-done wait) and is
    /// not part of the public surface.
    pub(crate) fn add_done_callback(&self, cb: impl FnOnce() + Send + 'static) {
        let mut outcome = self.inner.outcome.lock();
        if matches!(&*outcome, Outcome::Unset) {
            self.inner.callbacks.lock().push(Box::new(cb));
        } else {
            drop(outcome);
            cb();
        }
        drop(outcome);
    }

    fn settle(&self, outcome: Outcome<T>) -> bool {
        let mut guard = self.inner.outcome.lock();
        if !matches!(&*guard, Outcome::Unset) {
            return false;
        }
        *guard = outcome;
        drop(guard);
        for waker in self.inner.wakers.lock().drain(..) {
            waker.wake();
        }
        for cb in self.inner.callbacks.lock().drain(..) {
            cb();
        }
        true
    }

    /// Settles this future with an error. No-op if already settled.
    pub fn set_error(&self, err: Error) {
        self.try_set_error(err);
    }

    /// Like [`Self::set_error`], returning whether the transition occurred.
    pub fn try_set_error(&self, err: Error) -> bool {
        self.settle(Outcome::Error(err))
    }

    /// Settles this future as cancelled. No-op if already settled.
    pub fn cancel(&self) {
        self.try_cancel();
    }

    /// Like [`Self::cancel`], returning whether the transition occurred.
    pub fn try_cancel(&self) -> bool {
        self.settle(Outcome::Cancelled)
    }
}

impl<T: Clone> Future<T> {
    /// Settles this future with a value. No-op if already settled.
    pub fn set_value(&self, value: T) {
        self.try_set_value(value);
    }

    /// Like [`Self::set_value`], returning whether the transition occurred.
    pub fn try_set_value(&self, value: T) -> bool {
        self.settle(Outcome::Value(value))
    }

    /// Settles this future with a value, treating an already-settled future as misuse rather than
    /// a silent no-op.
    pub fn set_value_checked(&self, value: T) -> Result<()> {
        if self.try_set_value(value) {
            Ok(())
        } else {
            Err(Error::Misuse("future was already settled"))
        }
    }

    /// Returns the value if this future settled successfully, without consuming it.
    #[must_use]
    pub fn value(&self) -> Option<T> {
        match &*self.inner.outcome.lock() {
            Outcome::Value(v) => Some(v.clone()),
            _ => None,
        }
    }

    /// Returns the error if this future settled with an error, without consuming it.
    #[must_use]
    pub fn error(&self) -> Option<Error> {
        match &*self.inner.outcome.lock() {
            Outcome::Error(e) => Some(e.clone()),
            Outcome::Cancelled => Some(Error::Cancelled),
            _ => None,
        }
    }
}

impl<T: Clone> StdFuture for Future<T> {
    type Output = Result<T>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        // Interrupt injection choke point: whatever future a task happens to be suspended on,
        // the next poll observes a pending interrupt before its own outcome.
        if let Some(err) = task::check_interrupt() {
            return Poll::Ready(Err(err));
        }

        let outcome = self.inner.outcome.lock();
        match &*outcome {
            Outcome::Unset => {
                drop(outcome);
                self.inner.wakers.lock().push(cx.waker().clone());
                Poll::Pending
            }
            Outcome::Value(v) => Poll::Ready(Ok(v.clone())),
            Outcome::Error(e) => Poll::Ready(Err(e.clone())),
            Outcome::Cancelled => Poll::Ready(Err(Error::Cancelled)),
        }
    }
}

/// Yields to the scheduler exactly once, regardless of whether anything is actually ready: the
/// first poll re-queues the task (via `wake_by_ref`) and returns `Pending`; every poll after that
/// returns `Ready` immediately. Used where an operation would otherwise resolve synchronously on
/// its first poll and let a tight caller loop race arbitrarily far ahead of whatever it's supposed
/// to be paced against.
struct YieldOnce {
    yielded: bool,
}

impl StdFuture for YieldOnce {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        if self.yielded {
            Poll::Ready(())
        } else {
            self.yielded = true;
            cx.waker().wake_by_ref();
            Poll::Pending
        }
    }
}

pub(crate) fn yield_once() -> impl StdFuture<Output = ()> {
    YieldOnce { yielded: false }
}

/// Returns an already-completed future holding `value`.
pub fn completed_future<T: Clone>(value: T) -> Future<T> {
    let f = Future::new();
    f.set_value(value);
    f
}

/// Returns an already-failed future holding `err`.
pub fn failed_future<T: Clone>(err: Error) -> Future<T> {
    let f: Future<T> = Future::new();
    f.set_error(err);
    f
}
