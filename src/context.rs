//! Per-invocation dynamic context, forked into every spawned task at spawn time.
//!
//! Mirrors Python's `contextvars`: a task started from inside another task sees a snapshot of the
//! spawning task's context as of the moment it was spawned, and any `ContextVar::set` calls it
//! makes afterwards are visible only to itself and tasks it goes on to spawn, never back to its
//! parent or out to siblings running on the same thread.

use std::any::Any;
use std::cell::RefCell;
use std::collections::HashMap;
use std::future::Future as StdFuture;
use std::marker::PhantomData;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::task::{Context as TaskContext, Poll};

type ContextMap = HashMap<u64, Arc<dyn Any + Send + Sync>>;

thread_local! {
    static CURRENT_CONTEXT: RefCell<Arc<ContextMap>> = RefCell::new(Arc::new(HashMap::new()));
}

fn next_var_id() -> u64 {
    static NEXT: AtomicU64 = AtomicU64::new(0);
    NEXT.fetch_add(1, Ordering::Relaxed)
}

/// A dynamically scoped variable, readable and writable from whichever task currently holds the
/// thread, forked (copy-on-write) into every task spawned after it's set.
pub struct ContextVar<T> {
    id: u64,
    _marker: PhantomData<fn() -> T>,
}

impl<T: Clone + Send + Sync + 'static> ContextVar<T> {
    /// Declares a new context variable, distinct from every other `ContextVar`.
    #[must_use]
    pub fn new() -> Self {
        ContextVar {
            id: next_var_id(),
            _marker: PhantomData,
        }
    }

    /// Returns the value most recently [`ContextVar::set`] by the current task or one of its
    /// ancestors, if any.
    #[must_use]
    pub fn get(&self) -> Option<T> {
        CURRENT_CONTEXT.with(|c| {
            c.borrow()
                .get(&self.id)
                .and_then(|v| v.downcast_ref::<T>())
                .cloned()
        })
    }

    /// Sets this variable's value for the remainder of the current task (and any tasks it spawns
    /// from here on), without affecting already-spawned siblings or the parent task.
    pub fn set(&self, value: T) {
        CURRENT_CONTEXT.with(|c| {
            let mut map = (**c.borrow()).clone();
            map.insert(self.id, Arc::new(value) as Arc<dyn Any + Send + Sync>);
            *c.borrow_mut() = Arc::new(map);
        });
    }
}

impl<T: Clone + Send + Sync + 'static> Default for ContextVar<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Wraps `inner` so that, each time it's polled, it runs under a private snapshot of the calling
/// task's context taken at wrap time, with any updates that snapshot undergoes persisted across
/// polls of `inner` but invisible outside it.
struct Forked<T> {
    inner: Pin<Box<dyn StdFuture<Output = T> + Send>>,
    context: RefCell<Arc<ContextMap>>,
}

impl<T> StdFuture for Forked<T> {
    type Output = T;

    fn poll(self: Pin<&mut Self>, cx: &mut TaskContext<'_>) -> Poll<T> {
        let this = self.get_mut();
        let snapshot = this.context.borrow().clone();
        let previous = CURRENT_CONTEXT.with(|c| c.replace(snapshot));
        let poll = this.inner.as_mut().poll(cx);
        let after = CURRENT_CONTEXT.with(|c| c.replace(previous));
        *this.context.borrow_mut() = after;
        poll
    }
}

/// Captures the calling task's current context and returns a future that runs `inner` under a
/// private fork of it. Used by [`crate::task::spawn`] so every newly spawned task forks its
/// parent's context exactly once, at the moment it's spawned.
pub(crate) fn fork<F>(inner: F) -> impl StdFuture<Output = F::Output> + Send
where
    F: StdFuture + Send + 'static,
{
    let snapshot = CURRENT_CONTEXT.with(|c| c.borrow().clone());
    Forked {
        inner: Box::pin(inner),
        context: RefCell::new(snapshot),
    }
}
