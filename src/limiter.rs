//! Bounded concurrency.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::{Error, Result};
use crate::future::Future;

struct State {
    capacity: Option<usize>,
    count: usize,
    waiters: VecDeque<Future<()>>,
    available_waiters: Vec<Future<()>>,
}

/// Limits concurrent access to a critical section to at most `capacity` callers at once.
///
/// A `None` capacity means unlimited (every [`Limiter::acquire`] succeeds immediately), used when
/// only the iteration-pacing behavior of [`Limiter::available`]/[`Limiter::throttle`] is wanted
/// and not an actual cap.
pub struct Limiter {
    state: Mutex<State>,
}

impl Limiter {
    /// Creates a new limiter with the given capacity.
    #[must_use]
    pub fn new(capacity: Option<usize>) -> Arc<Self> {
        Arc::new(Limiter {
            state: Mutex::new(State {
                capacity,
                count: 0,
                waiters: VecDeque::new(),
                available_waiters: Vec::new(),
            }),
        })
    }

    /// Returns `true` if a call to [`Limiter::acquire`] would not need to wait right now.
    #[must_use]
    pub fn is_available(&self) -> bool {
        let state = self.state.lock();
        state.capacity.map_or(true, |cap| state.count < cap)
    }

    /// Changes the limiter's capacity, waking waiters if the new capacity frees up room.
    pub fn set_capacity(&self, capacity: Option<usize>) {
        let mut state = self.state.lock();
        state.capacity = capacity;
        Self::wake_if_available(&mut state);
    }

    fn wake_if_available(state: &mut State) {
        if !state.capacity.map_or(true, |cap| state.count < cap) {
            return;
        }
        for f in state.available_waiters.drain(..) {
            f.set_value(());
        }
    }

    /// Waits until a slot is available, then takes it. The returned [`Slot`] must be released
    /// exactly once (releasing twice is a [`Error::Misuse`]).
    pub async fn acquire(self: &Arc<Self>) -> Result<Slot> {
        let wait_on = {
            let mut state = self.state.lock();
            if state.capacity.map_or(true, |cap| state.count < cap) {
                None
            } else {
                let f = Future::new();
                state.waiters.push_back(f.clone());
                Some(f)
            }
        };
        if let Some(f) = wait_on {
            f.await?;
        }
        self.state.lock().count += 1;
        Ok(Slot {
            limiter: self.clone(),
            called: AtomicBool::new(false),
        })
    }

    fn release(&self) {
        let mut state = self.state.lock();
        state.count -= 1;
        let next_waiter = state.waiters.pop_front();
        let available_waiters = std::mem::take(&mut state.available_waiters);
        drop(state);
        if let Some(f) = next_waiter {
            f.set_value(());
        }
        for f in available_waiters {
            f.set_value(());
        }
    }

    /// Waits until the limiter has room, without taking a slot. Always yields to the scheduler at
    /// least once, even if the limiter is already available, so a loop calling this in a tight
    /// cycle can't race ahead of whatever is consuming the released slots.
    pub async fn available(&self) -> Result<()> {
        let f = Future::new();
        let already_available = {
            let mut state = self.state.lock();
            if state.capacity.map_or(true, |cap| state.count < cap) {
                true
            } else {
                state.available_waiters.push(f.clone());
                false
            }
        };
        if already_available {
            crate::future::yield_once().await;
            f.set_value(());
        }
        f.await
    }

    /// Paces `iter`, yielding each item only once [`Limiter::available`] resolves.
    #[must_use]
    pub fn throttle<I>(self: &Arc<Self>, iter: I) -> Throttle<I::IntoIter>
    where
        I: IntoIterator,
    {
        Throttle {
            limiter: self.clone(),
            iter: iter.into_iter(),
        }
    }
}

/// A permit obtained from [`Limiter::acquire`]. Must be released exactly once via
/// [`Slot::release`]; a `Slot` dropped without being released leaks its permit rather than
/// auto-releasing.
pub struct Slot {
    limiter: Arc<Limiter>,
    called: AtomicBool,
}

impl Slot {
    /// Releases this slot's permit back to the limiter.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Misuse`] if this slot has already been released.
    pub fn release(&self) -> Result<()> {
        if self.called.swap(true, Ordering::AcqRel) {
            return Err(Error::Misuse("slot already released"));
        }
        self.limiter.release();
        Ok(())
    }
}

/// An iterator adapter returned by [`Limiter::throttle`].
pub struct Throttle<I> {
    limiter: Arc<Limiter>,
    iter: I,
}

impl<I: Iterator> Throttle<I> {
    /// Waits for the limiter to have room, then returns the next item, or `None` once the
    /// underlying iterator is exhausted.
    pub async fn next(&mut self) -> Result<Option<I::Item>> {
        self.limiter.available().await?;
        Ok(self.iter.next())
    }
}
