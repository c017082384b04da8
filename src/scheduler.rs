//! The FIFO ready-queue scheduler, the reentrant blocking `run` entry point, and the manual
//! tick/flush/ready-future interface an external event loop can use to drive a [`Scheduler`]
//! itself instead of going through `run`.

use std::future::Future as StdFuture;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::task::Poll;

use parking_lot::{Condvar, Mutex};

use crate::error::{Error, Result};
use crate::future::Future;
use crate::task::{self, JoinHandle, Task};

/// Information about what a single [`Scheduler::tick`] accomplished.
///
/// Useful to an external driver deciding whether to call [`Scheduler::tick`] again immediately
/// (`has_remaining`) or fall back to awaiting [`Scheduler::ready_future`]; callers that don't care
/// about tick-level detail can otherwise ignore it entirely.
#[derive(Debug)]
#[non_exhaustive]
pub struct Tick {
    /// Number of tasks polled during this tick.
    pub polled: usize,
    /// Number of those tasks that completed.
    pub completed: usize,
    /// `true` if tasks remained queued after the tick (i.e. there's more ready work).
    pub has_remaining: bool,
}

/// The scheduler's shared state: a FIFO ready queue plus the bookkeeping needed to know when all
/// work is done and to wake a blocked `run` call.
pub(crate) struct SchedulerShared {
    ready: Mutex<std::collections::VecDeque<Arc<Task>>>,
    has_ready: Condvar,
    active_count: AtomicU64,
    closed: AtomicBool,
    shutdown_requested: Arc<AtomicBool>,
    /// The handle an external driver gets from [`Scheduler::ready_future`]. Settled and replaced
    /// with a fresh, unsettled one every time work becomes ready (or [`Scheduler::flush`] is
    /// called), so a driver that re-fetches it after each tick always has something to await.
    ready_signal: Mutex<Future<()>>,
}

impl SchedulerShared {
    fn new() -> Arc<Self> {
        Arc::new(SchedulerShared {
            ready: Mutex::new(std::collections::VecDeque::new()),
            has_ready: Condvar::new(),
            active_count: AtomicU64::new(0),
            closed: AtomicBool::new(false),
            shutdown_requested: Arc::new(AtomicBool::new(false)),
            ready_signal: Mutex::new(Future::new()),
        })
    }

    pub(crate) fn enqueue_task(&self, task: Arc<Task>) {
        if self.closed.load(Ordering::Acquire) {
            return;
        }
        let mut queue = self.ready.lock();
        queue.push_back(task);
        self.has_ready.notify_all();
        drop(queue);
        self.signal_ready();
    }

    /// Settles the current `ready_future` handle and replaces it with a fresh one. Idempotent from
    /// the caller's point of view (awaiting the old or the new handle both observe "ready" exactly
    /// once) and safe to call from any thread.
    fn signal_ready(&self) {
        let mut slot = self.ready_signal.lock();
        let old = std::mem::replace(&mut *slot, Future::new());
        old.set_value(());
    }

    /// Marks one more task as active. Called exactly once per task, at the single place tasks are
    /// actually created ([`crate::task::spawn`]), so it stays paired with `tick`'s one
    /// `fetch_sub` per completed task regardless of which API (`Scheduler::spawn`,
    /// `Scope::spawn`, or the `block_on` driver) ultimately created it.
    pub(crate) fn mark_active(&self) {
        self.active_count.fetch_add(1, Ordering::AcqRel);
    }

    fn tick(&self) -> Tick {
        let mut tick = Tick {
            polled: 0,
            completed: 0,
            has_remaining: false,
        };

        let batch: Vec<Arc<Task>> = {
            let mut queue = self.ready.lock();
            queue.drain(..).collect()
        };

        for task in batch {
            let _span = tracing::trace_span!("poll", task = %task.id()).entered();
            match task.poll() {
                Poll::Ready(()) => {
                    tick.completed += 1;
                    self.active_count.fetch_sub(1, Ordering::AcqRel);
                }
                Poll::Pending => {}
            }
            tick.polled += 1;
        }

        tick.has_remaining = !self.ready.lock().is_empty();

        if tick.polled > 0 {
            tracing::debug!(tick.polled, tick.completed, tick.has_remaining, "tick");
        }

        tick
    }

    fn active(&self) -> u64 {
        self.active_count.load(Ordering::Acquire)
    }

    fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }
}

/// A single scheduler instance, owning one FIFO ready queue.
///
/// Each call to [`run`] creates its own `Scheduler`; reentrant nested `run()` calls therefore get
/// independent queues and don't interfere with the outer scheduler's bookkeeping. [`run`] drives a
/// `Scheduler` to completion on its own, but nothing stops an external event loop from driving one
/// by hand via [`Scheduler::tick`]/[`Scheduler::ready_future`]/[`Scheduler::flush`] instead, to
/// interleave `duet`-managed tasks with work of its own.
pub struct Scheduler {
    shared: Arc<SchedulerShared>,
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Scheduler {
    /// Creates a new, empty scheduler.
    #[must_use]
    pub fn new() -> Self {
        Scheduler {
            shared: SchedulerShared::new(),
        }
    }

    pub(crate) fn shared(&self) -> &Arc<SchedulerShared> {
        &self.shared
    }

    /// Returns a shareable flag that, once set, makes [`run`] stop driving this scheduler the next
    /// time it checks (once per tick) and return [`Error::SchedulerShutdown`].
    ///
    /// `duet` deliberately stops short of installing a real OS signal handler itself (see
    /// DESIGN.md): wire one up yourself (e.g. via the `ctrlc` crate) and call
    /// `.store(true, Ordering::Release)` on the returned flag if you need one.
    #[must_use]
    pub fn shutdown_flag(&self) -> Arc<AtomicBool> {
        self.shared.shutdown_requested.clone()
    }

    /// Drains the ready queue once: polls every task that was ready at the moment of the call (not
    /// ones that become ready only as a side effect of this same tick; those wait for the next
    /// one), in FIFO order.
    ///
    /// For driving a scheduler from an external event loop instead of [`run`]. Call this in a
    /// loop, awaiting [`Scheduler::ready_future`] (or arranging for [`Scheduler::flush`] to be
    /// called, e.g. by a timer) between calls so the loop doesn't spin when there's nothing ready.
    pub fn tick(&self) -> Tick {
        self.shared.tick()
    }

    /// Returns a future that resolves once there is ready work for [`Scheduler::tick`] to drain, or
    /// [`Scheduler::flush`] is called, whichever happens first.
    ///
    /// Each call returns a fresh handle for whatever the *next* readiness transition will be; a
    /// driver loop should re-fetch it after every tick rather than reusing one handle, since a
    /// handle that already resolved stays resolved.
    #[must_use]
    pub fn ready_future(&self) -> Future<()> {
        self.shared.ready_signal.lock().clone()
    }

    /// Settles the current [`Scheduler::ready_future`] handle, waking any external driver parked on
    /// it, without requiring any task to actually be ready.
    ///
    /// Idempotent (settling an already-settled handle is a no-op) and safe to call from any
    /// thread, including from inside a timer callback armed to guarantee forward progress even if
    /// nothing else ever becomes ready.
    pub fn flush(&self) {
        self.shared.signal_ready();
    }

    /// Spawns `future`. Active-count bookkeeping happens inside [`task::spawn`] itself.
    pub(crate) fn spawn<F>(&self, future: F) -> JoinHandle<F::Output>
    where
        F: StdFuture + Send + 'static,
        F::Output: Send + 'static,
    {
        task::spawn(&self.shared, future)
    }

    /// Ticks the scheduler until either no tasks remain active or the ready queue is observed
    /// empty with active tasks still outstanding, parking this thread on the latter until an
    /// external waker (e.g. a cross-thread `Future::set_value`) refills the queue.
    /// Returns `true` if driving should stop because the scheduler finished, or `false` if it
    /// should stop early because [`Scheduler::shutdown_flag`] was tripped.
    fn drive_to_completion(&self) -> bool {
        loop {
            if self.shared.shutdown_requested.load(Ordering::Acquire) {
                return false;
            }
            let tick = self.shared.tick();
            if tick.has_remaining {
                continue;
            }
            if self.shared.active() == 0 {
                return true;
            }
            let mut queue = self.shared.ready.lock();
            while queue.is_empty()
                && self.shared.active() > 0
                && !self.shared.shutdown_requested.load(Ordering::Acquire)
            {
                self.shared
                    .has_ready
                    .wait_for(&mut queue, std::time::Duration::from_millis(50));
            }
            if self.shared.shutdown_requested.load(Ordering::Acquire) {
                return false;
            }
            if self.shared.active() == 0 {
                return true;
            }
            // queue now has work; drop the lock and loop back to tick it.
        }
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.shared.close();
    }
}

/// Blocks the calling thread until `future` resolves, using a fresh [`Scheduler`] to drive any
/// tasks it spawns.
///
/// `run` is reentrant: calling it from within a task body that's already running under an outer
/// `run` call is supported, and gets its own independent scheduler. This is what lets a
/// synchronous callback deep in a task body block on a `duet` computation without deadlocking the
/// task that's calling it.
/// Returns the shutdown flag (see [`Scheduler::shutdown_flag`]) of the scheduler driving the
/// currently running task, if called from within one.
#[must_use]
pub fn shutdown_flag() -> Option<Arc<AtomicBool>> {
    task::current()?.scheduler().map(|s| s.shutdown_requested.clone())
}

pub fn run<F>(future: F) -> Result<F::Output>
where
    F: StdFuture + Send + 'static,
    F::Output: Send + 'static,
{
    let scheduler = Scheduler::new();
    let handle = scheduler.spawn(future);
    block_on(&scheduler, handle)
}

/// Drives `scheduler` until `target` resolves.
///
/// Reentrancy falls out of [`Task::poll`]'s own current-task guard rather than anything
/// done here: each nested `run()` call spawns and polls its tasks through the same stack-nested
/// RAII guard, so a nested call's polls save and restore the outer task as current regardless of
/// recursion depth, with nothing extra required at this level.
pub(crate) fn block_on<T: Send + 'static>(
    scheduler: &Scheduler,
    target: JoinHandle<T>,
) -> Result<T> {
    let outcome: Arc<Mutex<Option<Result<T>>>> = Arc::new(Mutex::new(None));
    let outcome2 = outcome.clone();
    let driver_body: std::pin::Pin<Box<dyn StdFuture<Output = ()> + Send>> = Box::pin(async move {
        let result = target.await;
        *outcome2.lock() = Some(result);
    });
    let driver = Task::spawn(Arc::downgrade(scheduler.shared()), driver_body);
    scheduler.shared().mark_active();
    scheduler.shared().enqueue_task(driver);

    if !scheduler.drive_to_completion() {
        return Err(Error::SchedulerShutdown);
    }

    // `driver`'s body stores its outcome as its very last step before returning, so by the time
    // `active() == 0` (which is what stops `drive_to_completion`), it is always present.
    outcome.lock().take().unwrap_or(Err(Error::SchedulerShutdown))
}
