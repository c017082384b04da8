//! Task identity, polling, and interrupt delivery.
//!
//! A [`Task`] wraps a type-erased, boxed task body (`Future<Output = ()>`); the actual output
//! value lives in the [`JoinHandle`] that `spawn` returns, not on the `Task` itself, so `Task` has
//! no type parameter and scopes can hold a plain `Vec<Arc<Task>>` of children regardless of what
//! each one returns.

use std::cell::RefCell;
use std::fmt;
use std::future::Future as StdFuture;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::task::{Context, Poll, Wake, Waker};

use parking_lot::Mutex;

use crate::error::{Error, Result};
use crate::future::Future;
use crate::scheduler::SchedulerShared;

/// Uniquely identifies a task for the lifetime of the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TaskId(u64);

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "task-{}", self.0)
    }
}

fn next_task_id() -> TaskId {
    static NEXT: AtomicU64 = AtomicU64::new(0);
    TaskId(NEXT.fetch_add(1, Ordering::Relaxed))
}

/// The coarse lifecycle state of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    /// Enqueued and waiting for its next `poll`.
    Ready,
    /// Polled at least once, suspended on some future, not currently queued.
    Waiting,
    /// The task body has returned.
    Done,
}

struct Interrupt {
    error: Error,
    depth: usize,
}

/// A single unit of scheduling: a boxed, type-erased task body plus the bookkeeping the
/// scheduler and enclosing scopes need to drive and interrupt it.
pub struct Task {
    id: TaskId,
    body: Mutex<Option<Pin<Box<dyn StdFuture<Output = ()> + Send>>>>,
    scheduler: Weak<SchedulerShared>,
    queued: AtomicBool,
    interrupt: Mutex<Option<Interrupt>>,
    interruptible: AtomicBool,
    /// Wakers registered by [`crate::scope`]'s "any child ready" wait. Separate from the
    /// [`crate::future::Future`] machinery so checking it never trips the interrupt-injection
    /// choke point a second time for the same poll.
    completion_wakers: Mutex<Vec<Waker>>,
    /// Depth of the innermost [`crate::scope::Scope`] this task is currently inside, used for
    /// interrupt dominance. Lives on the task rather than a thread-local so it stays correct
    /// across `.await` suspension points and concurrent tasks on the same thread.
    scope_depth: AtomicUsize,
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("id", &self.id)
            .field("state", &self.state())
            .finish()
    }
}

impl Task {
    pub(crate) fn spawn(
        scheduler: Weak<SchedulerShared>,
        body: Pin<Box<dyn StdFuture<Output = ()> + Send>>,
    ) -> Arc<Task> {
        Arc::new(Task {
            id: next_task_id(),
            body: Mutex::new(Some(body)),
            scheduler,
            queued: AtomicBool::new(true),
            interrupt: Mutex::new(None),
            interruptible: AtomicBool::new(true),
            completion_wakers: Mutex::new(Vec::new()),
            scope_depth: AtomicUsize::new(0),
        })
    }

    /// This task's unique id.
    #[must_use]
    pub fn id(&self) -> TaskId {
        self.id
    }

    /// Returns the task's current lifecycle state.
    #[must_use]
    pub fn state(&self) -> TaskState {
        if self.body.lock().is_none() {
            TaskState::Done
        } else if self.queued.load(Ordering::Acquire) {
            TaskState::Ready
        } else {
            TaskState::Waiting
        }
    }

    /// Polls the task body once. Returns `Poll::Ready(())` once the body has returned.
    ///
    /// Called only by the scheduler's tick loop, which holds the only `Arc<Task>` that is ever
    /// polled concurrently with itself (the run queue enforces at most one outstanding poll).
    pub(crate) fn poll(self: &Arc<Self>) -> Poll<()> {
        self.queued.store(false, Ordering::Release);

        let waker: Waker = Waker::from(self.clone());
        let mut cx = Context::from_waker(&waker);
        let _guard = CurrentTaskGuard::enter(self.clone());

        let mut body = self.body.lock();
        let Some(fut) = body.as_mut() else {
            return Poll::Ready(());
        };

        match fut.as_mut().poll(&mut cx) {
            Poll::Ready(()) => {
                *body = None;
                drop(body);
                for waker in self.completion_wakers.lock().drain(..) {
                    waker.wake();
                }
                Poll::Ready(())
            }
            Poll::Pending => Poll::Pending,
        }
    }

    /// Registers `waker` to be woken the next time this task completes. Used by
    /// [`crate::scope`]'s any-child-done wait; a no-op (immediate wake) if the task is already
    /// done so a late registration never misses the transition.
    pub(crate) fn register_completion_waker(&self, waker: Waker) {
        if self.state() == TaskState::Done {
            waker.wake();
        } else {
            self.completion_wakers.lock().push(waker);
        }
    }

    /// Returns this task's current scope nesting depth.
    pub(crate) fn scope_depth(&self) -> usize {
        self.scope_depth.load(Ordering::Acquire)
    }

    /// Enters a new, deeper scope, returning a guard that restores the previous depth on drop.
    pub(crate) fn enter_scope(self: &Arc<Self>) -> ScopeDepthGuard {
        let previous = self.scope_depth.fetch_add(1, Ordering::AcqRel);
        ScopeDepthGuard {
            task: self.clone(),
            previous,
        }
    }

    /// Upgrades this task's scheduler handle, if it's still alive.
    pub(crate) fn scheduler(&self) -> Option<Arc<SchedulerShared>> {
        self.scheduler.upgrade()
    }

    /// Posts an interrupt originating from the scope at nesting `depth` (0 = outermost).
    ///
    /// A pending interrupt is only replaced by one from a shallower or equal depth (an ancestor
    /// scope); interrupts from a deeper scope than the one already pending are dropped. Delivery
    /// itself is suppressed while the task has been marked non-interruptible, e.g. during a
    /// scope's reaping phase, which must not be re-entered.
    pub(crate) fn post_interrupt(self: &Arc<Self>, error: Error, depth: usize) {
        if !self.interruptible.load(Ordering::Acquire) {
            return;
        }
        let mut guard = self.interrupt.lock();
        let should_set = match &*guard {
            None => true,
            Some(existing) => depth <= existing.depth,
        };
        if !should_set {
            return;
        }
        *guard = Some(Interrupt { error, depth });
        drop(guard);
        if !self.queued.swap(true, Ordering::AcqRel) {
            if let Some(scheduler) = self.scheduler.upgrade() {
                scheduler.enqueue_task(self.clone());
            }
        }
    }

    /// Takes the pending interrupt, if any. Called once per poll from [`crate::future::Future`].
    pub(crate) fn take_interrupt(&self) -> Option<Error> {
        self.interrupt.lock().take().map(|i| i.error)
    }

    /// Disables (or re-enables) interrupt delivery to this task.
    pub(crate) fn set_interruptible(&self, interruptible: bool) {
        self.interruptible.store(interruptible, Ordering::Release);
    }
}

/// RAII guard returned by [`Task::enter_scope`]; restores the task's previous scope depth on drop.
pub(crate) struct ScopeDepthGuard {
    task: Arc<Task>,
    previous: usize,
}

impl Drop for ScopeDepthGuard {
    fn drop(&mut self) {
        self.task
            .scope_depth
            .store(self.previous, Ordering::Release);
    }
}

impl Wake for Task {
    fn wake(self: Arc<Self>) {
        if !self.queued.swap(true, Ordering::AcqRel) {
            if let Some(scheduler) = self.scheduler.upgrade() {
                scheduler.enqueue_task(self);
            }
        }
    }
}

thread_local! {
    static CURRENT_TASK: RefCell<Option<Arc<Task>>> = const { RefCell::new(None) };
}

/// RAII guard that makes nested, reentrant `run()` calls transparent to the outer task's
/// in-flight `poll()`: on drop it restores whatever `CURRENT_TASK` held at construction, rather
/// than clearing it, so an outer task resuming its own poll after a nested `run()` returns still
/// sees itself as current.
pub(crate) struct CurrentTaskGuard {
    previous: Option<Arc<Task>>,
}

impl CurrentTaskGuard {
    pub(crate) fn enter(task: Arc<Task>) -> Self {
        let previous = CURRENT_TASK.with(|cell| cell.borrow_mut().replace(task));
        CurrentTaskGuard { previous }
    }
}

impl Drop for CurrentTaskGuard {
    fn drop(&mut self) {
        CURRENT_TASK.with(|cell| *cell.borrow_mut() = self.previous.take());
    }
}

/// Returns the task currently being polled on this thread, if any.
pub(crate) fn current() -> Option<Arc<Task>> {
    CURRENT_TASK.with(|cell| cell.borrow().clone())
}

/// The interrupt-injection choke point: called by [`crate::future::Future::poll`] before it
/// checks its own outcome.
pub(crate) fn check_interrupt() -> Option<Error> {
    CURRENT_TASK.with(|cell| cell.borrow().as_ref().and_then(|t| t.take_interrupt()))
}

/// A handle to a spawned task's eventual result.
///
/// Awaiting a `JoinHandle` suspends until the task body returns (or the awaiting task is itself
/// interrupted, in which case the interrupt, not the child's result, is what's returned).
pub struct JoinHandle<T> {
    task: Arc<Task>,
    slot: Arc<Mutex<Option<Result<T>>>>,
    done: Future<()>,
}

impl<T> fmt::Debug for JoinHandle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JoinHandle").field("task", &self.task).finish()
    }
}

impl<T> JoinHandle<T> {
    /// The id of the underlying task.
    #[must_use]
    pub fn id(&self) -> TaskId {
        self.task.id
    }

    /// Returns `true` once the task body has returned.
    #[must_use]
    pub fn is_done(&self) -> bool {
        self.done.is_done()
    }

    pub(crate) fn task(&self) -> &Arc<Task> {
        &self.task
    }
}

impl<T: Send + 'static> StdFuture for JoinHandle<T> {
    type Output = Result<T>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let mut done = self.done.clone();
        match Pin::new(&mut done).poll(cx) {
            Poll::Pending => Poll::Pending,
            Poll::Ready(Ok(())) => {
                let result = self
                    .slot
                    .lock()
                    .take()
                    .expect("task body completed without storing a result");
                Poll::Ready(result)
            }
            Poll::Ready(Err(err)) => Poll::Ready(Err(err)),
        }
    }
}

/// Spawns `future` onto `scheduler`, returning a handle to its eventual result.
///
/// This is the one place a user-supplied future is boxed and wrapped with result-storage and
/// completion-signalling glue; `Scope::spawn` and top-level `run` both funnel through it, which
/// makes it the single place to bump the scheduler's active-task count so it stays paired with
/// the one decrement `tick` does per completed task.
pub(crate) fn spawn<F>(scheduler: &Arc<SchedulerShared>, future: F) -> JoinHandle<F::Output>
where
    F: StdFuture + Send + 'static,
    F::Output: Send + 'static,
{
    let slot: Arc<Mutex<Option<Result<F::Output>>>> = Arc::new(Mutex::new(None));
    let done: Future<()> = Future::new();

    let slot2 = slot.clone();
    let done2 = done.clone();
    let body = Box::pin(crate::context::fork(async move {
        let result = future.await;
        *slot2.lock() = Some(Ok(result));
        done2.set_value(());
    }));

    let task = Task::spawn(Arc::downgrade(scheduler), body);
    scheduler.mark_active();
    scheduler.enqueue_task(task.clone());

    JoinHandle { task, slot, done }
}
