//! Structured concurrency: a [`Scope`] owns every task spawned into it and guarantees none of
//! them outlives the `scope` call that created it.

use std::future::Future as StdFuture;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use parking_lot::Mutex;

use crate::error::{Error, Result};
use crate::task::{self, JoinHandle, Task, TaskState};
use crate::time::{sleep_until, Instant};

/// A handle passed to a `scope` body, used to spawn children that the scope will wait for (and,
/// on error, cancel) before returning.
pub struct Scope {
    main_task: Arc<Task>,
    children: Arc<Mutex<Vec<Arc<Task>>>>,
    depth: usize,
}

impl Scope {
    fn new(main_task: Arc<Task>, depth: usize) -> Self {
        Scope {
            main_task,
            children: Arc::new(Mutex::new(Vec::new())),
            depth,
        }
    }

    /// Spawns `future` as a child of this scope.
    ///
    /// If `future` resolves to `Err`, the error is delivered to the scope's body as an interrupt —
    /// a failing child cancels its siblings and the scope body — in addition to being available
    /// through the returned [`JoinHandle`] for callers that `.await` it directly.
    pub fn spawn<F, T>(&self, future: F) -> JoinHandle<T>
    where
        F: StdFuture<Output = Result<T>> + Send + 'static,
        T: Send + 'static,
    {
        let scheduler = self
            .main_task
            .scheduler()
            .expect("scope outlived its scheduler");
        let main_task = self.main_task.clone();
        let depth = self.depth;

        let handle = task::spawn(&scheduler, async move {
            let result = future.await;
            if let Err(ref err) = result {
                main_task.post_interrupt(Error::interrupted(err.clone()), depth);
            }
            result
        });

        self.children.lock().push(handle.task().clone());
        handle
    }

    /// Interrupts every still-running child and the scope's own task with a cancellation error.
    ///
    /// Has the same downstream effect as the scope body returning an error or a spawned child
    /// failing: every child not yet done gets interrupted, and so does whatever the scope's body
    /// is currently awaiting (including a pending `finish_tasks` wait), which is what causes
    /// `scope`/`timeout_scope`/`deadline_scope` to unwind and return [`Error::Cancelled`].
    pub fn cancel(&self) {
        for child in self.children.lock().iter() {
            if child.state() != TaskState::Done {
                child.post_interrupt(Error::interrupted(Error::Cancelled), self.depth);
            }
        }
        self.main_task
            .post_interrupt(Error::interrupted(Error::Cancelled), self.depth);
    }
}

/// Waits for the first not-yet-done task in `children` to complete, or for the calling task to be
/// interrupted — whichever happens first.
///
/// Checks [`task::check_interrupt`] exactly once per poll rather than polling each child's own
/// completion signal (which would independently trip the same check and could misattribute the
/// interrupt to whichever child happens to be polled first).
struct AnyChildDone {
    children: Arc<Mutex<Vec<Arc<Task>>>>,
}

impl StdFuture for AnyChildDone {
    type Output = Result<()>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        if let Some(err) = task::check_interrupt() {
            return Poll::Ready(Err(err));
        }

        let children = self.children.lock();
        if children.iter().any(|c| c.state() == TaskState::Done) {
            return Poll::Ready(Ok(()));
        }
        for child in children.iter() {
            child.register_completion_waker(cx.waker().clone());
        }
        Poll::Pending
    }
}

/// Waits for every task in `children` to reach [`TaskState::Done`], tolerating (and returning)
/// the first interrupt delivered to the calling task while doing so.
async fn finish_tasks(children: &Arc<Mutex<Vec<Arc<Task>>>>) -> Result<()> {
    loop {
        let remaining = {
            let guard = children.lock();
            guard.iter().any(|c| c.state() != TaskState::Done)
        };
        if !remaining {
            return Ok(());
        }
        AnyChildDone {
            children: children.clone(),
        }
        .await?;
    }
}

/// Runs `body` in a new, nested scope.
///
/// On the happy path, waits for `body` to return and then for every child it spawned to finish.
/// If `body` returns an error, a spawned child does, or [`Scope::cancel`] is called — the three
/// user-visible ways a scope unwinds early — every still-running child is interrupted with a
/// generic "scope exited" signal, deliberately distinct from whatever error is actually
/// propagated, reaped while interrupts to the scope's own task are suppressed, and the triggering
/// error is returned with its internal-interrupt wrapper stripped.
pub async fn scope<F, Fut, T>(body: F) -> Result<T>
where
    F: FnOnce(Scope) -> Fut,
    Fut: StdFuture<Output = Result<T>>,
{
    let main_task = task::current().expect("scope() called outside of a running task");
    let depth_guard = main_task.enter_scope();
    let depth = main_task.scope_depth();

    let scope = Scope::new(main_task.clone(), depth);
    let children = scope.children.clone();

    let result = body(scope).await;
    let result = match result {
        Ok(value) => match finish_tasks(&children).await {
            Ok(()) => Ok(value),
            Err(err) => Err(err),
        },
        Err(err) => Err(err),
    };

    let result = match result {
        Ok(value) => Ok(value),
        Err(err) => {
            for child in children.lock().iter() {
                if child.state() != TaskState::Done {
                    child.post_interrupt(Error::interrupted(Error::Cancelled), depth);
                }
            }
            main_task.set_interruptible(false);
            let _ = finish_tasks(&children).await;
            main_task.set_interruptible(true);
            Err(err.unwrap_interrupt())
        }
    };

    drop(depth_guard);
    result
}

/// Runs `body` in a scope that is cancelled with [`Error::Timeout`] if `duration` elapses before
/// it finishes.
pub async fn timeout_scope<F, Fut, T>(duration: Duration, body: F) -> Result<T>
where
    F: FnOnce(Scope) -> Fut,
    Fut: StdFuture<Output = Result<T>>,
{
    deadline_scope(Instant::now() + duration, body).await
}

/// Runs `body` in a scope that is cancelled with [`Error::Timeout`] if `deadline` passes before it
/// finishes.
///
/// The timer is deliberately *not* a scope child: spawning it as one would force [`finish_tasks`]
/// to wait for the timer even on the happy path, delaying a scope that finishes early until the
/// deadline elapses anyway. Instead it's a standalone timer future with a completion callback that
/// posts the interrupt directly, and is unconditionally cancelled right after `scope` returns so it
/// can never fire late.
pub async fn deadline_scope<F, Fut, T>(deadline: Instant, body: F) -> Result<T>
where
    F: FnOnce(Scope) -> Fut,
    Fut: StdFuture<Output = Result<T>>,
{
    let main_task = task::current().expect("deadline_scope() called outside of a running task");
    let depth = main_task.scope_depth();

    let timer = sleep_until(deadline);
    let timer_for_cb = timer.clone();
    let task_for_cb = main_task.clone();
    timer.add_done_callback(move || {
        // The timer may settle by being cancelled below rather than by elapsing; only the latter
        // should ever post a timeout interrupt.
        if timer_for_cb.value().is_some() {
            task_for_cb.post_interrupt(Error::interrupted(Error::Timeout), depth);
        }
    });

    let result = scope(body).await;
    timer.cancel();
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::run;

    #[test]
    fn scope_waits_for_children() {
        let result = run(async {
            scope(|s| async move {
                let a = s.spawn(async { Ok(1) });
                let b = s.spawn(async { Ok(2) });
                Ok(a.await? + b.await?)
            })
            .await
        });
        assert_eq!(result.unwrap().unwrap(), 3);
    }

    #[test]
    fn scope_propagates_body_error() {
        let result = run(async {
            scope(|_s: Scope| async move { Err::<(), _>(Error::user(StubError)) }).await
        });
        assert!(matches!(result.unwrap(), Err(Error::User(_))));
    }

    #[test]
    fn scope_cancel_interrupts_children_and_body() {
        let result = run(async {
            scope(|s| async move {
                let never: crate::future::Future<()> = crate::future::Future::new();
                let child = s.spawn(async move { never.await });
                s.cancel();
                child.await
            })
            .await
        });
        assert!(matches!(result.unwrap(), Err(Error::Cancelled)));
    }

    #[test]
    fn scope_cancels_siblings_on_child_error() {
        let result = run(async {
            scope(|s| async move {
                let cancelled_child = s.spawn(async {
                    std::future::pending::<()>().await;
                    Ok(())
                });
                let _failing_child = s.spawn(async { Err::<(), _>(Error::user(StubError)) });
                cancelled_child.await?;
                Ok(())
            })
            .await
        });
        assert!(matches!(result.unwrap(), Err(Error::User(_))));
    }

    #[derive(Debug)]
    struct StubError;
    impl std::fmt::Display for StubError {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            f.write_str("stub error")
        }
    }
    impl std::error::Error for StubError {}
}
