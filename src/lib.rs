//! A reentrant, single-threaded, cooperative task scheduler with structured concurrency.
//!
//! `duet` lets you write `async`/`.await` code and run it without an OS-thread-per-task runtime:
//! everything runs on the thread that calls [`run`], cooperatively, in FIFO order. Concurrency
//! comes from [`scope`] (structured, nursery-style task groups) and the crate's own
//! [`Future`](future::Future) cell rather than from preemption or parallelism.
//!
//! ```no_run
//! let result = duet::run(async {
//!     duet::scope(|scope| async move {
//!         let a = scope.spawn(async { Ok(1) });
//!         let b = scope.spawn(async { Ok(2) });
//!         Ok(a.await? + b.await?)
//!     })
//!     .await
//! });
//! assert_eq!(result.unwrap().unwrap(), 3);
//! ```

#[cfg(feature = "tokio-bridge")]
mod bridge;
mod context;
mod error;
mod future;
mod limiter;
mod pmap;
mod scheduler;
mod scope;
mod task;
mod time;

pub use context::ContextVar;
pub use error::{Error, Result};
pub use future::{completed_future, failed_future, Future};
pub use limiter::{Limiter, Slot, Throttle};
pub use pmap::{pmap, pmap_stream, pstarmap, pstarmap_stream, PmapStream, ScopeLimiter};
pub use scheduler::{run, shutdown_flag, Scheduler, Tick};
pub use scope::{deadline_scope, scope, timeout_scope, Scope};
pub use task::{JoinHandle, TaskId, TaskState};
pub use time::{sleep, sleep_until, timeout, Instant};

#[cfg(feature = "tokio-bridge")]
pub use bridge::run_with_tokio;

#[cfg(any(test, feature = "test-util"))]
pub use time::test_util;

/// Wraps `value` so it can be treated uniformly alongside task-returned futures.
///
/// Just [`completed_future`] under another name, for call sites that want to make the "this is
/// already a value, not something that needs awaiting" intent explicit.
#[must_use]
pub fn awaitable<T: Clone>(value: T) -> Future<T> {
    completed_future(value)
}

/// Adapts a synchronous function into one returning a [`Future`], so it can be passed anywhere a
/// `duet` coroutine is expected.
pub fn awaitable_func<T, F>(mut function: F) -> impl FnMut() -> Future<T>
where
    T: Clone,
    F: FnMut() -> T,
{
    move || completed_future(function())
}
