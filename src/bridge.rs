//! Bridges a `duet` computation into an external async runtime, gated behind the `tokio-bridge`
//! feature.
//!
//! `duet`'s own scheduler already blocks its calling thread on a condvar rather than needing an
//! external loop to pump it via [`crate::Scheduler::tick`]/[`crate::Scheduler::flush`], so this
//! bridge doesn't drive one by hand: it runs the ordinary blocking [`crate::run`] on tokio's
//! blocking thread pool, which exists for exactly this "synchronous code under an async runtime"
//! case.

use std::future::Future as StdFuture;
use std::time::Duration;

use crate::error::{Error, Result};

/// Runs `future` to completion using `duet`'s scheduler, without blocking the calling tokio
/// worker thread.
///
/// `flush_timeout` is accepted for forward compatibility: this bridge runs [`crate::run`] directly
/// rather than driving [`crate::Scheduler::tick`]/[`crate::Scheduler::flush`] itself (see module
/// docs), so it is currently unused. It's kept in the signature so a tick/flush-driven bridge can
/// be swapped in later without an API break.
///
/// # Errors
///
/// Returns [`Error::SchedulerShutdown`] if the blocking task panics or is cancelled before the
/// scheduler finishes; otherwise forwards whatever [`crate::run`] returns.
pub async fn run_with_tokio<F>(future: F, _flush_timeout: Duration) -> Result<F::Output>
where
    F: StdFuture + Send + 'static,
    F::Output: Send + 'static,
{
    tokio::task::spawn_blocking(move || crate::scheduler::run(future))
        .await
        .unwrap_or(Err(Error::SchedulerShutdown))
}
