use std::fmt;

/// Result alias used throughout this crate.
pub type Result<T> = std::result::Result<T, Error>;

/// The error taxonomy produced by the scheduler.
///
/// Only [`Error::User`], [`Error::Cancelled`] and [`Error::Timeout`] are meant to escape a
/// [`crate::scope`] boundary; [`Error::Interrupted`] is the internal delivery vehicle and is always
/// unwrapped before reaching a caller (see [`crate::scope::scope`]).
#[derive(Debug)]
pub enum Error {
    /// An error raised by a task body.
    User(Box<dyn std::error::Error + Send + Sync>),
    /// The enclosing scope (or a `Future`) was cancelled.
    Cancelled,
    /// A `timeout_scope`/`deadline_scope` deadline elapsed.
    Timeout,
    /// The scheduler was dropped while tasks were still active.
    SchedulerShutdown,
    /// An internal-interrupt sentinel. Never returned to user code; unwrapped at scope
    /// boundaries. Carries the underlying error that triggered the interrupt.
    Interrupted(Box<Error>),
    /// Programmer error: double release of a [`crate::limiter::Slot`], awaiting a future that
    /// will never settle and was dropped, spawning on a closed scheduler, etc.
    Misuse(&'static str),
}

impl Error {
    /// Wraps an arbitrary user error.
    pub fn user<E>(err: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Error::User(Box::new(err))
    }

    /// Returns `true` for [`Error::Cancelled`] and [`Error::Timeout`], the two errors user code is
    /// expected to routinely catch and recover from.
    #[must_use]
    pub fn is_cancellation(&self) -> bool {
        matches!(self, Error::Cancelled | Error::Timeout)
    }

    /// Strips the `Interrupted` wrapper (if any), returning the user-visible error it carries, so
    /// nothing in `duet`'s internal interrupt machinery is mentioned by the returned error.
    #[must_use]
    pub fn unwrap_interrupt(self) -> Error {
        match self {
            Error::Interrupted(inner) => inner.unwrap_interrupt(),
            other => other,
        }
    }

    pub(crate) fn interrupted(inner: Error) -> Self {
        Error::Interrupted(Box::new(inner))
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::User(e) => write!(f, "{e}"),
            Error::Cancelled => f.write_str("cancelled"),
            Error::Timeout => f.write_str("timed out"),
            Error::SchedulerShutdown => f.write_str("scheduler shut down with tasks active"),
            Error::Interrupted(inner) => write!(f, "interrupted: {inner}"),
            Error::Misuse(msg) => write!(f, "misuse: {msg}"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::User(e) => Some(e.as_ref()),
            Error::Interrupted(inner) => Some(inner.as_ref()),
            _ => None,
        }
    }
}

impl Clone for Error {
    /// Futures may be awaited more than once (e.g. a scope's "any child done" signal); errors
    /// therefore need to be cheaply duplicated. User errors lose their concrete type across the
    /// clone and are flattened to their `Display` text, matching the fact that
    /// `Box<dyn std::error::Error>` is not `Clone` in std.
    fn clone(&self) -> Self {
        match self {
            Error::User(e) => Error::User(Box::new(StringError(e.to_string()))),
            Error::Cancelled => Error::Cancelled,
            Error::Timeout => Error::Timeout,
            Error::SchedulerShutdown => Error::SchedulerShutdown,
            Error::Interrupted(inner) => Error::Interrupted(Box::new((**inner).clone())),
            Error::Misuse(msg) => Error::Misuse(msg),
        }
    }
}

#[derive(Debug)]
struct StringError(String);

impl fmt::Display for StringError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::error::Error for StringError {}
