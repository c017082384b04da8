//! Timers backing [`crate::scope::timeout_scope`]/[`crate::scope::deadline_scope`].
//!
//! `duet` has no interrupt-driven environment to hook a timer wheel into, so each
//! [`sleep`]/[`sleep_until`] parks a single background thread for its duration and settles a
//! [`crate::future::Future`] from it — the scheduler already supports cross-thread settlement for
//! exactly this reason.

use std::ops::{Add, Sub};
use std::time::Duration;

use crate::future::Future;

/// A point in time, as measured by [`Instant::now`].
///
/// A thin wrapper around [`std::time::Instant`] rather than a re-export so that a fake clock (see
/// `test_util::FakeClock`) can stand in for it without changing any call site's type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Instant(std::time::Instant);

impl Instant {
    /// Returns the current instant.
    #[must_use]
    pub fn now() -> Self {
        Instant(std::time::Instant::now())
    }
}

impl Add<Duration> for Instant {
    type Output = Instant;

    fn add(self, rhs: Duration) -> Instant {
        Instant(self.0 + rhs)
    }
}

impl Sub<Instant> for Instant {
    type Output = Duration;

    fn sub(self, rhs: Instant) -> Duration {
        self.0.saturating_duration_since(rhs.0)
    }
}

/// Returns a [`Future`] that settles with a value once `duration` has elapsed.
#[must_use]
pub fn sleep(duration: Duration) -> Future<()> {
    sleep_until(Instant::now() + duration)
}

/// Returns a [`Future`] that settles with a value once `deadline` has passed.
///
/// If `deadline` is already in the past, the background thread's `sleep` call returns
/// immediately and the future settles on its next poll.
#[must_use]
pub fn sleep_until(deadline: Instant) -> Future<()> {
    let timer = Future::new();
    let timer2 = timer.clone();
    let duration = deadline.0.saturating_duration_since(std::time::Instant::now());
    std::thread::spawn(move || {
        std::thread::sleep(duration);
        timer2.set_value(());
    });
    timer
}

/// Runs `future`, returning [`crate::error::Error::Timeout`] if `duration` elapses first.
///
/// A thin convenience wrapper over [`crate::scope::timeout_scope`] for callers that just want a
/// single future raced against a deadline rather than a full scope.
pub async fn timeout<F, T>(duration: Duration, future: F) -> crate::error::Result<T>
where
    F: std::future::Future<Output = crate::error::Result<T>>,
    T: Send + 'static,
{
    crate::scope::timeout_scope(duration, move |_scope| future).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn instant_add_duration_orders_correctly() {
        let now = Instant::now();
        let later = now + Duration::from_secs(1);
        assert!(later > now);
    }

    #[test]
    fn sleep_settles_after_duration() {
        let f = sleep(Duration::from_millis(5));
        std::thread::sleep(Duration::from_millis(50));
        assert!(f.is_done());
    }
}

/// Deterministic test helpers avoiding real sleeps in the test suite.
#[cfg(any(test, feature = "test-util"))]
pub mod test_util {
    use super::Instant;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::time::Duration;

    /// A fake clock whose "now" only advances when [`FakeClock::advance`] is called.
    pub struct FakeClock {
        nanos: AtomicU64,
    }

    impl FakeClock {
        /// Creates a fake clock starting at an arbitrary fixed epoch.
        #[must_use]
        pub fn new() -> Self {
            FakeClock {
                nanos: AtomicU64::new(0),
            }
        }

        /// Advances the fake clock by `duration`.
        pub fn advance(&self, duration: Duration) {
            self.nanos
                .fetch_add(u64::try_from(duration.as_nanos()).unwrap_or(u64::MAX), Ordering::AcqRel);
        }

        /// Returns an [`Instant`]-like offset usable only for relative comparisons in tests.
        #[must_use]
        pub fn elapsed(&self) -> Duration {
            Duration::from_nanos(self.nanos.load(Ordering::Acquire))
        }
    }

    impl Default for FakeClock {
        fn default() -> Self {
            Self::new()
        }
    }

    #[test]
    fn fake_clock_advances_deterministically() {
        let clock = FakeClock::new();
        clock.advance(Duration::from_secs(1));
        clock.advance(Duration::from_millis(500));
        assert_eq!(clock.elapsed(), Duration::from_millis(1500));
    }

    #[allow(dead_code)]
    fn _unused_instant_reference(_: Instant) {}
}
