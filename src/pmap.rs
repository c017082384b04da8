//! Ordered parallel map, plus streaming and throttled variants (`pmap_stream`/`pstarmap_stream`,
//! `ScopeLimiter`) for callers that want results one at a time instead of as a batch.

use std::collections::{HashMap, VecDeque};
use std::future::Future as StdFuture;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll, Waker};

use parking_lot::Mutex;

use crate::error::{Error, Result};
use crate::limiter::Limiter;
use crate::scope::{scope, Scope};
use crate::task;

struct CollectorState<T> {
    items: VecDeque<(usize, T)>,
    error: Option<Error>,
    done: bool,
    waker: Option<Waker>,
}

/// Funnels out-of-order `(index, value)` pairs from several concurrently-running tasks to a
/// single in-order consumer.
struct Collector<T> {
    state: Mutex<CollectorState<T>>,
}

impl<T> Collector<T> {
    fn new() -> Arc<Self> {
        Arc::new(Collector {
            state: Mutex::new(CollectorState {
                items: VecDeque::new(),
                error: None,
                done: false,
                waker: None,
            }),
        })
    }

    fn add(&self, item: (usize, T)) {
        let mut state = self.state.lock();
        state.items.push_back(item);
        if let Some(w) = state.waker.take() {
            w.wake();
        }
    }

    fn error(&self, err: Error) {
        let mut state = self.state.lock();
        state.error = Some(err);
        state.done = true;
        if let Some(w) = state.waker.take() {
            w.wake();
        }
    }

    fn finish(&self) {
        let mut state = self.state.lock();
        state.done = true;
        if let Some(w) = state.waker.take() {
            w.wake();
        }
    }
}

struct NextItem<'a, T> {
    collector: &'a Collector<T>,
}

impl<T> StdFuture for NextItem<'_, T> {
    type Output = Option<Result<(usize, T)>>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        if let Some(err) = task::check_interrupt() {
            return Poll::Ready(Some(Err(err)));
        }
        let mut state = self.collector.state.lock();
        if let Some(item) = state.items.pop_front() {
            return Poll::Ready(Some(Ok(item)));
        }
        if let Some(err) = state.error.take() {
            return Poll::Ready(Some(Err(err)));
        }
        if state.done {
            return Poll::Ready(None);
        }
        state.waker = Some(cx.waker().clone());
        Poll::Pending
    }
}

/// An async iterator of `func` applied to each item of the wrapped source, yielded in the
/// original input order as each result becomes available.
pub struct PmapStream<U> {
    collector: Arc<Collector<U>>,
    buffer: HashMap<usize, U>,
    next_idx: usize,
    exhausted: bool,
}

impl<U> PmapStream<U> {
    /// Returns the next result in order, or `None` once every item has been yielded.
    pub async fn next(&mut self) -> Option<Result<U>> {
        loop {
            if let Some(value) = self.buffer.remove(&self.next_idx) {
                self.next_idx += 1;
                return Some(Ok(value));
            }
            if self.exhausted {
                return None;
            }
            match (NextItem {
                collector: &self.collector,
            })
            .await
            {
                Some(Ok((i, value))) => {
                    self.buffer.insert(i, value);
                }
                Some(Err(err)) => {
                    self.exhausted = true;
                    return Some(Err(err));
                }
                None => self.exhausted = true,
            }
        }
    }
}

/// Spawns one task per item (gated by a [`Limiter`] of the given `limit`) into a fresh, nested
/// scope of `scope`, streaming results back in input order as they complete.
pub fn pmap_stream<T, U, F, Fut>(
    scope_handle: &Scope,
    func: F,
    iterable: impl IntoIterator<Item = T> + Send + 'static,
    limit: Option<usize>,
) -> PmapStream<U>
where
    T: Send + 'static,
    U: Send + 'static,
    F: Fn(T) -> Fut + Send + Sync + 'static,
    Fut: StdFuture<Output = Result<U>> + Send + 'static,
{
    let collector = Collector::new();
    let collector_for_generator = collector.clone();
    let func = Arc::new(func);
    let items: Vec<T> = iterable.into_iter().collect();

    scope_handle.spawn(async move {
        let result: Result<()> = scope(move |gen_scope| {
            let func = func.clone();
            let collector = collector_for_generator.clone();
            async move {
                let limiter = Limiter::new(limit);
                for (i, arg) in items.into_iter().enumerate() {
                    let slot = limiter.acquire().await?;
                    let func = func.clone();
                    let collector = collector.clone();
                    gen_scope.spawn(async move {
                        let outcome = func(arg).await;
                        let _ = slot.release();
                        outcome.map(|value| {
                            collector.add((i, value));
                        })
                    });
                }
                Ok(())
            }
        })
        .await;

        match result {
            Ok(()) => collector.finish(),
            Err(err) => collector.error(err),
        }
        Ok(())
    });

    PmapStream {
        collector,
        buffer: HashMap::new(),
        next_idx: 0,
        exhausted: false,
    }
}

/// Like [`pmap_stream`] but applies `func` to each tuple of arguments from `iterable`.
pub fn pstarmap_stream<A, B, U, F, Fut>(
    scope_handle: &Scope,
    func: F,
    iterable: impl IntoIterator<Item = (A, B)> + Send + 'static,
    limit: Option<usize>,
) -> PmapStream<U>
where
    A: Send + 'static,
    B: Send + 'static,
    U: Send + 'static,
    F: Fn(A, B) -> Fut + Send + Sync + 'static,
    Fut: StdFuture<Output = Result<U>> + Send + 'static,
{
    let func = Arc::new(func);
    pmap_stream(
        scope_handle,
        move |(a, b)| {
            let func = func.clone();
            async move { func(a, b).await }
        },
        iterable,
        limit,
    )
}

/// Applies `func` to every item of `iterable`, running up to `limit` calls concurrently, and
/// returns the results in input order.
pub async fn pmap<T, U, F, Fut>(
    func: F,
    iterable: impl IntoIterator<Item = T> + Send + 'static,
    limit: Option<usize>,
) -> Result<Vec<U>>
where
    T: Send + 'static,
    U: Send + 'static,
    F: Fn(T) -> Fut + Send + Sync + 'static,
    Fut: StdFuture<Output = Result<U>> + Send + 'static,
{
    scope(move |scope_handle| async move {
        let mut stream = pmap_stream(&scope_handle, func, iterable, limit);
        let mut results = Vec::new();
        while let Some(item) = stream.next().await {
            results.push(item?);
        }
        Ok(results)
    })
    .await
}

/// Applies `func` to every tuple of args in `iterable`, running up to `limit` calls concurrently,
/// and returns the results in input order.
pub async fn pstarmap<A, B, U, F, Fut>(
    func: F,
    iterable: impl IntoIterator<Item = (A, B)> + Send + 'static,
    limit: Option<usize>,
) -> Result<Vec<U>>
where
    A: Send + 'static,
    B: Send + 'static,
    U: Send + 'static,
    F: Fn(A, B) -> Fut + Send + Sync + 'static,
    Fut: StdFuture<Output = Result<U>> + Send + 'static,
{
    let func = Arc::new(func);
    pmap(
        move |(a, b)| {
            let func = func.clone();
            async move { func(a, b).await }
        },
        iterable,
        limit,
    )
    .await
}

/// A [`Scope`] paired with a [`Limiter`], combining background-task spawning with throttled
/// `pmap`-style helpers.
pub struct ScopeLimiter<'scope> {
    scope: &'scope Scope,
    limiter: Arc<Limiter>,
}

impl<'scope> ScopeLimiter<'scope> {
    /// Pairs `scope` with `limiter`.
    #[must_use]
    pub fn new(scope: &'scope Scope, limiter: Arc<Limiter>) -> Self {
        ScopeLimiter { scope, limiter }
    }

    /// Spawns a background task in the underlying scope, bypassing the limiter.
    pub fn spawn<F, T>(&self, future: F) -> task::JoinHandle<T>
    where
        F: StdFuture<Output = Result<T>> + Send + 'static,
        T: Send + 'static,
    {
        self.scope.spawn(future)
    }

    /// Like [`pmap_stream`], but paces pulling from `iterable` using this limiter instead of a
    /// fresh one, so callers sharing one `ScopeLimiter` across several calls bound their combined
    /// concurrency rather than each call getting its own independent cap.
    pub async fn pmap_stream<T, U, F, Fut>(
        &self,
        func: F,
        iterable: impl IntoIterator<Item = T> + Send + 'static,
    ) -> PmapStream<U>
    where
        T: Send + 'static,
        U: Send + 'static,
        F: Fn(T) -> Fut + Send + Sync + 'static,
        Fut: StdFuture<Output = Result<U>> + Send + 'static,
    {
        let limiter = self.limiter.clone();
        let mut throttled = limiter.throttle(iterable);
        let mut paced = Vec::new();
        while let Some(item) = throttled.next().await.transpose() {
            match item {
                Ok(value) => paced.push(value),
                Err(_) => break,
            }
        }
        pmap_stream(self.scope, func, paced, None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::run;

    #[test]
    fn pmap_preserves_input_order() {
        let result = run(async {
            pmap(
                |x: u32| async move { Ok(x * 2) },
                vec![5, 1, 4, 2, 3],
                Some(2),
            )
            .await
        });
        assert_eq!(result.unwrap().unwrap(), vec![10, 2, 8, 4, 6]);
    }

    #[test]
    fn pmap_propagates_first_error() {
        #[derive(Debug)]
        struct Boom;
        impl std::fmt::Display for Boom {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str("boom")
            }
        }
        impl std::error::Error for Boom {}

        let result = run(async {
            pmap(
                |x: u32| async move {
                    if x == 2 {
                        Err(Error::user(Boom))
                    } else {
                        Ok(x)
                    }
                },
                vec![1, 2, 3],
                None,
            )
            .await
        });
        assert!(matches!(result.unwrap(), Err(Error::User(_))));
    }

    #[test]
    fn pstarmap_applies_func_to_each_pair() {
        let result = run(async {
            pstarmap(
                |a: u32, b: u32| async move { Ok(a + b) },
                vec![(1, 2), (3, 4)],
                None,
            )
            .await
        });
        assert_eq!(result.unwrap().unwrap(), vec![3, 7]);
    }
}
