//! FIFO ordering and pacing behavior of [`duet::Limiter`].

use std::sync::{Arc, Mutex};

use duet::Error;

#[test]
fn waiters_acquire_a_capacity_one_limiter_in_fifo_order() {
    let acquired: Arc<Mutex<Vec<u32>>> = Arc::new(Mutex::new(Vec::new()));
    let acquired_for_scope = acquired.clone();

    let result = duet::run(async move {
        let limiter = duet::Limiter::new(Some(1));
        duet::scope(|scope| async move {
            for i in 0..10u32 {
                let limiter = limiter.clone();
                let acquired = acquired_for_scope.clone();
                scope.spawn(async move {
                    let slot = limiter.acquire().await?;
                    acquired.lock().unwrap().push(i);
                    duet::completed_future(()).await?;
                    slot.release()?;
                    Ok::<_, Error>(())
                });
            }
            Ok::<_, Error>(())
        })
        .await
    });

    result.unwrap().unwrap();
    let acquired = Arc::try_unwrap(acquired).unwrap().into_inner().unwrap();
    let mut sorted = acquired.clone();
    sorted.sort_unstable();
    assert_eq!(acquired, sorted);
}

#[test]
fn throttle_paces_an_iterator_across_a_limited_capacity() {
    let result = duet::run(async {
        let limiter = duet::Limiter::new(Some(2));
        let mut throttled = limiter.throttle(0..5);
        let mut seen = Vec::new();
        while let Some(item) = throttled.next().await? {
            seen.push(item);
        }
        Ok::<_, Error>(seen)
    });
    assert_eq!(result.unwrap().unwrap(), vec![0, 1, 2, 3, 4]);
}
