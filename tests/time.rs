//! `timeout_scope`/`deadline_scope`/`timeout` cancellation behavior.

use std::time::Duration;

use duet::Error;

#[test]
fn timeout_scope_interrupts_a_body_that_runs_too_long() {
    let result = duet::run(async {
        duet::timeout_scope(Duration::from_millis(20), |_scope| async move {
            duet::sleep(Duration::from_secs(5)).await?;
            Ok::<_, Error>(())
        })
        .await
    });
    assert!(matches!(result.unwrap(), Err(Error::Timeout)));
}

#[test]
fn timeout_scope_leaves_a_fast_body_unaffected() {
    let result = duet::run(async {
        duet::timeout_scope(Duration::from_millis(200), |_scope| async move {
            Ok::<_, Error>(duet::completed_future(42).await?)
        })
        .await
    });
    assert_eq!(result.unwrap().unwrap(), 42);
}

#[test]
fn timeout_wraps_a_single_future_without_a_full_scope_body() {
    let result = duet::run(async {
        duet::timeout(Duration::from_millis(10), async {
            duet::sleep(Duration::from_secs(5)).await?;
            Ok::<_, Error>(())
        })
        .await
    });
    assert!(matches!(result.unwrap(), Err(Error::Timeout)));
}

#[test]
fn deadline_scope_cancels_children_still_running_past_the_deadline() {
    let result = duet::run(async {
        duet::deadline_scope(duet::Instant::now() + Duration::from_millis(15), |scope| async move {
            scope.spawn(async {
                duet::sleep(Duration::from_secs(5)).await?;
                Ok(())
            });
            duet::sleep(Duration::from_secs(5)).await?;
            Ok::<_, Error>(())
        })
        .await
    });
    assert!(matches!(result.unwrap(), Err(Error::Timeout)));
}
