//! Structured-concurrency behavior of [`duet::scope`]: ordering, cancellation, and error propagation.

use std::sync::{Arc, Mutex};

use duet::Error;

#[derive(Debug)]
struct Boom;
impl std::fmt::Display for Boom {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("boom")
    }
}
impl std::error::Error for Boom {}

#[test]
fn scope_runs_every_spawned_task_to_completion() {
    let results: Arc<Mutex<std::collections::HashMap<(u32, u32), u32>>> =
        Arc::new(Mutex::new(Default::default()));
    let results_for_scope = results.clone();

    let result = duet::run(async move {
        duet::scope(|scope| async move {
            for a in 0..10u32 {
                for b in 0..10u32 {
                    let results = results_for_scope.clone();
                    scope.spawn(async move {
                        let product = duet::completed_future(a * b).await?;
                        results.lock().unwrap().insert((a, b), product);
                        Ok::<_, Error>(())
                    });
                }
            }
            Ok::<_, Error>(())
        })
        .await
    });

    result.unwrap().unwrap();
    let results = results.lock().unwrap();
    for a in 0..10u32 {
        for b in 0..10u32 {
            assert_eq!(results[&(a, b)], a * b);
        }
    }
}

#[test]
fn scope_propagates_failure_from_a_spawned_task() {
    let after_spawn: Arc<Mutex<bool>> = Arc::new(Mutex::new(false));
    let after_spawn_for_scope = after_spawn.clone();

    let result = duet::run(async move {
        duet::scope(|scope| async move {
            for a in 0..10u32 {
                scope.spawn(async move { Ok::<_, Error>(duet::completed_future(a * a).await?) });
            }
            scope.spawn(async { Err::<(), _>(Error::user(Boom)) });
            // Spawning never blocks, so this runs regardless of what the spawned tasks do.
            *after_spawn_for_scope.lock().unwrap() = true;
            Ok::<_, Error>(())
        })
        .await
    });

    assert!(*after_spawn.lock().unwrap());
    assert!(matches!(result.unwrap(), Err(Error::User(_))));
}

#[test]
fn scope_body_error_before_any_await_still_cancels_children() {
    let result = duet::run(async {
        duet::scope(|scope| async move {
            scope.spawn(async { Ok::<_, Error>(duet::completed_future(6).await?) });
            Err::<(), _>(Error::user(Boom))
        })
        .await
    });
    assert!(matches!(result.unwrap(), Err(Error::User(_))));
}

#[test]
fn scope_body_error_after_an_await_cancels_children() {
    let result = duet::run(async {
        duet::scope(|scope| async move {
            scope.spawn(async { Ok::<_, Error>(duet::completed_future(6).await?) });
            duet::failed_future::<()>(Error::user(Boom)).await?;
            Ok(())
        })
        .await
    });
    assert!(matches!(result.unwrap(), Err(Error::User(_))));
}

#[test]
fn scope_reports_user_error_not_the_internal_interrupt_wrapper() {
    let result = duet::run(async {
        duet::scope(|scope| async move {
            let f: duet::Future<()> = duet::Future::new();
            scope.spawn(async move { f.await });
            Err::<(), _>(Error::user(Boom))
        })
        .await
    });

    match result.unwrap() {
        Err(Error::User(_)) => {}
        other => panic!("expected a plain user error, got {other:?}"),
    }
}
