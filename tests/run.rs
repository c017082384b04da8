//! Top-level `run` behavior: nested async calls, error propagation, and reentrancy.

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
fn run_calls_nested_async_functions() {
    async fn mul(a: i32, b: i32) -> i32 {
        duet::completed_future(a * b).await.unwrap()
    }

    let result = duet::run(async { mul(6, 7).await });
    assert_eq!(result.unwrap(), 42);
}

#[test]
fn run_resolves_failed_future_as_error() {
    let result = duet::run(async { duet::failed_future::<()>(Error::user(Boom)).await });
    assert!(matches!(result.unwrap(), Err(Error::User(_))));
}

#[test]
fn run_propagates_panic_free_user_errors_through_await() {
    async fn always_fails() -> duet::Result<()> {
        duet::failed_future::<()>(Error::user(Boom)).await
    }

    let result = duet::run(async { always_fails().await });
    assert!(matches!(result.unwrap(), Err(Error::User(_))));
}

#[test]
fn nested_run_calls_are_independent() {
    let result = duet::run(async {
        let a = duet::run(async { duet::completed_future(1).await.unwrap() }).unwrap();
        let b = duet::run(async { duet::completed_future(2).await.unwrap() }).unwrap();
        a + b
    });
    assert_eq!(result.unwrap(), 3);
}

#[test]
fn run_reentrant_from_deeply_nested_call() {
    fn nested(depth: u32) -> i32 {
        if depth == 0 {
            return 0;
        }
        duet::run(async move { nested(depth - 1) + 1 }).unwrap()
    }
    assert_eq!(nested(25), 25);
}
