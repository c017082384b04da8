//! Ordering and error-propagation behavior of `pmap`/`pstarmap` and their streaming variants.

use duet::Error;

#[derive(Debug)]
struct Boom;
impl std::fmt::Display for Boom {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("boom")
    }
}
impl std::error::Error for Boom {}

async fn mul(a: u32, b: u32) -> duet::Result<u32> {
    duet::completed_future(a * b).await
}

#[test]
fn pmap_returns_results_in_input_order_regardless_of_completion_order() {
    let result = duet::run(async {
        duet::pmap(|x: u32| async move { mul(x, x).await }, 0..20, Some(4)).await
    });
    let values = result.unwrap().unwrap();
    assert_eq!(values, (0..20).map(|x| x * x).collect::<Vec<_>>());
}

#[test]
fn pmap_with_unlimited_concurrency_preserves_order() {
    let result =
        duet::run(async { duet::pmap(|x: u32| async move { mul(x, 2).await }, 0..50, None).await });
    assert_eq!(
        result.unwrap().unwrap(),
        (0..50).map(|x| x * 2).collect::<Vec<_>>()
    );
}

#[test]
fn pmap_propagates_the_first_failure() {
    let result = duet::run(async {
        duet::pmap(
            |x: u32| async move {
                if x == 3 {
                    Err(Error::user(Boom))
                } else {
                    mul(x, x).await
                }
            },
            0..10,
            Some(3),
        )
        .await
    });
    assert!(matches!(result.unwrap(), Err(Error::User(_))));
}

#[test]
fn pstarmap_unpacks_argument_tuples_in_order() {
    let result = duet::run(async {
        duet::pstarmap(
            |a: u32, b: u32| async move { mul(a, b).await },
            (0..10).map(|i| (i, i + 1)),
            Some(2),
        )
        .await
    });
    assert_eq!(
        result.unwrap().unwrap(),
        (0..10).map(|i| i * (i + 1)).collect::<Vec<_>>()
    );
}

#[test]
fn pmap_stream_yields_items_lazily_in_order() {
    let result = duet::run(async {
        duet::scope(|scope| async move {
            let mut stream =
                duet::pmap_stream(&scope, |x: u32| async move { mul(x, 3).await }, 0..6, Some(2));
            let mut seen = Vec::new();
            while let Some(item) = stream.next().await {
                seen.push(item?);
            }
            Ok::<_, Error>(seen)
        })
        .await
    });
    assert_eq!(
        result.unwrap().unwrap(),
        (0..6).map(|x| x * 3).collect::<Vec<_>>()
    );
}

#[test]
fn pstarmap_stream_propagates_failures_to_the_stream_consumer() {
    let result = duet::run(async {
        duet::scope(|scope| async move {
            let mut stream = duet::pstarmap_stream(
                &scope,
                |a: u32, b: u32| async move {
                    if a == 2 {
                        Err(Error::user(Boom))
                    } else {
                        mul(a, b).await
                    }
                },
                vec![(0, 1), (1, 2), (2, 3), (3, 4)],
                None,
            );
            let mut saw_error = false;
            while let Some(item) = stream.next().await {
                if item.is_err() {
                    saw_error = true;
                    break;
                }
            }
            Ok::<_, Error>(saw_error)
        })
        .await
    });
    assert!(result.unwrap().unwrap());
}
