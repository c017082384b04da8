use criterion::{criterion_group, criterion_main, Criterion};

fn spawn_many_children(c: &mut Criterion) {
    c.bench_function("spawn 1000 children in a scope", |b| {
        b.iter(|| {
            duet::run(async {
                duet::scope(|scope| async move {
                    let handles: Vec<_> = (0..1000)
                        .map(|i| scope.spawn(async move { Ok(i) }))
                        .collect();
                    for handle in handles {
                        handle.await?;
                    }
                    Ok(())
                })
                .await
            })
            .unwrap()
        });
    });
}

fn reentrant_run(c: &mut Criterion) {
    c.bench_function("reentrant run nested 100 deep", |b| {
        b.iter(|| {
            fn nested(depth: u32) -> i32 {
                if depth == 0 {
                    return 0;
                }
                duet::run(async move { nested(depth - 1) }).unwrap()
            }
            nested(100)
        });
    });
}

criterion_group!(benches, spawn_many_children, reentrant_run);
criterion_main!(benches);
