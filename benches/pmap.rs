use criterion::{criterion_group, criterion_main, Criterion};

fn pmap_unlimited(c: &mut Criterion) {
    c.bench_function("pmap 500 items, unlimited concurrency", |b| {
        b.iter(|| {
            duet::run(async {
                duet::pmap(|x: u32| async move { Ok(x + 1) }, 0..500, None).await
            })
            .unwrap()
        });
    });
}

fn pmap_limited(c: &mut Criterion) {
    c.bench_function("pmap 500 items, limit 8", |b| {
        b.iter(|| {
            duet::run(async {
                duet::pmap(|x: u32| async move { Ok(x + 1) }, 0..500, Some(8)).await
            })
            .unwrap()
        });
    });
}

criterion_group!(benches, pmap_unlimited, pmap_limited);
criterion_main!(benches);
