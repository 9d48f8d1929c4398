//! Upload throughput per body strategy
//!
//! Measures a complete authenticated upload (connect, head, body, response)
//! and an unauthenticated one that ends with an early 401.
//!
//! Run with: cargo bench --bench upload_strategies

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use std::hint::black_box;
use std::time::Duration;
use upload_abort::http::UploadRequest;
use upload_abort::{BodyStrategy, Harness, HarnessConfig};

fn bench_authenticated_upload(c: &mut Criterion) {
    let mut group = c.benchmark_group("authenticated_upload");
    group.measurement_time(Duration::from_secs(10));

    for size in [512 * 1024u64, 8 * 1024 * 1024] {
        let harness = Harness::new(HarnessConfig::new().port(0).fixture_size(size)).unwrap();
        let request = UploadRequest::put("/").credentials(&harness.config().user_credentials());
        group.throughput(Throughput::Bytes(harness.fixture().len()));

        for strategy in BodyStrategy::ALL {
            group.bench_with_input(
                BenchmarkId::new(strategy.as_str(), size),
                &strategy,
                |b, &strategy| {
                    b.iter(|| {
                        let outcome = harness.upload(&request, strategy).unwrap();
                        black_box(outcome.status);
                    });
                },
            );
        }
    }

    group.finish();
}

fn bench_early_401(c: &mut Criterion) {
    let mut group = c.benchmark_group("early_401");
    let harness = Harness::new(HarnessConfig::new().port(0)).unwrap();
    let request = UploadRequest::put("/");

    for strategy in BodyStrategy::ALL {
        group.bench_function(strategy.as_str(), |b| {
            b.iter(|| {
                let outcome = harness.upload(&request, strategy).unwrap();
                black_box(outcome.bytes_sent);
            });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_authenticated_upload, bench_early_401);
criterion_main!(benches);
