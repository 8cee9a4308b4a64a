use criterion::{black_box, criterion_group, criterion_main, Criterion};
use serp_aggregator::{RetryPolicy, SearchParams};
use std::time::Duration;

fn benchmark_search_params(c: &mut Criterion) {
    c.bench_function("search_params_build_simple", |b| {
        b.iter(|| black_box(SearchParams::new("rust programming").unwrap()))
    });

    c.bench_function("search_params_build_with_overrides", |b| {
        b.iter(|| {
            black_box(
                SearchParams::builder("site:github.com rust web framework")
                    .country("gb")
                    .language("en-gb")
                    .max_pages(50)
                    .concurrency(100)
                    .build()
                    .unwrap(),
            )
        })
    });

    c.bench_function("search_params_fingerprint", |b| {
        let params = SearchParams::new("rust async runtime benchmarks").unwrap();
        b.iter(|| black_box(params.fingerprint()))
    });
}

fn benchmark_retry_policy(c: &mut Criterion) {
    let policy = RetryPolicy::new(5).with_max_delay(Duration::from_secs(30));

    c.bench_function("retry_backoff_duration", |b| {
        b.iter(|| {
            for attempt in 0..5 {
                black_box(policy.backoff_duration(attempt));
            }
        })
    });
}

fn benchmark_rate_limiter(c: &mut Criterion) {
    use serp_aggregator::AdaptiveRateLimiter;

    let runtime = tokio::runtime::Runtime::new().unwrap();

    c.bench_function("adaptive_rate_limiter_acquire", |b| {
        let limiter = AdaptiveRateLimiter::new(1000.0, 64);
        b.to_async(&runtime).iter(|| async {
            black_box(limiter.acquire().await.unwrap());
        })
    });
}

criterion_group!(
    benches,
    benchmark_search_params,
    benchmark_retry_policy,
    benchmark_rate_limiter
);
criterion_main!(benches);
