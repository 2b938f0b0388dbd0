use chrono::Utc;
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use shortener::cache::{decode, encode, CacheKey, UrlCache};
use shortener::config::AppConfig;
use shortener::rate_limit::{LocalRateLimiter, RateLimitAction, RateLimitKey, RateLimitPolicy};
use shortener::store::UrlRecord;

fn record(id: i64) -> UrlRecord {
    UrlRecord {
        id,
        user_id: "user-a".to_string(),
        title: "Example".to_string(),
        original_url: "https://example.com/some/long/path?with=query".to_string(),
        short_url: "abc123".to_string(),
        custom_url: Some("launch".to_string()),
        qr_code: Some("https://cdn.example.com/qrs/qr-abc123".to_string()),
        created_at: Utc::now(),
    }
}

fn benchmark_local_limiter_single_key(c: &mut Criterion) {
    let limiter = LocalRateLimiter::new();
    let key = RateLimitKey::new(RateLimitAction::Redirect, "203.0.113.7");
    let policy = RateLimitPolicy::new(100, 60);

    c.bench_function("local_limiter_single_key", |b| {
        b.iter(|| black_box(limiter.check_rate_limit(&key, &policy)))
    });
}

fn benchmark_local_limiter_many_keys(c: &mut Criterion) {
    let mut group = c.benchmark_group("local_limiter_keys");
    let policy = RateLimitPolicy::new(20, 10);

    for num_keys in [10, 1_000, 10_000].iter() {
        let limiter = LocalRateLimiter::new();
        let keys: Vec<RateLimitKey> = (0..*num_keys)
            .map(|i| RateLimitKey::new(RateLimitAction::Redirect, format!("10.0.{}.{}", i / 256, i % 256)))
            .collect();

        group.bench_with_input(BenchmarkId::from_parameter(num_keys), num_keys, |b, _| {
            let mut i = 0;
            b.iter(|| {
                i = (i + 1) % keys.len();
                black_box(limiter.check_rate_limit(&keys[i], &policy))
            })
        });
    }
    group.finish();
}

fn benchmark_record_codec(c: &mut Criterion) {
    let single = record(1);
    let list: Vec<UrlRecord> = (0..50).map(record).collect();
    let single_payload = encode(&single).unwrap();
    let list_payload = encode(&list).unwrap();

    c.bench_function("encode_record", |b| b.iter(|| black_box(encode(&single))));
    c.bench_function("decode_record", |b| {
        b.iter(|| black_box(decode::<UrlRecord>(&single_payload)))
    });
    c.bench_function("decode_owner_list", |b| {
        b.iter(|| black_box(decode::<Vec<UrlRecord>>(&list_payload)))
    });
}

fn benchmark_memory_cache_read(c: &mut Criterion) {
    let runtime = tokio::runtime::Runtime::new().unwrap();
    let cache = UrlCache::in_memory();
    let key = CacheKey::short_url("abc123");
    runtime.block_on(cache.set(&key, &record(1)));

    c.bench_function("memory_cache_hit", |b| {
        b.to_async(&runtime)
            .iter(|| async { black_box(cache.get::<UrlRecord>(&key).await) })
    });
}

fn benchmark_config_parsing(c: &mut Criterion) {
    let yaml = r#"
server:
  host: "0.0.0.0"
  port: 8080
rate_limits:
  read:
    requests: 20
    window_secs: 10
auth:
  secret: "bench-secret"
"#;

    c.bench_function("config_parsing", |b| {
        b.iter(|| black_box(AppConfig::from_yaml(yaml)))
    });
}

criterion_group!(
    benches,
    benchmark_local_limiter_single_key,
    benchmark_local_limiter_many_keys,
    benchmark_record_codec,
    benchmark_memory_cache_read,
    benchmark_config_parsing
);
criterion_main!(benches);
