use shortener::rate_limit::{
    redis::connect, LocalRateLimiter, RateLimitAction, RateLimitKey, RateLimitPolicies,
    RateLimitPolicy, RateLimiterService, RedisRateLimiter,
};
use std::sync::Arc;
use std::time::Duration;

fn tight_policies() -> RateLimitPolicies {
    RateLimitPolicies {
        read: RateLimitPolicy::new(5, 1),
        create: RateLimitPolicy::new(3, 60),
        ..RateLimitPolicies::default()
    }
}

#[tokio::test]
async fn test_window_slides_in_real_time() {
    let service = RateLimiterService::local_only(tight_policies(), false);
    let caller = "198.51.100.20";

    for _ in 0..5 {
        assert!(service.admit(RateLimitAction::Redirect, caller).await.admitted);
    }
    let denied = service.admit(RateLimitAction::Redirect, caller).await;
    assert!(!denied.admitted);
    assert_eq!(denied.remaining, 0);

    // Wait past the 1 second window
    tokio::time::sleep(Duration::from_millis(1100)).await;

    let decision = service.admit(RateLimitAction::Redirect, caller).await;
    assert!(decision.admitted);
    assert_eq!(decision.remaining, 4);
}

#[tokio::test]
async fn test_excess_requests_are_denied() {
    let service = RateLimiterService::local_only(tight_policies(), false);

    let mut admitted = 0;
    let mut denied = 0;
    for _ in 0..10 {
        if service.admit(RateLimitAction::CreateUrl, "client:abcdefgh12345678").await.admitted {
            admitted += 1;
        } else {
            denied += 1;
        }
    }

    assert_eq!(admitted, 3);
    assert!(denied >= 10 - 3);
}

#[tokio::test]
async fn test_concurrent_callers_share_one_window() {
    let service = Arc::new(RateLimiterService::local_only(tight_policies(), false));

    let handles: Vec<_> = (0..20)
        .map(|_| {
            let service = service.clone();
            tokio::spawn(async move {
                service.admit(RateLimitAction::CreateUrl, "10.9.8.7").await.admitted
            })
        })
        .collect();

    let mut admitted = 0;
    for handle in handles {
        if handle.await.unwrap() {
            admitted += 1;
        }
    }
    assert_eq!(admitted, 3);
}

#[tokio::test]
async fn test_sweep_drops_idle_windows() {
    let limiter = Arc::new(LocalRateLimiter::new());
    let policy = RateLimitPolicy::new(10, 1);

    for i in 0..5 {
        let key = RateLimitKey::new(RateLimitAction::Redirect, format!("10.0.0.{}", i));
        limiter.check_rate_limit(&key, &policy);
    }
    assert_eq!(limiter.active_windows(), 5);

    let sweeper = limiter.spawn_sweeper(Duration::from_millis(50), Duration::from_millis(10));
    tokio::time::sleep(Duration::from_millis(200)).await;
    sweeper.abort();

    assert_eq!(limiter.active_windows(), 0);
}

#[tokio::test]
#[ignore] // Requires Redis
async fn test_redis_timeout_falls_back_to_local() {
    let connection = connect("redis://127.0.0.1:6379", Duration::from_secs(2))
        .await
        .expect("Failed to connect to Redis");

    // No command can finish in a nanosecond, so every check times out
    let redis = RedisRateLimiter::new(connection, Duration::from_nanos(1));
    let service = RateLimiterService::with_redis(tight_policies(), redis);
    assert!(!service.is_degraded());

    for _ in 0..3 {
        assert!(service.admit(RateLimitAction::CreateUrl, "10.1.1.1").await.admitted);
    }
    assert!(service.is_degraded());
    assert!(!service.admit(RateLimitAction::CreateUrl, "10.1.1.1").await.admitted);
    assert_eq!(service.local().active_windows(), 1);
}

#[tokio::test]
#[ignore] // Requires Redis
async fn test_redis_counts_are_shared_between_instances() {
    let first = connect("redis://127.0.0.1:6379", Duration::from_secs(2))
        .await
        .expect("Failed to connect to Redis");
    let second = connect("redis://127.0.0.1:6379", Duration::from_secs(2))
        .await
        .expect("Failed to connect to Redis");

    let a = RateLimiterService::with_redis(
        tight_policies(),
        RedisRateLimiter::new(first, Duration::from_millis(500)),
    );
    let b = RateLimiterService::with_redis(
        tight_policies(),
        RedisRateLimiter::new(second, Duration::from_millis(500)),
    );

    let caller = format!("shared-{}", rand::random::<u32>());
    assert!(a.admit(RateLimitAction::CreateUrl, &caller).await.admitted);
    assert!(b.admit(RateLimitAction::CreateUrl, &caller).await.admitted);
    assert!(a.admit(RateLimitAction::CreateUrl, &caller).await.admitted);
    assert!(!b.admit(RateLimitAction::CreateUrl, &caller).await.admitted);
}
