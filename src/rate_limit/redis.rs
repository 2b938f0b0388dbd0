use super::lua_scripts::SLIDING_WINDOW_SCRIPT;
use super::types::{RateLimitDecision, RateLimitKey, RateLimitPolicy};
use async_trait::async_trait;
use redis::{aio::ConnectionManager, Script};
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

/// Failure talking to the shared backing store
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("redis call timed out after {0:?}")]
    Timeout(Duration),
}

/// Shared sliding-window storage the service consults before its local windows
#[async_trait]
pub trait WindowBackend: Send + Sync {
    async fn check_at(
        &self,
        key: &RateLimitKey,
        policy: &RateLimitPolicy,
        now_ms: i64,
    ) -> Result<RateLimitDecision, BackendError>;
}

/// Open a multiplexed Redis connection and verify it with a PING
pub async fn connect(redis_url: &str, timeout: Duration) -> Result<ConnectionManager, BackendError> {
    let client = redis::Client::open(redis_url)?;
    let mut connection = tokio::time::timeout(timeout, ConnectionManager::new(client))
        .await
        .map_err(|_| BackendError::Timeout(timeout))??;

    tokio::time::timeout(
        timeout,
        redis::cmd("PING").query_async::<_, String>(&mut connection),
    )
    .await
    .map_err(|_| BackendError::Timeout(timeout))??;

    Ok(connection)
}

/// Redis-backed distributed rate limiter
#[derive(Clone)]
pub struct RedisRateLimiter {
    /// Multiplexed connection; clones share the underlying socket
    connection: ConnectionManager,
    script: Script,
    /// Per-call timeout
    timeout: Duration,
}

impl RedisRateLimiter {
    pub fn new(connection: ConnectionManager, timeout: Duration) -> Self {
        Self {
            connection,
            script: Script::new(SLIDING_WINDOW_SCRIPT),
            timeout,
        }
    }

    /// Record this request and count the window in one atomic script call
    pub async fn check_at(
        &self,
        key: &RateLimitKey,
        policy: &RateLimitPolicy,
        now_ms: i64,
    ) -> Result<RateLimitDecision, BackendError> {
        let redis_key = key.storage_key();
        // Two requests in the same millisecond must not collapse into one member.
        let member = format!("{}-{}", now_ms, uuid::Uuid::new_v4().simple());
        let mut connection = self.connection.clone();

        let mut invocation = self.script.key(&redis_key);
        invocation
            .arg(now_ms)
            .arg(policy.window_millis())
            .arg(member);

        let result = tokio::time::timeout(
            self.timeout,
            invocation.invoke_async::<_, Vec<i64>>(&mut connection),
        )
        .await
        .map_err(|_| BackendError::Timeout(self.timeout))??;

        let count = result.first().copied().unwrap_or(0).max(0) as u64;
        let decision = RateLimitDecision::from_count(count, policy, now_ms);

        debug!(
            key = %redis_key,
            count,
            admitted = decision.admitted,
            "Redis sliding window check"
        );

        Ok(decision)
    }

    /// Test Redis connection
    pub async fn ping(&self) -> Result<(), BackendError> {
        let mut connection = self.connection.clone();
        tokio::time::timeout(
            self.timeout,
            redis::cmd("PING").query_async::<_, String>(&mut connection),
        )
        .await
        .map_err(|_| BackendError::Timeout(self.timeout))??;
        Ok(())
    }
}

#[async_trait]
impl WindowBackend for RedisRateLimiter {
    async fn check_at(
        &self,
        key: &RateLimitKey,
        policy: &RateLimitPolicy,
        now_ms: i64,
    ) -> Result<RateLimitDecision, BackendError> {
        RedisRateLimiter::check_at(self, key, policy, now_ms).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rate_limit::types::{now_millis, RateLimitAction};

    // Note: These tests require a running Redis instance
    // They are ignored by default. Run with: cargo test -- --ignored

    async fn create_test_limiter() -> RedisRateLimiter {
        let connection = connect("redis://127.0.0.1:6379", Duration::from_secs(2))
            .await
            .expect("Failed to connect to Redis");
        RedisRateLimiter::new(connection, Duration::from_millis(500))
    }

    #[tokio::test]
    #[ignore]
    async fn test_redis_sliding_window() {
        let limiter = create_test_limiter().await;
        let policy = RateLimitPolicy::new(20, 10);
        let key = RateLimitKey::new(
            RateLimitAction::Redirect,
            format!("test-sw-{}", rand::random::<u32>()),
        );

        let now = now_millis();
        for i in 0..20 {
            let result = limiter.check_at(&key, &policy, now + i).await.unwrap();
            assert!(result.admitted, "Request {} should be admitted", i);
        }

        let result = limiter.check_at(&key, &policy, now + 20).await.unwrap();
        assert!(!result.admitted);
        assert_eq!(result.remaining, 0);
    }

    #[tokio::test]
    #[ignore]
    async fn test_redis_same_millisecond_requests_are_distinct() {
        let limiter = create_test_limiter().await;
        let policy = RateLimitPolicy::new(2, 60);
        let key = RateLimitKey::new(
            RateLimitAction::CreateUrl,
            format!("test-ms-{}", rand::random::<u32>()),
        );

        let now = now_millis();
        assert!(limiter.check_at(&key, &policy, now).await.unwrap().admitted);
        assert!(limiter.check_at(&key, &policy, now).await.unwrap().admitted);
        assert!(!limiter.check_at(&key, &policy, now).await.unwrap().admitted);
    }

    #[tokio::test]
    #[ignore]
    async fn test_redis_connection() {
        let limiter = create_test_limiter().await;
        assert!(limiter.ping().await.is_ok());
    }
}
