//! Read-through cache for URL records
//!
//! Three key spaces: `url:<id>`, `user_urls:<owner>` and `short_url:<code>`.
//! Cache trouble never fails a request: errors are logged, counted and treated
//! as a miss.

pub mod backend;

use crate::error::Result;
use crate::metrics;
use redis::aio::ConnectionManager;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

pub use backend::{CacheBackend, MemoryCacheBackend, NoopCacheBackend, RedisCacheBackend};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheBackendKind {
    Redis,
    Memory,
    Disabled,
}

/// Cache configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "default_backend")]
    pub backend: CacheBackendKind,
    /// TTL for `url:` and `short_url:` entries in seconds
    #[serde(default = "default_record_ttl_secs")]
    pub record_ttl_secs: u64,
    /// TTL for `user_urls:` entries in seconds
    #[serde(default = "default_list_ttl_secs")]
    pub list_ttl_secs: u64,
    /// Maximum number of entries for the in-process backend
    #[serde(default = "default_max_capacity")]
    pub max_capacity: u64,
}

fn default_backend() -> CacheBackendKind {
    CacheBackendKind::Redis
}

fn default_record_ttl_secs() -> u64 {
    3600
}

fn default_list_ttl_secs() -> u64 {
    300
}

fn default_max_capacity() -> u64 {
    10_000
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            record_ttl_secs: default_record_ttl_secs(),
            list_ttl_secs: default_list_ttl_secs(),
            max_capacity: default_max_capacity(),
        }
    }
}

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache backend error: {0}")]
    Backend(String),

    #[error("cache call timed out after {0:?}")]
    Timeout(Duration),

    #[error("cache payload could not be encoded or decoded: {0}")]
    Codec(#[from] serde_json::Error),
}

/// Cache key for one of the three key spaces
#[derive(Clone, Debug, Hash, Eq, PartialEq)]
pub enum CacheKey {
    Url(i64),
    UserUrls(String),
    ShortUrl(String),
}

impl CacheKey {
    pub fn url(id: i64) -> Self {
        CacheKey::Url(id)
    }

    pub fn user_urls(owner: impl Into<String>) -> Self {
        CacheKey::UserUrls(owner.into())
    }

    pub fn short_url(code: impl Into<String>) -> Self {
        CacheKey::ShortUrl(code.into())
    }

    /// Key space label used in logs and metrics
    pub fn keyspace(&self) -> &'static str {
        match self {
            CacheKey::Url(_) => "url",
            CacheKey::UserUrls(_) => "user_urls",
            CacheKey::ShortUrl(_) => "short_url",
        }
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CacheKey::Url(id) => write!(f, "url:{}", id),
            CacheKey::UserUrls(owner) => write!(f, "user_urls:{}", owner),
            CacheKey::ShortUrl(code) => write!(f, "short_url:{}", code),
        }
    }
}

pub fn encode<T: Serialize>(value: &T) -> std::result::Result<String, CacheError> {
    Ok(serde_json::to_string(value)?)
}

pub fn decode<T: DeserializeOwned>(payload: &str) -> std::result::Result<T, CacheError> {
    Ok(serde_json::from_str(payload)?)
}

/// Cache service wrapping a backend with TTL policy and fail-open error handling
#[derive(Clone)]
pub struct UrlCache {
    backend: Arc<dyn CacheBackend>,
    record_ttl: Duration,
    list_ttl: Duration,
}

impl UrlCache {
    pub fn new(backend: Arc<dyn CacheBackend>, config: &CacheConfig) -> Self {
        info!(
            backend = backend.name(),
            record_ttl_secs = config.record_ttl_secs,
            list_ttl_secs = config.list_ttl_secs,
            "Initialized URL cache"
        );

        Self {
            backend,
            record_ttl: Duration::from_secs(config.record_ttl_secs),
            list_ttl: Duration::from_secs(config.list_ttl_secs),
        }
    }

    /// Pick the backend from config. A Redis cache without a connection degrades to no-op.
    pub fn from_config(
        config: &CacheConfig,
        redis: Option<ConnectionManager>,
        timeout: Duration,
    ) -> Self {
        let backend: Arc<dyn CacheBackend> = match (config.backend, redis) {
            (CacheBackendKind::Redis, Some(connection)) => {
                Arc::new(RedisCacheBackend::new(connection, timeout))
            }
            (CacheBackendKind::Redis, None) => {
                warn!("Redis unavailable, caching disabled");
                Arc::new(NoopCacheBackend)
            }
            (CacheBackendKind::Memory, _) => Arc::new(MemoryCacheBackend::new(config.max_capacity)),
            (CacheBackendKind::Disabled, _) => Arc::new(NoopCacheBackend),
        };
        Self::new(backend, config)
    }

    /// In-process cache with default TTLs
    pub fn in_memory() -> Self {
        let config = CacheConfig {
            backend: CacheBackendKind::Memory,
            ..CacheConfig::default()
        };
        Self::new(Arc::new(MemoryCacheBackend::new(config.max_capacity)), &config)
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    pub fn ttl_for(&self, key: &CacheKey) -> Duration {
        match key {
            CacheKey::UserUrls(_) => self.list_ttl,
            CacheKey::Url(_) | CacheKey::ShortUrl(_) => self.record_ttl,
        }
    }

    /// Cached value for `key`. Backend errors are misses; undecodable payloads are
    /// misses and get deleted.
    pub async fn get<T: DeserializeOwned>(&self, key: &CacheKey) -> Option<T> {
        let rendered = key.to_string();

        let payload = match self.backend.get(&rendered).await {
            Ok(payload) => payload,
            Err(err) => {
                warn!(key = %rendered, error = %err, "Cache get failed");
                metrics::record_cache_error("get");
                return None;
            }
        };

        let Some(payload) = payload else {
            metrics::record_cache_lookup(key.keyspace(), false);
            return None;
        };

        match decode::<T>(&payload) {
            Ok(value) => {
                debug!(key = %rendered, "Cache hit");
                metrics::record_cache_lookup(key.keyspace(), true);
                Some(value)
            }
            Err(err) => {
                warn!(key = %rendered, error = %err, "Dropping undecodable cache entry");
                metrics::record_cache_error("decode");
                self.delete(key).await;
                None
            }
        }
    }

    /// Store `value` under `key` with the key space's TTL. Failures are logged and ignored.
    pub async fn set<T: Serialize>(&self, key: &CacheKey, value: &T) {
        let rendered = key.to_string();
        let payload = match encode(value) {
            Ok(payload) => payload,
            Err(err) => {
                warn!(key = %rendered, error = %err, "Cache encode failed");
                metrics::record_cache_error("encode");
                return;
            }
        };

        if let Err(err) = self.backend.set(&rendered, payload, self.ttl_for(key)).await {
            warn!(key = %rendered, error = %err, "Cache set failed");
            metrics::record_cache_error("set");
        }
    }

    pub async fn delete(&self, key: &CacheKey) {
        let rendered = key.to_string();
        if let Err(err) = self.backend.delete(&rendered).await {
            warn!(key = %rendered, error = %err, "Cache delete failed");
            metrics::record_cache_error("delete");
        } else {
            debug!(key = %rendered, "Invalidated cache entry");
        }
    }

    /// Delete every key concurrently
    pub async fn invalidate(&self, keys: &[CacheKey]) {
        futures::future::join_all(keys.iter().map(|key| self.delete(key))).await;
    }

    /// Cache hit short-circuits; on a miss `fetch` runs against the durable store
    /// and a found value is cached. Fetch errors propagate and nothing is cached.
    pub async fn read_through<T, F, Fut>(&self, key: &CacheKey, fetch: F) -> Result<Option<T>>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Option<T>>>,
    {
        if let Some(hit) = self.get::<T>(key).await {
            return Ok(Some(hit));
        }

        let fetched = fetch().await?;
        if let Some(value) = &fetched {
            self.set(key, value).await;
        }
        Ok(fetched)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AppError;
    use crate::store::UrlRecord;
    use async_trait::async_trait;
    use chrono::Utc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn record() -> UrlRecord {
        UrlRecord {
            id: 7,
            user_id: "user-a".to_string(),
            title: "Example".to_string(),
            original_url: "https://example.com".to_string(),
            short_url: "abc123".to_string(),
            custom_url: Some("launch".to_string()),
            qr_code: Some("https://cdn.example.com/qr-abc123".to_string()),
            created_at: Utc::now(),
        }
    }

    /// Backend that fails every call
    struct BrokenBackend;

    #[async_trait]
    impl CacheBackend for BrokenBackend {
        async fn get(&self, _key: &str) -> std::result::Result<Option<String>, CacheError> {
            Err(CacheError::Backend("connection refused".to_string()))
        }
        async fn set(&self, _key: &str, _value: String, _ttl: Duration) -> std::result::Result<(), CacheError> {
            Err(CacheError::Backend("connection refused".to_string()))
        }
        async fn delete(&self, _key: &str) -> std::result::Result<(), CacheError> {
            Err(CacheError::Timeout(Duration::from_millis(200)))
        }
        fn name(&self) -> &'static str {
            "broken"
        }
    }

    #[test]
    fn test_key_rendering() {
        assert_eq!(CacheKey::url(42).to_string(), "url:42");
        assert_eq!(CacheKey::user_urls("user-a").to_string(), "user_urls:user-a");
        assert_eq!(CacheKey::short_url("abc123").to_string(), "short_url:abc123");
    }

    #[test]
    fn test_default_cache_config() {
        let config = CacheConfig::default();
        assert_eq!(config.backend, CacheBackendKind::Redis);
        assert_eq!(config.record_ttl_secs, 3600);
        assert_eq!(config.list_ttl_secs, 300);
    }

    #[test]
    fn test_ttl_policy() {
        let cache = UrlCache::in_memory();
        assert_eq!(cache.ttl_for(&CacheKey::url(1)), Duration::from_secs(3600));
        assert_eq!(cache.ttl_for(&CacheKey::short_url("abc")), Duration::from_secs(3600));
        assert_eq!(cache.ttl_for(&CacheKey::user_urls("a")), Duration::from_secs(300));
    }

    #[tokio::test]
    async fn test_set_get_preserves_fields() {
        let cache = UrlCache::in_memory();
        let key = CacheKey::url(7);
        let original = record();
        cache.set(&key, &original).await;

        let first: UrlRecord = cache.get(&key).await.unwrap();
        let second: UrlRecord = cache.get(&key).await.unwrap();
        assert_eq!(first, original);
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_undecodable_entry_is_dropped() {
        let backend = Arc::new(MemoryCacheBackend::new(10));
        let cache = UrlCache::new(backend.clone(), &CacheConfig::default());
        backend
            .set("url:7", "not json".to_string(), Duration::from_secs(60))
            .await
            .unwrap();

        assert!(cache.get::<UrlRecord>(&CacheKey::url(7)).await.is_none());
        assert!(backend.get("url:7").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_broken_backend_fails_open() {
        let cache = UrlCache::new(Arc::new(BrokenBackend), &CacheConfig::default());
        let key = CacheKey::short_url("abc123");

        cache.set(&key, &record()).await;
        assert!(cache.get::<UrlRecord>(&key).await.is_none());
        cache.invalidate(&[key.clone(), CacheKey::url(7)]).await;

        let fetched = cache
            .read_through(&key, || async { Ok(Some(record())) })
            .await
            .unwrap();
        assert_eq!(fetched.unwrap().original_url, "https://example.com");
    }

    #[tokio::test]
    async fn test_read_through_populates_once() {
        let cache = UrlCache::in_memory();
        let key = CacheKey::short_url("abc123");
        let fetches = AtomicUsize::new(0);

        for _ in 0..3 {
            let found = cache
                .read_through(&key, || async {
                    fetches.fetch_add(1, Ordering::SeqCst);
                    Ok(Some(record()))
                })
                .await
                .unwrap();
            assert!(found.is_some());
        }
        assert_eq!(fetches.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_read_through_does_not_cache_failures_or_absence() {
        let cache = UrlCache::in_memory();
        let key = CacheKey::short_url("zzzzzz");

        let missing: Option<UrlRecord> = cache.read_through(&key, || async { Ok(None) }).await.unwrap();
        assert!(missing.is_none());

        let failed: Result<Option<UrlRecord>> = cache
            .read_through(&key, || async { Err(AppError::Store("down".to_string())) })
            .await;
        assert!(failed.is_err());

        assert!(cache.get::<UrlRecord>(&key).await.is_none());
    }
}
