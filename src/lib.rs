pub mod api;
pub mod auth;
pub mod blob;
pub mod cache;
pub mod config;
pub mod enrich;
pub mod error;
pub mod identity;
pub mod metrics;
pub mod observability;
pub mod rate_limit;
pub mod service;
pub mod store;

use crate::auth::{IdentityProvider, JwtIdentityProvider};
use crate::blob::{BlobBackendKind, BlobStore, HttpBlobStore, MemoryBlobStore};
use crate::cache::{CacheBackendKind, MemoryCacheBackend, UrlCache};
use crate::config::{AppConfig, DatabaseBackend};
use crate::enrich::{DisabledGeo, GeoLookup, HttpGeoLocator};
use crate::error::{AppError, Result};
use crate::metrics::MetricsService;
use crate::rate_limit::{RateLimiterService, RedisRateLimiter};
use crate::service::{AnalyticsService, LinkService, RedirectService};
use crate::store::{ClickStore, MemoryStore, PgStore, UrlStore};
use secrecy::ExposeSecret;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{info, warn};

/// Shared state handed to every handler
pub struct AppState {
    pub config: AppConfig,
    pub limiter: Arc<RateLimiterService>,
    pub cache: UrlCache,
    pub redirects: RedirectService,
    pub links: LinkService,
    pub analytics: AnalyticsService,
    pub identity: Arc<dyn IdentityProvider>,
    pub metrics: MetricsService,
}

/// The collaborators a state is assembled from
pub struct Dependencies {
    pub limiter: RateLimiterService,
    pub cache: UrlCache,
    pub urls: Arc<dyn UrlStore>,
    pub clicks: Arc<dyn ClickStore>,
    pub blobs: Arc<dyn BlobStore>,
    pub geo: Arc<dyn GeoLookup>,
    pub identity: Arc<dyn IdentityProvider>,
    pub metrics: MetricsService,
}

impl Dependencies {
    /// Everything in-process: local limiter, moka cache, memory store and blobs,
    /// no geo lookups. The metrics handle is detached from the global recorder.
    pub fn in_memory(config: &AppConfig) -> Result<Self> {
        let store = Arc::new(MemoryStore::new());
        let cache = UrlCache::new(
            Arc::new(MemoryCacheBackend::new(config.cache.max_capacity)),
            &config.cache,
        );

        Ok(Self {
            limiter: RateLimiterService::local_only(config.rate_limits.clone(), false),
            cache,
            urls: store.clone(),
            clicks: store,
            blobs: Arc::new(MemoryBlobStore::default()),
            geo: Arc::new(DisabledGeo),
            identity: Arc::new(JwtIdentityProvider::new(&config.auth)?),
            metrics: MetricsService::detached(),
        })
    }
}

impl AppState {
    pub fn new(config: AppConfig, deps: Dependencies) -> Result<Arc<Self>> {
        let limiter = Arc::new(deps.limiter);
        let budget = config.enrichment.telemetry_budget();

        let redirects = RedirectService::new(
            limiter.clone(),
            deps.cache.clone(),
            deps.urls.clone(),
            deps.clicks.clone(),
            deps.geo,
            budget,
        );
        let links = LinkService::new(
            limiter.clone(),
            deps.cache.clone(),
            deps.urls.clone(),
            deps.blobs,
        )?
        .with_reserved_codes(api::reserved_codes());
        let analytics = AnalyticsService::new(limiter.clone(), deps.cache.clone(), deps.urls, deps.clicks);

        Ok(Arc::new(Self {
            config,
            limiter,
            cache: deps.cache,
            redirects,
            links,
            analytics,
            identity: deps.identity,
            metrics: deps.metrics,
        }))
    }
}

/// Connect every configured dependency. Redis being unreachable degrades the
/// limiter and the cache; the record store and blob store must come up.
pub async fn build_state(config: AppConfig) -> Result<Arc<AppState>> {
    let metrics = MetricsService::new()?;

    let redis = match &config.redis.url {
        Some(url) => {
            match rate_limit::redis::connect(url.expose_secret(), config.redis.connect_timeout()).await {
                Ok(connection) => Some(connection),
                Err(err) => {
                    warn!(error = %err, "Redis unreachable at startup");
                    None
                }
            }
        }
        None => None,
    };

    let limiter = match &redis {
        Some(connection) => RateLimiterService::with_redis(
            config.rate_limits.clone(),
            RedisRateLimiter::new(connection.clone(), config.redis.timeout()),
        ),
        None => RateLimiterService::local_only(config.rate_limits.clone(), config.redis.url.is_some()),
    };

    let cache = if config.cache.backend == CacheBackendKind::Redis && config.redis.url.is_none() {
        info!("No Redis configured, caching in-process");
        UrlCache::new(
            Arc::new(MemoryCacheBackend::new(config.cache.max_capacity)),
            &config.cache,
        )
    } else {
        UrlCache::from_config(&config.cache, redis, config.redis.timeout())
    };

    let (urls, clicks): (Arc<dyn UrlStore>, Arc<dyn ClickStore>) = match config.database.backend {
        DatabaseBackend::Postgres => {
            let store = Arc::new(PgStore::connect(&config.database).await?);
            (store.clone(), store)
        }
        DatabaseBackend::Memory => {
            warn!("Using the in-memory record store, data is lost on restart");
            let store = Arc::new(MemoryStore::new());
            (store.clone(), store)
        }
    };

    let blobs: Arc<dyn BlobStore> = match config.blob.backend {
        BlobBackendKind::Http => Arc::new(HttpBlobStore::new(&config.blob)?),
        BlobBackendKind::Memory => Arc::new(MemoryBlobStore::default()),
    };

    let geo: Arc<dyn GeoLookup> = if config.enrichment.geo_enabled {
        let locator = HttpGeoLocator::new(
            config.enrichment.geo_base_url.clone(),
            config.enrichment.geo_token.clone(),
            config.enrichment.geo_timeout(),
        )
        .map_err(|e| AppError::Config(format!("Failed to build geo client: {}", e)))?;
        Arc::new(locator)
    } else {
        Arc::new(DisabledGeo)
    };

    let identity: Arc<dyn IdentityProvider> = Arc::new(JwtIdentityProvider::new(&config.auth)?);

    let deps = Dependencies {
        limiter,
        cache,
        urls,
        clicks,
        blobs,
        geo,
        identity,
        metrics,
    };
    AppState::new(config, deps)
}

/// Initialize the shortener server
pub async fn init_server(config: AppConfig) -> Result<()> {
    config.validate()?;

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let state = build_state(config).await?;

    let _sweeper = state
        .limiter
        .local()
        .spawn_sweeper(rate_limit::local::SWEEP_INTERVAL, rate_limit::local::IDLE_EXPIRY);

    let app = api::router(state);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(%addr, "Shortener ready to accept connections");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await
    .map_err(|e| AppError::Internal(format!("Server error: {}", e)))?;

    Ok(())
}
