use super::local::LocalRateLimiter;
use super::redis::{BackendError, RedisRateLimiter, WindowBackend};
use super::types::{
    now_millis, RateLimitAction, RateLimitDecision, RateLimitKey, RateLimitPolicies,
};
use crate::error::Result;
use crate::metrics;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Rate limiter service: Redis as the shared store, in-process windows as the fallback
pub struct RateLimiterService {
    /// Local (in-memory) rate limiter
    local: Arc<LocalRateLimiter>,
    /// Shared window store, normally Redis (optional)
    redis: Option<Arc<dyn WindowBackend>>,
    policies: RateLimitPolicies,
    /// Set while decisions come from the local windows
    degraded: AtomicBool,
}

impl RateLimiterService {
    /// Local-only rate limiting. Counts as degraded when `redis_expected` is set,
    /// i.e. a shared store was configured but could not be reached at startup.
    pub fn local_only(policies: RateLimitPolicies, redis_expected: bool) -> Self {
        if redis_expected {
            warn!("Redis unavailable, rate limiting is process-local");
            metrics::record_rate_limit_fallback("unavailable_at_init");
        } else {
            info!("Initializing local-only rate limiter");
        }
        metrics::record_rate_limit_degraded(redis_expected);

        Self {
            local: Arc::new(LocalRateLimiter::new()),
            redis: None,
            policies,
            degraded: AtomicBool::new(redis_expected),
        }
    }

    /// Redis backend with local fallback
    pub fn with_redis(policies: RateLimitPolicies, redis: RedisRateLimiter) -> Self {
        info!("Initializing rate limiter with Redis backend");
        Self::with_backend(policies, Arc::new(redis))
    }

    /// Any shared window store with local fallback
    pub fn with_backend(policies: RateLimitPolicies, backend: Arc<dyn WindowBackend>) -> Self {
        metrics::record_rate_limit_degraded(false);

        Self {
            local: Arc::new(LocalRateLimiter::new()),
            redis: Some(backend),
            policies,
            degraded: AtomicBool::new(false),
        }
    }

    /// Record a request for `(action, identifier)` and decide whether it is admitted.
    /// Backing-store failures never surface; the local windows answer instead.
    pub async fn admit(&self, action: RateLimitAction, identifier: &str) -> RateLimitDecision {
        let key = RateLimitKey::new(action, identifier);
        let policy = self.policies.for_action(action);
        let now_ms = now_millis();

        let decision = match &self.redis {
            Some(redis) => match redis.check_at(&key, &policy, now_ms).await {
                Ok(decision) => {
                    self.mark_healthy();
                    decision
                }
                Err(err) => {
                    self.mark_degraded(&err);
                    self.local.check_at(&key, &policy, now_ms)
                }
            },
            None => self.local.check_at(&key, &policy, now_ms),
        };

        metrics::record_rate_limit_decision(action.as_str(), decision.admitted);
        if !decision.admitted {
            debug!(
                action = %action,
                identifier,
                limit = decision.limit,
                "Rate limit exceeded"
            );
        }

        decision
    }

    /// [`admit`](Self::admit), with a denial turned into `AppError::RateLimited`
    pub async fn check(&self, action: RateLimitAction, identifier: &str) -> Result<RateLimitDecision> {
        self.admit(action, identifier).await.into_result()
    }

    fn mark_degraded(&self, err: &BackendError) {
        let reason = match err {
            BackendError::Timeout(_) => "timeout",
            BackendError::Redis(_) => "error",
        };
        metrics::record_rate_limit_fallback(reason);

        if !self.degraded.swap(true, Ordering::Relaxed) {
            warn!(error = %err, "Redis rate limit check failed, using local fallback");
            metrics::record_rate_limit_degraded(true);
        }
    }

    fn mark_healthy(&self) {
        if self.degraded.swap(false, Ordering::Relaxed) {
            info!("Redis rate limiting recovered");
            metrics::record_rate_limit_degraded(false);
        }
    }

    /// Whether decisions currently come from the process-local fallback
    pub fn is_degraded(&self) -> bool {
        self.degraded.load(Ordering::Relaxed)
    }

    /// Check if Redis is configured
    pub fn is_redis_available(&self) -> bool {
        self.redis.is_some()
    }

    pub fn policies(&self) -> &RateLimitPolicies {
        &self.policies
    }

    /// The in-process windows, for the housekeeping sweep
    pub fn local(&self) -> &Arc<LocalRateLimiter> {
        &self.local
    }
}
