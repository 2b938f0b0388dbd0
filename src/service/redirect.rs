use super::attempt;
use crate::cache::{CacheKey, UrlCache};
use crate::enrich::{classify_device, GeoInfo, GeoLookup, UNKNOWN};
use crate::error::{AppError, Result};
use crate::identity::Visitor;
use crate::metrics;
use crate::rate_limit::{RateLimitAction, RateLimiterService};
use crate::store::{ClickStore, NewClick, UrlRecord, UrlStore};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// Outcome of resolving a short code
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    Found { target_url: String, record_id: i64 },
    NotFound,
}

/// Answers "where does this code go" and records the visit
#[derive(Clone)]
pub struct RedirectService {
    limiter: Arc<RateLimiterService>,
    cache: UrlCache,
    urls: Arc<dyn UrlStore>,
    clicks: Arc<dyn ClickStore>,
    geo: Arc<dyn GeoLookup>,
    telemetry_budget: Duration,
}

impl RedirectService {
    pub fn new(
        limiter: Arc<RateLimiterService>,
        cache: UrlCache,
        urls: Arc<dyn UrlStore>,
        clicks: Arc<dyn ClickStore>,
        geo: Arc<dyn GeoLookup>,
        telemetry_budget: Duration,
    ) -> Self {
        Self {
            limiter,
            cache,
            urls,
            clicks,
            geo,
            telemetry_budget,
        }
    }

    /// Denied callers never reach the cache or the store. Enrichment and the
    /// click write are best-effort and cannot change the outcome.
    pub async fn resolve(&self, code: &str, visitor: &Visitor) -> Result<Resolution> {
        let started = Instant::now();

        self.limiter
            .check(RateLimitAction::Redirect, &visitor.identifier)
            .await?;

        let code = code.trim();
        if code.is_empty() {
            metrics::record_redirect("not_found");
            return Ok(Resolution::NotFound);
        }

        let Some(record) = self.lookup(code).await? else {
            debug!(code, "Short code not found");
            metrics::record_redirect("not_found");
            metrics::record_resolve_duration(started.elapsed());
            return Ok(Resolution::NotFound);
        };

        self.record_visit(&record, visitor).await;

        info!(code, url_id = record.id, "Resolved short code");
        metrics::record_redirect("found");
        metrics::record_resolve_duration(started.elapsed());

        Ok(Resolution::Found {
            target_url: record.original_url,
            record_id: record.id,
        })
    }

    async fn lookup(&self, code: &str) -> Result<Option<UrlRecord>> {
        let key = CacheKey::short_url(code);
        let record = self
            .cache
            .read_through(&key, || async {
                self.urls.find_by_code(code).await.map_err(AppError::from)
            })
            .await?;

        // An entry that no longer answers to the code it was cached under is stale.
        match record {
            Some(record) if !record.answers_to(code) => {
                self.cache.delete(&key).await;
                Ok(self.urls.find_by_code(code).await?)
            }
            other => Ok(other),
        }
    }

    async fn record_visit(&self, record: &UrlRecord, visitor: &Visitor) {
        let device = classify_device(visitor.user_agent.as_deref());

        let location = match visitor.ip {
            Some(ip) => attempt("geo_lookup", self.telemetry_budget, self.geo.locate(ip))
                .await
                .flatten(),
            None => None,
        };
        let GeoInfo { city, country } = location.unwrap_or_else(|| GeoInfo {
            city: UNKNOWN.to_string(),
            country: UNKNOWN.to_string(),
        });

        let click = NewClick {
            url_id: record.id,
            city,
            country,
            device: device.as_str().to_string(),
        };
        attempt(
            "record_click",
            self.telemetry_budget,
            self.clicks.record_click(click),
        )
        .await;
    }
}
