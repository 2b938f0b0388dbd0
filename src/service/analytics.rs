use super::links::{fetch_owned, list_owned};
use crate::cache::UrlCache;
use crate::error::{AppError, Result};
use crate::rate_limit::{RateLimitAction, RateLimiterService};
use crate::store::{ClickRecord, ClickStore, UrlRecord, UrlStore};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CountBucket {
    pub name: String,
    pub count: usize,
}

/// Click breakdown for one link
#[derive(Debug, Clone, Serialize)]
pub struct UrlStats {
    pub url: UrlRecord,
    pub total_clicks: usize,
    pub devices: Vec<CountBucket>,
    pub cities: Vec<CountBucket>,
    pub countries: Vec<CountBucket>,
    pub clicks: Vec<ClickRecord>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OwnerStats {
    pub total_links: usize,
    pub total_clicks: usize,
}

#[derive(Clone)]
pub struct AnalyticsService {
    limiter: Arc<RateLimiterService>,
    cache: UrlCache,
    urls: Arc<dyn UrlStore>,
    clicks: Arc<dyn ClickStore>,
}

impl AnalyticsService {
    pub fn new(
        limiter: Arc<RateLimiterService>,
        cache: UrlCache,
        urls: Arc<dyn UrlStore>,
        clicks: Arc<dyn ClickStore>,
    ) -> Self {
        Self {
            limiter,
            cache,
            urls,
            clicks,
        }
    }

    pub async fn stats(&self, identifier: &str, id: i64, owner: &str) -> Result<UrlStats> {
        self.limiter
            .check(RateLimitAction::UrlStats, identifier)
            .await?;

        let url = fetch_owned(&self.cache, self.urls.as_ref(), id, owner)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("url {}", id)))?;

        let mut clicks = self.clicks.clicks_for_url(url.id).await?;
        clicks.sort_by(|a, b| b.created_at.cmp(&a.created_at));

        Ok(UrlStats {
            total_clicks: clicks.len(),
            devices: tally(clicks.iter().map(|c| c.device.as_str())),
            cities: tally(clicks.iter().map(|c| c.city.as_str())),
            countries: tally(clicks.iter().map(|c| c.country.as_str())),
            url,
            clicks,
        })
    }

    pub async fn owner_stats(&self, identifier: &str, owner: &str) -> Result<OwnerStats> {
        self.limiter
            .check(RateLimitAction::UrlStats, identifier)
            .await?;

        let urls = list_owned(&self.cache, self.urls.as_ref(), owner).await?;
        let ids: Vec<i64> = urls.iter().map(|u| u.id).collect();
        let total_clicks = if ids.is_empty() {
            0
        } else {
            self.clicks.clicks_for_urls(&ids).await?.len()
        };

        Ok(OwnerStats {
            total_links: urls.len(),
            total_clicks,
        })
    }
}

/// Count occurrences, largest first, ties by name
fn tally<'a>(values: impl Iterator<Item = &'a str>) -> Vec<CountBucket> {
    let mut counts: HashMap<&str, usize> = HashMap::new();
    for value in values {
        *counts.entry(value).or_default() += 1;
    }

    let mut buckets: Vec<CountBucket> = counts
        .into_iter()
        .map(|(name, count)| CountBucket {
            name: name.to_string(),
            count,
        })
        .collect();
    buckets.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.name.cmp(&b.name)));
    buckets
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rate_limit::RateLimitPolicies;
    use crate::store::{MemoryStore, NewClick, NewUrl};

    async fn setup() -> (AnalyticsService, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        for (code, owner) in [("abc123", "user-a"), ("def456", "user-a"), ("ghi789", "user-b")] {
            store
                .insert(NewUrl {
                    user_id: owner.to_string(),
                    title: code.to_string(),
                    original_url: "https://example.com".to_string(),
                    short_url: code.to_string(),
                    custom_url: None,
                    qr_code: None,
                })
                .await
                .unwrap();
        }

        let clicks = [
            (1, "Lisbon", "PT", "mobile"),
            (1, "Porto", "PT", "desktop"),
            (1, "Lisbon", "PT", "mobile"),
            (2, "Berlin", "DE", "desktop"),
            (3, "Paris", "FR", "mobile"),
        ];
        for (url_id, city, country, device) in clicks {
            store
                .record_click(NewClick {
                    url_id,
                    city: city.to_string(),
                    country: country.to_string(),
                    device: device.to_string(),
                })
                .await
                .unwrap();
        }

        let service = AnalyticsService::new(
            Arc::new(RateLimiterService::local_only(RateLimitPolicies::default(), false)),
            UrlCache::in_memory(),
            store.clone(),
            store.clone(),
        );
        (service, store)
    }

    #[tokio::test]
    async fn test_url_stats_breakdown() {
        let (service, _) = setup().await;
        let stats = service.stats("10.0.0.1", 1, "user-a").await.unwrap();

        assert_eq!(stats.total_clicks, 3);
        assert_eq!(stats.clicks.len(), 3);
        assert_eq!(
            stats.cities,
            vec![
                CountBucket { name: "Lisbon".to_string(), count: 2 },
                CountBucket { name: "Porto".to_string(), count: 1 },
            ]
        );
        assert_eq!(stats.countries[0], CountBucket { name: "PT".to_string(), count: 3 });
        assert_eq!(stats.devices[0].name, "mobile");
    }

    #[tokio::test]
    async fn test_stats_for_foreign_url_is_not_found() {
        let (service, _) = setup().await;
        assert!(matches!(
            service.stats("10.0.0.1", 3, "user-a").await,
            Err(AppError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_owner_stats() {
        let (service, _) = setup().await;
        assert_eq!(
            service.owner_stats("10.0.0.1", "user-a").await.unwrap(),
            OwnerStats { total_links: 2, total_clicks: 4 }
        );
        assert_eq!(
            service.owner_stats("10.0.0.1", "nobody").await.unwrap(),
            OwnerStats { total_links: 0, total_clicks: 0 }
        );
    }

    #[test]
    fn test_tally_ties_sorted_by_name() {
        let buckets = tally(["b", "a", "c", "c"].into_iter());
        let names: Vec<&str> = buckets.iter().map(|b| b.name.as_str()).collect();
        assert_eq!(names, vec!["c", "a", "b"]);
    }
}
