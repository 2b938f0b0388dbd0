use super::{ClickRecord, ClickStore, NewClick, NewUrl, StoreError, StoreResult, UrlRecord, UrlStore};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::BTreeMap;
use tokio::sync::RwLock;

#[derive(Debug, Default)]
struct State {
    urls: BTreeMap<i64, UrlRecord>,
    clicks: Vec<ClickRecord>,
    next_url_id: i64,
    next_click_id: i64,
}

/// In-process store for tests and single-node development.
///
/// Codes are unique across both the short code and alias columns.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: RwLock<State>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn url_count(&self) -> usize {
        self.state.read().await.urls.len()
    }
}

#[async_trait]
impl UrlStore for MemoryStore {
    async fn find_by_code(&self, code: &str) -> StoreResult<Option<UrlRecord>> {
        let state = self.state.read().await;
        Ok(state.urls.values().find(|r| r.answers_to(code)).cloned())
    }

    async fn find_by_id(&self, id: i64) -> StoreResult<Option<UrlRecord>> {
        Ok(self.state.read().await.urls.get(&id).cloned())
    }

    async fn find_owned(&self, id: i64, owner: &str) -> StoreResult<Option<UrlRecord>> {
        let state = self.state.read().await;
        Ok(state
            .urls
            .get(&id)
            .filter(|r| r.is_owned_by(owner))
            .cloned())
    }

    async fn list_by_owner(&self, owner: &str) -> StoreResult<Vec<UrlRecord>> {
        let state = self.state.read().await;
        let mut records: Vec<UrlRecord> = state
            .urls
            .values()
            .filter(|r| r.is_owned_by(owner))
            .cloned()
            .collect();
        records.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(records)
    }

    async fn code_exists(&self, code: &str) -> StoreResult<bool> {
        let state = self.state.read().await;
        Ok(state.urls.values().any(|r| r.answers_to(code)))
    }

    async fn insert(&self, new: NewUrl) -> StoreResult<UrlRecord> {
        let mut state = self.state.write().await;

        if state.urls.values().any(|r| r.answers_to(&new.short_url)) {
            return Err(StoreError::Conflict {
                field: "short_url".to_string(),
            });
        }
        if let Some(alias) = &new.custom_url {
            if state.urls.values().any(|r| r.answers_to(alias)) {
                return Err(StoreError::Conflict {
                    field: "custom_url".to_string(),
                });
            }
        }

        state.next_url_id += 1;
        let record = UrlRecord {
            id: state.next_url_id,
            user_id: new.user_id,
            title: new.title,
            original_url: new.original_url,
            short_url: new.short_url,
            custom_url: new.custom_url,
            qr_code: new.qr_code,
            created_at: Utc::now(),
        };
        state.urls.insert(record.id, record.clone());
        Ok(record)
    }

    async fn delete(&self, id: i64, owner: &str) -> StoreResult<bool> {
        let mut state = self.state.write().await;
        let owned = state.urls.get(&id).is_some_and(|r| r.is_owned_by(owner));
        if !owned {
            return Ok(false);
        }
        state.urls.remove(&id);
        state.clicks.retain(|c| c.url_id != id);
        Ok(true)
    }
}

#[async_trait]
impl ClickStore for MemoryStore {
    async fn record_click(&self, click: NewClick) -> StoreResult<()> {
        let mut state = self.state.write().await;
        state.next_click_id += 1;
        let record = ClickRecord {
            id: state.next_click_id,
            url_id: click.url_id,
            city: click.city,
            country: click.country,
            device: click.device,
            created_at: Utc::now(),
        };
        state.clicks.push(record);
        Ok(())
    }

    async fn clicks_for_url(&self, url_id: i64) -> StoreResult<Vec<ClickRecord>> {
        self.clicks_for_urls(&[url_id]).await
    }

    async fn clicks_for_urls(&self, url_ids: &[i64]) -> StoreResult<Vec<ClickRecord>> {
        let state = self.state.read().await;
        Ok(state
            .clicks
            .iter()
            .filter(|c| url_ids.contains(&c.url_id))
            .cloned()
            .collect())
    }
}
