//! Durable record store
//!
//! URL and click records live behind two traits so the services can run
//! against PostgreSQL in production and an in-memory store in tests.

pub mod memory;
pub mod models;
pub mod postgres;

use async_trait::async_trait;
use thiserror::Error;

pub use memory::MemoryStore;
pub use models::{ClickRecord, NewClick, NewUrl, UrlRecord};
pub use postgres::PgStore;

pub type StoreResult<T> = std::result::Result<T, StoreError>;

#[derive(Debug, Error)]
pub enum StoreError {
    /// Unique constraint violation on `field`
    #[error("duplicate value for {field}")]
    Conflict { field: String },

    #[error("store backend error: {0}")]
    Backend(String),
}

#[async_trait]
pub trait UrlStore: Send + Sync {
    /// Record whose short code or alias equals `code`
    async fn find_by_code(&self, code: &str) -> StoreResult<Option<UrlRecord>>;

    async fn find_by_id(&self, id: i64) -> StoreResult<Option<UrlRecord>>;

    /// Record `id`, only if it belongs to `owner`
    async fn find_owned(&self, id: i64, owner: &str) -> StoreResult<Option<UrlRecord>>;

    /// Newest first
    async fn list_by_owner(&self, owner: &str) -> StoreResult<Vec<UrlRecord>>;

    /// Whether `code` is taken as a short code or an alias
    async fn code_exists(&self, code: &str) -> StoreResult<bool>;

    async fn insert(&self, new: NewUrl) -> StoreResult<UrlRecord>;

    /// Delete `id` if owned by `owner`. Returns whether a row was removed.
    async fn delete(&self, id: i64, owner: &str) -> StoreResult<bool>;
}

#[async_trait]
pub trait ClickStore: Send + Sync {
    async fn record_click(&self, click: NewClick) -> StoreResult<()>;

    async fn clicks_for_url(&self, url_id: i64) -> StoreResult<Vec<ClickRecord>>;

    async fn clicks_for_urls(&self, url_ids: &[i64]) -> StoreResult<Vec<ClickRecord>>;
}
