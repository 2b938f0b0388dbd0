use super::{ClickRecord, ClickStore, NewClick, NewUrl, StoreError, StoreResult, UrlRecord, UrlStore};
use crate::config::DatabaseConfig;
use async_trait::async_trait;
use secrecy::ExposeSecret;
use sqlx::postgres::{PgPool, PgPoolOptions};
use std::time::Duration;
use tracing::info;

const URL_COLUMNS: &str =
    "id, user_id, title, original_url, short_url, custom_url, qr_code, created_at";

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        if let sqlx::Error::Database(db_err) = &err {
            // Unique violation
            if db_err.code().as_deref() == Some("23505") {
                let field = match db_err.constraint() {
                    Some(c) if c.contains("custom_url") => "custom_url",
                    Some(c) if c.contains("short_url") => "short_url",
                    _ => "unknown",
                };
                return StoreError::Conflict {
                    field: field.to_string(),
                };
            }
        }
        StoreError::Backend(err.to_string())
    }
}

/// Claiming a row in `url_codes` can only clash on the code itself, so the
/// conflict belongs to whichever column the code came from.
fn claim_error(err: sqlx::Error, field: &str) -> StoreError {
    match StoreError::from(err) {
        StoreError::Conflict { .. } => StoreError::Conflict {
            field: field.to_string(),
        },
        other => other,
    }
}

/// PostgreSQL-backed record store
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub async fn connect(config: &DatabaseConfig) -> StoreResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(Duration::from_secs(config.acquire_timeout_secs))
            .connect(config.url.expose_secret())
            .await?;

        info!(
            max_connections = config.max_connections,
            "Connected to PostgreSQL"
        );

        let store = Self { pool };
        if config.run_migrations {
            store.migrate().await?;
        }
        Ok(store)
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Apply the bundled schema
    pub async fn migrate(&self) -> StoreResult<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        info!("Database schema is up to date");
        Ok(())
    }
}

#[async_trait]
impl UrlStore for PgStore {
    async fn find_by_code(&self, code: &str) -> StoreResult<Option<UrlRecord>> {
        let record = sqlx::query_as::<_, UrlRecord>(&format!(
            "SELECT {URL_COLUMNS} FROM urls JOIN url_codes ON url_codes.url_id = urls.id
             WHERE url_codes.code = $1"
        ))
        .bind(code)
        .fetch_optional(&self.pool)
        .await?;
        Ok(record)
    }

    async fn find_by_id(&self, id: i64) -> StoreResult<Option<UrlRecord>> {
        let record =
            sqlx::query_as::<_, UrlRecord>(&format!("SELECT {URL_COLUMNS} FROM urls WHERE id = $1"))
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(record)
    }

    async fn find_owned(&self, id: i64, owner: &str) -> StoreResult<Option<UrlRecord>> {
        let record = sqlx::query_as::<_, UrlRecord>(&format!(
            "SELECT {URL_COLUMNS} FROM urls WHERE id = $1 AND user_id = $2"
        ))
        .bind(id)
        .bind(owner)
        .fetch_optional(&self.pool)
        .await?;
        Ok(record)
    }

    async fn list_by_owner(&self, owner: &str) -> StoreResult<Vec<UrlRecord>> {
        let records = sqlx::query_as::<_, UrlRecord>(&format!(
            "SELECT {URL_COLUMNS} FROM urls WHERE user_id = $1 ORDER BY created_at DESC, id DESC"
        ))
        .bind(owner)
        .fetch_all(&self.pool)
        .await?;
        Ok(records)
    }

    async fn code_exists(&self, code: &str) -> StoreResult<bool> {
        let exists: bool = sqlx::query_scalar(
            "SELECT EXISTS(SELECT 1 FROM url_codes WHERE code = $1)",
        )
        .bind(code)
        .fetch_one(&self.pool)
        .await?;
        Ok(exists)
    }

    async fn insert(&self, new: NewUrl) -> StoreResult<UrlRecord> {
        let mut tx = self.pool.begin().await?;

        let record = sqlx::query_as::<_, UrlRecord>(&format!(
            "INSERT INTO urls (user_id, title, original_url, short_url, custom_url, qr_code)
             VALUES ($1, $2, $3, $4, $5, $6)
             RETURNING {URL_COLUMNS}"
        ))
        .bind(&new.user_id)
        .bind(&new.title)
        .bind(&new.original_url)
        .bind(&new.short_url)
        .bind(&new.custom_url)
        .bind(&new.qr_code)
        .fetch_one(&mut *tx)
        .await?;

        let codes = [
            (Some(&record.short_url), "short_url"),
            (record.custom_url.as_ref(), "custom_url"),
        ];
        for (code, field) in codes {
            let Some(code) = code else { continue };
            sqlx::query("INSERT INTO url_codes (code, url_id) VALUES ($1, $2)")
                .bind(code)
                .bind(record.id)
                .execute(&mut *tx)
                .await
                .map_err(|e| claim_error(e, field))?;
        }

        tx.commit().await?;
        Ok(record)
    }

    async fn delete(&self, id: i64, owner: &str) -> StoreResult<bool> {
        let affected = sqlx::query("DELETE FROM urls WHERE id = $1 AND user_id = $2")
            .bind(id)
            .bind(owner)
            .execute(&self.pool)
            .await?
            .rows_affected();
        Ok(affected > 0)
    }
}

#[async_trait]
impl ClickStore for PgStore {
    async fn record_click(&self, click: NewClick) -> StoreResult<()> {
        sqlx::query("INSERT INTO clicks (url_id, city, country, device) VALUES ($1, $2, $3, $4)")
            .bind(click.url_id)
            .bind(&click.city)
            .bind(&click.country)
            .bind(&click.device)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn clicks_for_url(&self, url_id: i64) -> StoreResult<Vec<ClickRecord>> {
        let clicks = sqlx::query_as::<_, ClickRecord>(
            "SELECT id, url_id, city, country, device, created_at
             FROM clicks WHERE url_id = $1 ORDER BY created_at DESC",
        )
        .bind(url_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(clicks)
    }

    async fn clicks_for_urls(&self, url_ids: &[i64]) -> StoreResult<Vec<ClickRecord>> {
        let clicks = sqlx::query_as::<_, ClickRecord>(
            "SELECT id, url_id, city, country, device, created_at
             FROM clicks WHERE url_id = ANY($1) ORDER BY created_at DESC",
        )
        .bind(url_ids)
        .fetch_all(&self.pool)
        .await?;
        Ok(clicks)
    }
}
