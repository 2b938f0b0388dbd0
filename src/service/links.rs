use super::shortcode;
use crate::blob::{qr_object_name, BlobStore};
use crate::cache::{CacheKey, UrlCache};
use crate::error::{AppError, Result};
use crate::metrics;
use crate::rate_limit::{RateLimitAction, RateLimiterService};
use crate::store::{NewUrl, StoreError, UrlRecord, UrlStore};
use regex::Regex;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Generated codes tried before giving up on a create
const MAX_CODE_ATTEMPTS: usize = 5;

const MAX_TITLE_LEN: usize = 255;
const MAX_URL_LEN: usize = 2048;

const ALIAS_PATTERN: &str = r"^[A-Za-z0-9_-]{3,32}$";

#[derive(Debug, Clone)]
pub struct QrImage {
    pub bytes: Vec<u8>,
    pub content_type: String,
}

/// Owner-supplied fields for a new link
#[derive(Debug, Clone, Default)]
pub struct CreateLink {
    pub title: String,
    pub original_url: String,
    /// Empty or missing means no alias
    pub custom_url: Option<String>,
    pub qr_image: Option<QrImage>,
}

/// Create, read and delete URL records on behalf of their owner
#[derive(Clone)]
pub struct LinkService {
    limiter: Arc<RateLimiterService>,
    cache: UrlCache,
    urls: Arc<dyn UrlStore>,
    blobs: Arc<dyn BlobStore>,
    alias_pattern: Regex,
    /// Codes another route answers to; never handed out
    reserved: Vec<String>,
}

impl LinkService {
    pub fn new(
        limiter: Arc<RateLimiterService>,
        cache: UrlCache,
        urls: Arc<dyn UrlStore>,
        blobs: Arc<dyn BlobStore>,
    ) -> Result<Self> {
        let alias_pattern = Regex::new(ALIAS_PATTERN)
            .map_err(|e| AppError::Config(format!("Invalid alias pattern: {}", e)))?;

        Ok(Self {
            limiter,
            cache,
            urls,
            blobs,
            alias_pattern,
            reserved: Vec::new(),
        })
    }

    pub fn with_reserved_codes(mut self, codes: Vec<String>) -> Self {
        self.reserved = codes;
        self
    }

    fn is_reserved(&self, code: &str) -> bool {
        self.reserved.iter().any(|r| r.eq_ignore_ascii_case(code))
    }

    pub async fn create(&self, identifier: &str, owner: &str, input: CreateLink) -> Result<UrlRecord> {
        self.limiter
            .check(RateLimitAction::CreateUrl, identifier)
            .await?;

        let title = validate_title(&input.title)?;
        let original_url = validate_url(&input.original_url)?;
        let alias = self.normalize_alias(input.custom_url.as_deref())?;

        if let Some(alias) = &alias {
            if self.urls.code_exists(alias).await? {
                return Err(alias_taken());
            }
        }

        let record = self
            .insert_with_fresh_code(owner, title, original_url, alias, input.qr_image)
            .await?;

        self.cache.set(&CacheKey::url(record.id), &record).await;
        for code in record.codes() {
            self.cache.set(&CacheKey::short_url(code), &record).await;
        }
        self.cache.delete(&CacheKey::user_urls(owner)).await;

        info!(
            url_id = record.id,
            short_url = %record.short_url,
            owner,
            "Created short link"
        );
        Ok(record)
    }

    async fn insert_with_fresh_code(
        &self,
        owner: &str,
        title: String,
        original_url: String,
        alias: Option<String>,
        qr_image: Option<QrImage>,
    ) -> Result<UrlRecord> {
        for attempt in 1..=MAX_CODE_ATTEMPTS {
            let code = shortcode::generate();
            if self.is_reserved(&code) {
                continue;
            }
            if self.urls.code_exists(&code).await? {
                debug!(code, attempt, "Generated short code already in use");
                metrics::record_short_code_collision();
                continue;
            }

            // A retry after this point leaves the previous image behind.
            let qr_code = match &qr_image {
                Some(image) => Some(
                    self.blobs
                        .upload(&qr_object_name(&code), image.bytes.clone(), &image.content_type)
                        .await?,
                ),
                None => None,
            };

            let new = NewUrl {
                user_id: owner.to_string(),
                title: title.clone(),
                original_url: original_url.clone(),
                short_url: code.clone(),
                custom_url: alias.clone(),
                qr_code,
            };

            match self.urls.insert(new).await {
                Ok(record) => return Ok(record),
                Err(StoreError::Conflict { field }) if field == "short_url" => {
                    debug!(code, attempt, "Short code taken during insert");
                    metrics::record_short_code_collision();
                }
                Err(StoreError::Conflict { field }) if field == "custom_url" => {
                    return Err(alias_taken());
                }
                Err(StoreError::Conflict { field }) => {
                    // Unattributed: blame the alias only if it is now taken.
                    if let Some(alias) = &alias {
                        if self.urls.code_exists(alias).await? {
                            return Err(alias_taken());
                        }
                    }
                    debug!(code, attempt, field = %field, "Insert conflict, trying another code");
                    metrics::record_short_code_collision();
                }
                Err(err) => return Err(err.into()),
            }
        }

        Err(AppError::Internal(format!(
            "no free short code after {} attempts",
            MAX_CODE_ATTEMPTS
        )))
    }

    fn normalize_alias(&self, alias: Option<&str>) -> Result<Option<String>> {
        let Some(alias) = alias.map(str::trim).filter(|a| !a.is_empty()) else {
            return Ok(None);
        };
        if !self.alias_pattern.is_match(alias) {
            return Err(AppError::validation(
                "custom_url",
                "must be 3-32 characters of letters, digits, '-' or '_'",
            ));
        }
        if self.is_reserved(alias) {
            return Err(AppError::validation("custom_url", "is reserved"));
        }
        Ok(Some(alias.to_string()))
    }

    /// Missing records and records owned by someone else are both `NotFound`
    pub async fn delete(&self, identifier: &str, id: i64, owner: &str) -> Result<()> {
        self.limiter
            .check(RateLimitAction::DeleteUrl, identifier)
            .await?;

        let mut stale = vec![CacheKey::url(id), CacheKey::user_urls(owner)];
        match self.urls.find_owned(id, owner).await {
            Ok(Some(record)) => stale.extend(record.codes().map(CacheKey::short_url)),
            Ok(None) => return Err(AppError::NotFound(format!("url {}", id))),
            Err(err) => {
                warn!(url_id = id, error = %err, "Could not load record before delete, alias keys stay cached");
            }
        }

        if !self.urls.delete(id, owner).await? {
            return Err(AppError::NotFound(format!("url {}", id)));
        }

        self.cache.invalidate(&stale).await;
        info!(url_id = id, owner, "Deleted short link");
        Ok(())
    }

    pub async fn list(&self, identifier: &str, owner: &str) -> Result<Vec<UrlRecord>> {
        self.limiter
            .check(RateLimitAction::ListUrls, identifier)
            .await?;
        list_owned(&self.cache, self.urls.as_ref(), owner).await
    }

    pub async fn get_one(&self, identifier: &str, id: i64, owner: &str) -> Result<UrlRecord> {
        self.limiter
            .check(RateLimitAction::GetUrl, identifier)
            .await?;
        fetch_owned(&self.cache, self.urls.as_ref(), id, owner)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("url {}", id)))
    }
}

/// Owner-checked read of `url:<id>`. A cached record belonging to someone
/// else counts as a miss and the store is asked with the owner filter.
pub(crate) async fn fetch_owned(
    cache: &UrlCache,
    urls: &dyn UrlStore,
    id: i64,
    owner: &str,
) -> Result<Option<UrlRecord>> {
    let key = CacheKey::url(id);
    if let Some(cached) = cache.get::<UrlRecord>(&key).await {
        if cached.is_owned_by(owner) {
            return Ok(Some(cached));
        }
        debug!(url_id = id, "Cached record belongs to another owner");
    }

    let record = urls.find_owned(id, owner).await?;
    if let Some(record) = &record {
        cache.set(&key, record).await;
    }
    Ok(record)
}

/// Owner-checked read of `user_urls:<owner>`
pub(crate) async fn list_owned(cache: &UrlCache, urls: &dyn UrlStore, owner: &str) -> Result<Vec<UrlRecord>> {
    let key = CacheKey::user_urls(owner);
    if let Some(cached) = cache.get::<Vec<UrlRecord>>(&key).await {
        if cached.iter().all(|r| r.is_owned_by(owner)) {
            return Ok(cached);
        }
        debug!(owner, "Cached list holds foreign records");
    }

    let records = urls.list_by_owner(owner).await?;
    cache.set(&key, &records).await;
    Ok(records)
}

fn alias_taken() -> AppError {
    AppError::Conflict {
        field: "custom_url".to_string(),
        message: "is already taken".to_string(),
    }
}

fn validate_title(title: &str) -> Result<String> {
    let title = title.trim();
    if title.is_empty() {
        return Err(AppError::validation("title", "is required"));
    }
    if title.chars().count() > MAX_TITLE_LEN {
        return Err(AppError::validation(
            "title",
            format!("must be at most {} characters", MAX_TITLE_LEN),
        ));
    }
    Ok(title.to_string())
}

fn validate_url(raw: &str) -> Result<String> {
    let raw = raw.trim();
    if raw.len() > MAX_URL_LEN {
        return Err(AppError::validation(
            "long_url",
            format!("must be at most {} characters", MAX_URL_LEN),
        ));
    }

    let parsed = url::Url::parse(raw)
        .map_err(|_| AppError::validation("long_url", "must be a valid URL"))?;
    if !matches!(parsed.scheme(), "http" | "https") || parsed.host_str().is_none() {
        return Err(AppError::validation("long_url", "must be an http or https URL"));
    }
    Ok(raw.to_string())
}
