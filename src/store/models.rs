use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A shortened link as stored durably and cached
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct UrlRecord {
    pub id: i64,
    /// Opaque owner id from the identity provider
    pub user_id: String,
    pub title: String,
    pub original_url: String,
    /// Generated short code
    pub short_url: String,
    /// Optional alias chosen by the owner
    pub custom_url: Option<String>,
    /// Public URL of the QR image
    pub qr_code: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl UrlRecord {
    /// Every code this record resolves under
    pub fn codes(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.short_url.as_str()).chain(self.custom_url.as_deref())
    }

    /// Lookup matches either the short code or the alias
    pub fn answers_to(&self, code: &str) -> bool {
        self.codes().any(|c| c == code)
    }

    pub fn is_owned_by(&self, owner: &str) -> bool {
        self.user_id == owner
    }
}

/// Fields supplied when inserting a record; the store assigns id and timestamp
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewUrl {
    pub user_id: String,
    pub title: String,
    pub original_url: String,
    pub short_url: String,
    pub custom_url: Option<String>,
    pub qr_code: Option<String>,
}

/// One recorded visit
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct ClickRecord {
    pub id: i64,
    pub url_id: i64,
    pub city: String,
    pub country: String,
    pub device: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewClick {
    pub url_id: i64,
    pub city: String,
    pub country: String,
    pub device: String,
}
