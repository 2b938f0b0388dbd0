//! Object storage for QR code images

use crate::error::AppError;
use async_trait::async_trait;
use dashmap::DashMap;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use secrecy::{ExposeSecret, Secret};
use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info};

#[derive(Debug, Error)]
pub enum BlobError {
    #[error("blob store misconfigured: {0}")]
    Config(String),

    #[error("upload of {name} failed: {message}")]
    Upload { name: String, message: String },
}

impl From<BlobError> for AppError {
    fn from(err: BlobError) -> Self {
        match err {
            BlobError::Config(message) => AppError::Config(message),
            other => AppError::Blob(other.to_string()),
        }
    }
}

/// Object name for a record's QR image
pub fn qr_object_name(short_code: &str) -> String {
    format!("qr-{}", short_code)
}

#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Store `bytes` under `name` and return its public URL
    async fn upload(&self, name: &str, bytes: Vec<u8>, content_type: &str) -> Result<String, BlobError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BlobBackendKind {
    Http,
    Memory,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BlobConfig {
    #[serde(default = "default_backend")]
    pub backend: BlobBackendKind,
    #[serde(default = "default_bucket")]
    pub bucket: String,
    /// Root of the storage service, e.g. `https://project.supabase.co`
    #[serde(default)]
    pub base_url: Option<String>,
    /// Base of the public URLs handed back to callers
    #[serde(default)]
    pub public_base_url: Option<String>,
    #[serde(
        default,
        deserialize_with = "crate::config::deserialize_optional_secret"
    )]
    pub api_key: Option<Secret<String>>,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_backend() -> BlobBackendKind {
    BlobBackendKind::Memory
}

fn default_bucket() -> String {
    "qrs".to_string()
}

fn default_timeout_ms() -> u64 {
    5000
}

impl Default for BlobConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            bucket: default_bucket(),
            base_url: None,
            public_base_url: None,
            api_key: None,
            timeout_ms: default_timeout_ms(),
        }
    }
}

/// Storage service speaking the `/storage/v1/object/<bucket>/<name>` API
pub struct HttpBlobStore {
    client: reqwest::Client,
    upload_base: String,
    public_base: String,
    api_key: Option<Secret<String>>,
}

impl HttpBlobStore {
    pub fn new(config: &BlobConfig) -> Result<Self, BlobError> {
        let base_url = config
            .base_url
            .as_deref()
            .map(|url| url.trim_end_matches('/'))
            .ok_or_else(|| BlobError::Config("blob.base_url is required for the http backend".to_string()))?;

        if !base_url.starts_with("http://") && !base_url.starts_with("https://") {
            return Err(BlobError::Config(format!(
                "blob.base_url must be an http(s) URL, got {}",
                base_url
            )));
        }

        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .map_err(|e| BlobError::Config(format!("failed to build HTTP client: {}", e)))?;

        let public_base = match &config.public_base_url {
            Some(base) => base.trim_end_matches('/').to_string(),
            None => format!("{}/storage/v1/object/public/{}", base_url, config.bucket),
        };

        info!(bucket = %config.bucket, base_url, "Initialized HTTP blob store");

        Ok(Self {
            client,
            upload_base: format!("{}/storage/v1/object/{}", base_url, config.bucket),
            public_base,
            api_key: config.api_key.clone(),
        })
    }
}

#[async_trait]
impl BlobStore for HttpBlobStore {
    async fn upload(&self, name: &str, bytes: Vec<u8>, content_type: &str) -> Result<String, BlobError> {
        let size = bytes.len();
        let mut request = self
            .client
            .post(format!("{}/{}", self.upload_base, name))
            .header(CONTENT_TYPE, content_type)
            .body(bytes);
        if let Some(key) = &self.api_key {
            request = request.header(AUTHORIZATION, format!("Bearer {}", key.expose_secret()));
        }

        let response = request.send().await.map_err(|e| BlobError::Upload {
            name: name.to_string(),
            message: e.to_string(),
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(BlobError::Upload {
                name: name.to_string(),
                message: format!("unexpected status {}", status.as_u16()),
            });
        }

        debug!(name, size, "Uploaded blob");
        Ok(format!("{}/{}", self.public_base, name))
    }
}

#[derive(Debug, Clone)]
pub struct StoredBlob {
    pub bytes: Vec<u8>,
    pub content_type: String,
}

/// In-process blob store for tests and development
#[derive(Debug)]
pub struct MemoryBlobStore {
    objects: DashMap<String, StoredBlob>,
    public_base_url: String,
}

impl MemoryBlobStore {
    pub fn new(public_base_url: impl Into<String>) -> Self {
        Self {
            objects: DashMap::new(),
            public_base_url: public_base_url.into(),
        }
    }

    pub fn get(&self, name: &str) -> Option<StoredBlob> {
        self.objects.get(name).map(|entry| entry.value().clone())
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }
}

impl Default for MemoryBlobStore {
    fn default() -> Self {
        Self::new("memory://blobs")
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn upload(&self, name: &str, bytes: Vec<u8>, content_type: &str) -> Result<String, BlobError> {
        self.objects.insert(
            name.to_string(),
            StoredBlob {
                bytes,
                content_type: content_type.to_string(),
            },
        );
        Ok(format!("{}/{}", self.public_base_url, name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_bytes, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const PNG: [u8; 4] = [0x89, 0x50, 0x4e, 0x47];

    fn http_config(base_url: String) -> BlobConfig {
        BlobConfig {
            backend: BlobBackendKind::Http,
            base_url: Some(base_url),
            api_key: Some(Secret::new("service-key".to_string())),
            ..BlobConfig::default()
        }
    }

    #[test]
    fn test_qr_object_name() {
        assert_eq!(qr_object_name("abc123"), "qr-abc123");
    }

    #[tokio::test]
    async fn test_memory_upload() {
        let store = MemoryBlobStore::new("https://cdn.example.com/qrs");
        let url = store
            .upload("qr-abc123", PNG.to_vec(), "image/png")
            .await
            .unwrap();

        assert_eq!(url, "https://cdn.example.com/qrs/qr-abc123");
        let stored = store.get("qr-abc123").unwrap();
        assert_eq!(stored.content_type, "image/png");
        assert_eq!(stored.bytes.len(), 4);
    }

    #[tokio::test]
    async fn test_http_upload_returns_public_url() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/storage/v1/object/qrs/qr-abc123"))
            .and(header("authorization", "Bearer service-key"))
            .and(header("content-type", "image/png"))
            .and(body_bytes(PNG.to_vec()))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "Key": "qrs/qr-abc123"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let store = HttpBlobStore::new(&http_config(server.uri())).unwrap();
        let url = store.upload("qr-abc123", PNG.to_vec(), "image/png").await.unwrap();

        assert_eq!(
            url,
            format!("{}/storage/v1/object/public/qrs/qr-abc123", server.uri())
        );
    }

    #[tokio::test]
    async fn test_http_upload_failure() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(409))
            .mount(&server)
            .await;

        let store = HttpBlobStore::new(&http_config(server.uri())).unwrap();
        match store.upload("qr-abc123", PNG.to_vec(), "image/png").await {
            Err(BlobError::Upload { name, message }) => {
                assert_eq!(name, "qr-abc123");
                assert!(message.contains("409"));
            }
            other => panic!("expected upload error, got {:?}", other),
        }
    }

    #[test]
    fn test_http_store_requires_base_url() {
        let config = BlobConfig {
            backend: BlobBackendKind::Http,
            ..BlobConfig::default()
        };
        assert!(matches!(HttpBlobStore::new(&config), Err(BlobError::Config(_))));
    }

    #[test]
    fn test_blob_error_maps_to_app_error() {
        let err: AppError = BlobError::Upload {
            name: "qr-abc123".to_string(),
            message: "503".to_string(),
        }
        .into();
        assert_eq!(err.kind(), "internal");
    }
}
