use crate::blob::{BlobBackendKind, BlobConfig};
use crate::cache::CacheConfig;
use crate::error::{AppError, Result};
use crate::rate_limit::types::RateLimitPolicies;
use secrecy::{ExposeSecret, Secret};
use serde::{Deserialize, Deserializer};
use std::path::Path;
use std::time::Duration;

/// Prefix for environment overrides, e.g. `SHORTENER__SERVER__PORT=9090`
pub const ENV_PREFIX: &str = "SHORTENER";

/// Main service configuration
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub redis: RedisConfig,
    #[serde(default)]
    pub rate_limits: RateLimitPolicies,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub blob: BlobConfig,
    #[serde(default)]
    pub enrichment: EnrichmentConfig,
    #[serde(default)]
    pub auth: AuthConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Compact,
    Json,
}

/// Server configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Request timeout in seconds
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_log_format")]
    pub log_format: LogFormat,
}

/// Shared Redis used by the rate limiter and the cache
#[derive(Debug, Clone, Deserialize)]
pub struct RedisConfig {
    /// Connection URL; without one both run in-process
    #[serde(default, deserialize_with = "deserialize_optional_secret")]
    pub url: Option<Secret<String>>,
    /// Per-command timeout in milliseconds
    #[serde(default = "default_redis_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "default_redis_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DatabaseBackend {
    Postgres,
    Memory,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_database_backend")]
    pub backend: DatabaseBackend,
    #[serde(
        default = "default_database_url",
        deserialize_with = "deserialize_secret"
    )]
    pub url: Secret<String>,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,
    #[serde(default = "default_acquire_timeout_secs")]
    pub acquire_timeout_secs: u64,
    #[serde(default)]
    pub run_migrations: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EnrichmentConfig {
    #[serde(default = "default_true")]
    pub geo_enabled: bool,
    /// ipinfo-compatible lookup service
    #[serde(default = "default_geo_base_url")]
    pub geo_base_url: String,
    #[serde(default, deserialize_with = "deserialize_optional_secret")]
    pub geo_token: Option<Secret<String>>,
    #[serde(default = "default_geo_timeout_ms")]
    pub geo_timeout_ms: u64,
    /// Upper bound for each best-effort step on the redirect path
    #[serde(default = "default_telemetry_budget_ms")]
    pub telemetry_budget_ms: u64,
}

/// Bearer token validation
#[derive(Debug, Clone, Deserialize)]
pub struct AuthConfig {
    #[serde(default = "default_jwt_algorithm")]
    pub algorithm: String,
    /// Shared secret for HS* algorithms
    #[serde(default, deserialize_with = "deserialize_optional_secret")]
    pub secret: Option<Secret<String>>,
    /// PEM public key for RS* algorithms
    #[serde(default)]
    pub public_key: Option<String>,
    #[serde(default)]
    pub issuer: Option<String>,
    #[serde(default)]
    pub audience: Option<String>,
}

/// Custom deserializer for secret strings
pub(crate) fn deserialize_secret<'de, D>(deserializer: D) -> std::result::Result<Secret<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let s = String::deserialize(deserializer)?;
    Ok(Secret::new(s))
}

pub(crate) fn deserialize_optional_secret<'de, D>(
    deserializer: D,
) -> std::result::Result<Option<Secret<String>>, D::Error>
where
    D: Deserializer<'de>,
{
    let s = Option::<String>::deserialize(deserializer)?;
    Ok(s.map(Secret::new))
}

fn default_true() -> bool {
    true
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_timeout() -> u64 {
    30
}

fn default_log_format() -> LogFormat {
    LogFormat::Compact
}

fn default_redis_timeout_ms() -> u64 {
    200
}

fn default_redis_connect_timeout_ms() -> u64 {
    2000
}

fn default_database_backend() -> DatabaseBackend {
    DatabaseBackend::Memory
}

fn default_database_url() -> Secret<String> {
    Secret::new("postgres://localhost/shortener".to_string())
}

fn default_max_connections() -> u32 {
    10
}

fn default_min_connections() -> u32 {
    1
}

fn default_acquire_timeout_secs() -> u64 {
    5
}

fn default_geo_base_url() -> String {
    "https://ipinfo.io".to_string()
}

fn default_geo_timeout_ms() -> u64 {
    1500
}

fn default_telemetry_budget_ms() -> u64 {
    250
}

fn default_jwt_algorithm() -> String {
    "HS256".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            timeout_secs: default_timeout(),
            log_format: default_log_format(),
        }
    }
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: None,
            timeout_ms: default_redis_timeout_ms(),
            connect_timeout_ms: default_redis_connect_timeout_ms(),
        }
    }
}

impl RedisConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            backend: default_database_backend(),
            url: default_database_url(),
            max_connections: default_max_connections(),
            min_connections: default_min_connections(),
            acquire_timeout_secs: default_acquire_timeout_secs(),
            run_migrations: false,
        }
    }
}

impl Default for EnrichmentConfig {
    fn default() -> Self {
        Self {
            geo_enabled: default_true(),
            geo_base_url: default_geo_base_url(),
            geo_token: None,
            geo_timeout_ms: default_geo_timeout_ms(),
            telemetry_budget_ms: default_telemetry_budget_ms(),
        }
    }
}

impl EnrichmentConfig {
    pub fn geo_timeout(&self) -> Duration {
        Duration::from_millis(self.geo_timeout_ms)
    }

    pub fn telemetry_budget(&self) -> Duration {
        Duration::from_millis(self.telemetry_budget_ms)
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            algorithm: default_jwt_algorithm(),
            secret: None,
            public_key: None,
            issuer: None,
            audience: None,
        }
    }
}

impl AppConfig {
    /// Load from a YAML file with `SHORTENER__*` environment overrides on top
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(
                config::File::from(path.as_ref())
                    .format(config::FileFormat::Yaml)
                    .required(false),
            )
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .map_err(|e| AppError::Config(format!("Failed to read config: {}", e)))?;

        let config: Self = settings
            .try_deserialize()
            .map_err(|e| AppError::Config(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Parse configuration from YAML string
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml)
            .map_err(|e| AppError::Config(format!("Failed to parse config: {}", e)))
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        for (name, policy) in self.rate_limits.iter() {
            if policy.requests == 0 {
                return Err(AppError::Config(format!(
                    "Rate limit requests must be > 0 for {}",
                    name
                )));
            }
            if policy.window_secs == 0 {
                return Err(AppError::Config(format!(
                    "Rate limit window must be > 0 for {}",
                    name
                )));
            }
        }

        if self.cache.record_ttl_secs == 0 || self.cache.list_ttl_secs == 0 {
            return Err(AppError::Config("Cache TTLs must be > 0".to_string()));
        }

        if self.redis.timeout_ms == 0 {
            return Err(AppError::Config("Redis timeout must be > 0".to_string()));
        }

        if let Some(url) = &self.redis.url {
            let url = url.expose_secret();
            if !url.starts_with("redis://") && !url.starts_with("rediss://") {
                return Err(AppError::Config(
                    "Redis URL must start with redis:// or rediss://".to_string(),
                ));
            }
        }

        if self.enrichment.geo_enabled {
            let base = &self.enrichment.geo_base_url;
            if !base.starts_with("http://") && !base.starts_with("https://") {
                return Err(AppError::Config(
                    "Geo lookup URL must start with http:// or https://".to_string(),
                ));
            }
        }

        if self.blob.backend == BlobBackendKind::Http {
            let base = self.blob.base_url.as_deref().unwrap_or_default();
            if !base.starts_with("http://") && !base.starts_with("https://") {
                return Err(AppError::Config(
                    "Blob storage URL must start with http:// or https://".to_string(),
                ));
            }
        }

        if self.auth.algorithm.to_uppercase().starts_with("HS") && self.auth.secret.is_none() {
            return Err(AppError::Config(
                "JWT secret is required for HS256/HS384/HS512 algorithms".to_string(),
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::CacheBackendKind;
    use crate::rate_limit::types::RateLimitPolicy;
    use std::io::Write;

    const MINIMAL: &str = r#"
auth:
  secret: "test-secret"
"#;

    #[test]
    fn test_default_values() {
        let config = AppConfig::from_yaml(MINIMAL).unwrap();
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.redis.timeout_ms, 200);
        assert_eq!(config.rate_limits.read, RateLimitPolicy::new(20, 10));
        assert_eq!(config.cache.record_ttl_secs, 3600);
        assert_eq!(config.database.backend, DatabaseBackend::Memory);
        assert_eq!(config.enrichment.geo_timeout_ms, 1500);
        assert_eq!(config.enrichment.telemetry_budget_ms, 250);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_full_config() {
        let yaml = r#"
server:
  host: "127.0.0.1"
  port: 9090
  log_format: json
redis:
  url: "redis://localhost:6379"
  timeout_ms: 150
rate_limits:
  create:
    requests: 3
    window_secs: 30
cache:
  backend: memory
  list_ttl_secs: 60
database:
  backend: postgres
  url: "postgres://app:pw@db/shortener"
blob:
  backend: http
  bucket: "qr-codes"
  base_url: "https://project.supabase.co"
enrichment:
  geo_enabled: false
auth:
  secret: "test-secret"
  issuer: "https://auth.example.com"
"#;

        let config = AppConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.server.port, 9090);
        assert_eq!(config.server.log_format, LogFormat::Json);
        assert_eq!(config.redis.timeout(), Duration::from_millis(150));
        assert_eq!(config.rate_limits.create, RateLimitPolicy::new(3, 30));
        // Unspecified categories keep their defaults
        assert_eq!(config.rate_limits.auth, RateLimitPolicy::new(5, 300));
        assert_eq!(config.cache.backend, CacheBackendKind::Memory);
        assert_eq!(config.cache.list_ttl_secs, 60);
        assert_eq!(config.database.backend, DatabaseBackend::Postgres);
        assert_eq!(config.blob.backend, BlobBackendKind::Http);
        assert_eq!(config.blob.bucket, "qr-codes");
        assert_eq!(config.auth.issuer.as_deref(), Some("https://auth.example.com"));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_zero_limit() {
        let mut config = AppConfig::from_yaml(MINIMAL).unwrap();
        config.rate_limits.delete = RateLimitPolicy::new(0, 60);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_missing_jwt_secret() {
        let config = AppConfig::from_yaml("server: {}").unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_http_blob_needs_base_url() {
        let mut config = AppConfig::from_yaml(MINIMAL).unwrap();
        config.blob.backend = BlobBackendKind::Http;
        assert!(config.validate().is_err());

        config.blob.base_url = Some("https://project.supabase.co".to_string());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_bad_geo_url() {
        let mut config = AppConfig::from_yaml(MINIMAL).unwrap();
        config.enrichment.geo_base_url = "ipinfo.io".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        writeln!(
            file,
            "server:\n  port: 7070\nauth:\n  secret: \"file-secret\"\ncache:\n  backend: disabled"
        )
        .unwrap();

        let config = AppConfig::load(file.path()).unwrap();
        assert_eq!(config.server.port, 7070);
        assert_eq!(config.cache.backend, CacheBackendKind::Disabled);
        assert_eq!(
            config.auth.secret.as_ref().map(|s| s.expose_secret().as_str()),
            Some("file-secret")
        );
    }
}
