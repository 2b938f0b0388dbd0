use async_trait::async_trait;
use moka::future::Cache;
use secrecy::{ExposeSecret, Secret};
use serde::Deserialize;
use std::net::IpAddr;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

const MEMO_CAPACITY: u64 = 10_000;
const MEMO_TTL: Duration = Duration::from_secs(3600);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeoInfo {
    pub city: String,
    pub country: String,
}

#[derive(Debug, Error)]
pub enum EnrichError {
    #[error("geo lookup request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("geo lookup returned status {0}")]
    Status(u16),
}

/// Where a visitor is, as far as an address can tell
#[async_trait]
pub trait GeoLookup: Send + Sync {
    /// `Ok(None)` when the address cannot be located (private ranges, empty answers)
    async fn locate(&self, ip: IpAddr) -> Result<Option<GeoInfo>, EnrichError>;
}

/// Geo lookups turned off
#[derive(Debug, Clone, Copy, Default)]
pub struct DisabledGeo;

#[async_trait]
impl GeoLookup for DisabledGeo {
    async fn locate(&self, _ip: IpAddr) -> Result<Option<GeoInfo>, EnrichError> {
        Ok(None)
    }
}

#[derive(Deserialize)]
struct IpInfoResponse {
    city: Option<String>,
    country: Option<String>,
}

/// ipinfo-style HTTP lookup (`{base_url}/{ip}/json`), memoized per address
pub struct HttpGeoLocator {
    client: reqwest::Client,
    base_url: String,
    token: Option<Secret<String>>,
    memo: Cache<IpAddr, Option<GeoInfo>>,
}

impl HttpGeoLocator {
    pub fn new(
        base_url: impl Into<String>,
        token: Option<Secret<String>>,
        timeout: Duration,
    ) -> Result<Self, EnrichError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        let memo = Cache::builder()
            .max_capacity(MEMO_CAPACITY)
            .time_to_live(MEMO_TTL)
            .build();

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token,
            memo,
        })
    }

    async fn fetch(&self, ip: IpAddr) -> Result<Option<GeoInfo>, EnrichError> {
        let url = format!("{}/{}/json", self.base_url, ip);
        let mut request = self.client.get(&url);
        if let Some(token) = &self.token {
            request = request.query(&[("token", token.expose_secret())]);
        }

        let response = request.send().await?;
        if !response.status().is_success() {
            return Err(EnrichError::Status(response.status().as_u16()));
        }

        let body: IpInfoResponse = response.json().await?;
        let city = body.city.filter(|s| !s.is_empty());
        let country = body.country.filter(|s| !s.is_empty());

        if city.is_none() && country.is_none() {
            debug!(%ip, "Geo lookup returned no location");
            return Ok(None);
        }

        Ok(Some(GeoInfo {
            city: city.unwrap_or_else(|| super::UNKNOWN.to_string()),
            country: country.unwrap_or_else(|| super::UNKNOWN.to_string()),
        }))
    }
}

#[async_trait]
impl GeoLookup for HttpGeoLocator {
    async fn locate(&self, ip: IpAddr) -> Result<Option<GeoInfo>, EnrichError> {
        if is_private(ip) {
            return Ok(None);
        }

        if let Some(known) = self.memo.get(&ip).await {
            return Ok(known);
        }

        // Failures are not memoized; the next visit retries.
        let result = self.fetch(ip).await?;
        self.memo.insert(ip, result.clone()).await;
        Ok(result)
    }
}

/// Addresses never sent to a public lookup: loopback, link-local, private, unspecified
pub fn is_private(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(addr) => {
            addr.is_loopback()
                || addr.is_link_local()
                || addr.is_unspecified()
                || addr.is_broadcast()
                || addr.is_private()
        }
        IpAddr::V6(addr) => {
            if let Some(mapped) = addr.to_ipv4_mapped() {
                return is_private(IpAddr::V4(mapped));
            }
            addr.is_loopback()
                || addr.is_unspecified()
                // fe80::/10 link-local
                || (addr.segments()[0] & 0xffc0) == 0xfe80
                // fc00::/7 unique-local
                || (addr.segments()[0] & 0xfe00) == 0xfc00
        }
    }
}
