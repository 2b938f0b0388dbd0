//! Caller identity for rate limiting
//!
//! Server-side: the client address as seen through proxies. Client-side (a CLI
//! or other non-browser caller): a random pseudo-session token persisted between
//! runs. Neither path can fail; worst case is the literal `"unknown"`.

use async_trait::async_trait;
use axum::{
    extract::{ConnectInfo, FromRequestParts},
    http::{header, request::Parts, HeaderMap},
};
use rand::{distributions::Alphanumeric, Rng};
use std::convert::Infallible;
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use tokio::sync::RwLock;
use tracing::{debug, warn};

pub const UNKNOWN_IDENTIFIER: &str = "unknown";
pub const SERVER_IDENTIFIER: &str = "server";

const SESSION_TOKEN_LEN: usize = 16;

/// First `x-forwarded-for` hop, then `x-real-ip`, then the peer address
pub fn identifier_from_request(headers: &HeaderMap, peer: Option<SocketAddr>) -> String {
    let forwarded = headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty());

    if let Some(ip) = forwarded {
        return ip.to_string();
    }

    let real_ip = headers
        .get("x-real-ip")
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty());

    if let Some(ip) = real_ip {
        return ip.to_string();
    }

    peer.map(|addr| addr.ip().to_string())
        .unwrap_or_else(|| UNKNOWN_IDENTIFIER.to_string())
}

/// Identifier for work that is not tied to any request
pub fn identifier_without_request() -> String {
    SERVER_IDENTIFIER.to_string()
}

/// Whoever is following a short link
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Visitor {
    /// Rate limit identity
    pub identifier: String,
    /// Parsed client address, when the identifier is one
    pub ip: Option<IpAddr>,
    pub user_agent: Option<String>,
}

impl Visitor {
    pub fn from_headers(headers: &HeaderMap, peer: Option<SocketAddr>) -> Self {
        let identifier = identifier_from_request(headers, peer);
        let ip = identifier.parse::<IpAddr>().ok();
        let user_agent = headers
            .get(header::USER_AGENT)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        Self {
            identifier,
            ip,
            user_agent,
        }
    }

    /// A visitor with no request context
    pub fn server() -> Self {
        Self {
            identifier: identifier_without_request(),
            ip: None,
            user_agent: None,
        }
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for Visitor
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let peer = parts
            .extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ci| ci.0);
        Ok(Visitor::from_headers(&parts.headers, peer))
    }
}

/// Persistence for the client-side pseudo-session token
#[async_trait]
pub trait SessionTokenStore: Send + Sync {
    async fn load(&self) -> std::io::Result<Option<String>>;

    async fn save(&self, token: &str) -> std::io::Result<()>;
}

/// Token kept in a file between runs
#[derive(Debug, Clone)]
pub struct FileTokenStore {
    path: PathBuf,
}

impl FileTokenStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl SessionTokenStore for FileTokenStore {
    async fn load(&self) -> std::io::Result<Option<String>> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(contents) => {
                let token = contents.trim();
                Ok((!token.is_empty()).then(|| token.to_string()))
            }
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err),
        }
    }

    async fn save(&self, token: &str) -> std::io::Result<()> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&self.path, token).await
    }
}

#[derive(Debug, Default)]
pub struct MemoryTokenStore {
    token: RwLock<Option<String>>,
}

impl MemoryTokenStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionTokenStore for MemoryTokenStore {
    async fn load(&self) -> std::io::Result<Option<String>> {
        Ok(self.token.read().await.clone())
    }

    async fn save(&self, token: &str) -> std::io::Result<()> {
        *self.token.write().await = Some(token.to_string());
        Ok(())
    }
}

/// Client-side identity backed by a persisted pseudo-session token
pub struct ClientIdentity<S> {
    store: S,
}

impl<S: SessionTokenStore> ClientIdentity<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// `client:<token>`, generating and persisting the token on first use.
    /// Storage errors are logged; the caller still gets an identifier.
    pub async fn identifier(&self) -> String {
        let existing = match self.store.load().await {
            Ok(token) => token,
            Err(err) => {
                warn!(error = %err, "Could not read session token");
                None
            }
        };

        let token = match existing {
            Some(token) => token,
            None => {
                let token = generate_session_token();
                if let Err(err) = self.store.save(&token).await {
                    warn!(error = %err, "Could not persist session token");
                }
                debug!("Generated new session token");
                token
            }
        };

        format!("client:{}", token)
    }
}

fn generate_session_token() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(SESSION_TOKEN_LEN)
        .map(char::from)
        .collect()
}
