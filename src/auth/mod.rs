pub mod jwt;

use crate::error::{AppError, Result};
use crate::AppState;
use async_trait::async_trait;
use axum::{
    extract::{FromRef, FromRequestParts},
    http::{request::Parts, HeaderMap},
};
use std::sync::Arc;
use tracing::debug;

pub use jwt::JwtIdentityProvider;

/// Authenticated caller as reported by the identity provider
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    /// Opaque owner id
    pub user_id: String,
}

/// Opaque identity provider: turns request headers into an owner id
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    async fn authenticate(&self, headers: &HeaderMap) -> Result<Identity>;
}

/// Extractor for handlers that need an owner. Rejects with 401.
#[derive(Debug, Clone)]
pub struct AuthUser(pub Identity);

impl AuthUser {
    pub fn user_id(&self) -> &str {
        &self.0.user_id
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for AuthUser
where
    Arc<AppState>: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self> {
        let app = Arc::<AppState>::from_ref(state);
        let identity = app.identity.authenticate(&parts.headers).await.map_err(|err| {
            debug!(error = %err, "Authentication failed");
            err
        })?;
        Ok(AuthUser(identity))
    }
}
