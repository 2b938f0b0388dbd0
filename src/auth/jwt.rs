use crate::config::AuthConfig;
use crate::error::{AppError, Result};
use async_trait::async_trait;
use axum::http::{header, HeaderMap};
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use secrecy::ExposeSecret;
use serde::{Deserialize, Serialize};

use super::{Identity, IdentityProvider};

/// JWT claims structure
#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    /// Subject (owner id)
    pub sub: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub iss: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub aud: Option<String>,
    /// Expiration time (Unix timestamp)
    pub exp: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub iat: Option<usize>,
}

/// Validates bearer tokens issued by the external identity service
pub struct JwtIdentityProvider {
    decoding_key: DecodingKey,
    validation: Validation,
}

impl JwtIdentityProvider {
    pub fn new(config: &AuthConfig) -> Result<Self> {
        let algorithm = parse_algorithm(&config.algorithm)?;

        let decoding_key = match algorithm {
            Algorithm::HS256 | Algorithm::HS384 | Algorithm::HS512 => {
                let secret = config.secret.as_ref().ok_or_else(|| {
                    AppError::Config(
                        "JWT secret is required for HS256/HS384/HS512 algorithms".to_string(),
                    )
                })?;
                DecodingKey::from_secret(secret.expose_secret().as_bytes())
            }
            _ => {
                let public_key = config.public_key.as_ref().ok_or_else(|| {
                    AppError::Config(
                        "JWT public key is required for RS256/RS384/RS512 algorithms".to_string(),
                    )
                })?;
                DecodingKey::from_rsa_pem(public_key.as_bytes())
                    .map_err(|e| AppError::Config(format!("Invalid RSA public key: {}", e)))?
            }
        };

        let mut validation = Validation::new(algorithm);
        if let Some(issuer) = &config.issuer {
            validation.set_issuer(&[issuer]);
        }
        if let Some(audience) = &config.audience {
            validation.set_audience(&[audience]);
        }
        validation.validate_exp = true;

        Ok(Self {
            decoding_key,
            validation,
        })
    }
}

#[async_trait]
impl IdentityProvider for JwtIdentityProvider {
    async fn authenticate(&self, headers: &HeaderMap) -> Result<Identity> {
        let token = extract_bearer(headers)?;

        let token_data = decode::<Claims>(token, &self.decoding_key, &self.validation)
            .map_err(|e| AppError::InvalidToken(format!("Token validation failed: {}", e)))?;

        if token_data.claims.sub.is_empty() {
            return Err(AppError::InvalidToken("Token has no subject".to_string()));
        }

        Ok(Identity {
            user_id: token_data.claims.sub,
        })
    }
}

fn extract_bearer(headers: &HeaderMap) -> Result<&str> {
    let auth_str = headers
        .get(header::AUTHORIZATION)
        .ok_or(AppError::MissingCredentials)?
        .to_str()
        .map_err(|_| AppError::InvalidToken("Invalid authorization header".to_string()))?;

    auth_str
        .strip_prefix("Bearer ")
        .or_else(|| auth_str.strip_prefix("bearer "))
        .ok_or_else(|| {
            AppError::InvalidToken("Authorization header must start with 'Bearer '".to_string())
        })
}

fn parse_algorithm(algo: &str) -> Result<Algorithm> {
    match algo.to_uppercase().as_str() {
        "HS256" => Ok(Algorithm::HS256),
        "HS384" => Ok(Algorithm::HS384),
        "HS512" => Ok(Algorithm::HS512),
        "RS256" => Ok(Algorithm::RS256),
        "RS384" => Ok(Algorithm::RS384),
        "RS512" => Ok(Algorithm::RS512),
        _ => Err(AppError::Config(format!("Unsupported algorithm: {}", algo))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::{encode, EncodingKey, Header};
    use secrecy::Secret;

    fn config(secret: Option<&str>) -> AuthConfig {
        AuthConfig {
            algorithm: "HS256".to_string(),
            secret: secret.map(|s| Secret::new(s.to_string())),
            public_key: None,
            issuer: None,
            audience: None,
        }
    }

    fn token(secret: &str, sub: &str, exp_offset: chrono::Duration) -> String {
        let claims = Claims {
            sub: sub.to_string(),
            iss: None,
            aud: None,
            exp: (chrono::Utc::now() + exp_offset).timestamp() as usize,
            iat: Some(chrono::Utc::now().timestamp() as usize),
        };
        encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(secret.as_bytes()),
        )
        .unwrap()
    }

    fn bearer(token: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, format!("Bearer {}", token).parse().unwrap());
        headers
    }

    #[test]
    fn test_missing_secret_is_config_error() {
        assert!(matches!(
            JwtIdentityProvider::new(&config(None)),
            Err(AppError::Config(_))
        ));
    }

    #[test]
    fn test_unsupported_algorithm() {
        let mut cfg = config(Some("s"));
        cfg.algorithm = "none".to_string();
        assert!(JwtIdentityProvider::new(&cfg).is_err());
    }

    #[tokio::test]
    async fn test_valid_token_yields_subject() {
        let provider = JwtIdentityProvider::new(&config(Some("test-secret"))).unwrap();
        let headers = bearer(&token("test-secret", "user-a", chrono::Duration::hours(1)));

        let identity = provider.authenticate(&headers).await.unwrap();
        assert_eq!(identity.user_id, "user-a");
    }

    #[tokio::test]
    async fn test_expired_token_rejected() {
        let provider = JwtIdentityProvider::new(&config(Some("test-secret"))).unwrap();
        let headers = bearer(&token("test-secret", "user-a", chrono::Duration::hours(-1)));

        assert!(matches!(
            provider.authenticate(&headers).await,
            Err(AppError::InvalidToken(_))
        ));
    }

    #[tokio::test]
    async fn test_wrong_secret_rejected() {
        let provider = JwtIdentityProvider::new(&config(Some("test-secret"))).unwrap();
        let headers = bearer(&token("other-secret", "user-a", chrono::Duration::hours(1)));
        assert!(provider.authenticate(&headers).await.is_err());
    }

    #[tokio::test]
    async fn test_missing_and_malformed_header() {
        let provider = JwtIdentityProvider::new(&config(Some("test-secret"))).unwrap();

        assert!(matches!(
            provider.authenticate(&HeaderMap::new()).await,
            Err(AppError::MissingCredentials)
        ));

        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, "Basic dXNlcjpwYXNz".parse().unwrap());
        assert!(matches!(
            provider.authenticate(&headers).await,
            Err(AppError::InvalidToken(_))
        ));
    }
}
