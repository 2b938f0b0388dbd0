use super::types::{RateLimitAction, RateLimitDecision};
use crate::identity::identifier_from_request;
use crate::AppState;
use axum::{
    extract::{ConnectInfo, Request, State},
    http::{HeaderMap, HeaderValue, Method},
    middleware::Next,
    response::{IntoResponse, Response},
};
use chrono::{DateTime, Utc};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::debug;

/// `X-RateLimit-*` headers; the reset is a unix timestamp in seconds
pub fn rate_limit_headers(limit: u32, remaining: u32, reset_at: DateTime<Utc>) -> HeaderMap {
    let mut headers = HeaderMap::new();

    headers.insert("X-RateLimit-Limit", HeaderValue::from(limit));
    headers.insert("X-RateLimit-Remaining", HeaderValue::from(remaining));
    headers.insert("X-RateLimit-Reset", HeaderValue::from(reset_at.timestamp()));

    headers
}

/// Add rate limit headers to successful responses
pub fn add_rate_limit_headers(mut response: Response, decision: &RateLimitDecision) -> Response {
    response.headers_mut().extend(rate_limit_headers(
        decision.limit,
        decision.remaining,
        decision.reset_at,
    ));
    response
}

/// Coarse API-wide read check, applied to every `GET` under `/api` before the
/// per-operation limit. Counted under its own key.
pub async fn api_read_guard(
    State(state): State<Arc<AppState>>,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    request: Request,
    next: Next,
) -> Response {
    if request.method() != Method::GET {
        return next.run(request).await;
    }

    let identifier = identifier_from_request(request.headers(), connect_info.map(|ci| ci.0));
    match state
        .limiter
        .check(RateLimitAction::ApiRead, &identifier)
        .await
    {
        Ok(decision) => {
            debug!(
                identifier = %identifier,
                remaining = decision.remaining,
                "API read check passed"
            );
            add_rate_limit_headers(next.run(request).await, &decision)
        }
        Err(err) => err.into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rate_limit::types::RateLimitPolicy;
    use axum::http::StatusCode;

    #[test]
    fn test_rate_limit_headers() {
        let reset_at = DateTime::<Utc>::from_timestamp(1_700_000_060, 0).unwrap();
        let headers = rate_limit_headers(100, 42, reset_at);

        assert_eq!(headers.get("X-RateLimit-Limit").unwrap(), "100");
        assert_eq!(headers.get("X-RateLimit-Remaining").unwrap(), "42");
        assert_eq!(headers.get("X-RateLimit-Reset").unwrap(), "1700000060");
    }

    #[test]
    fn test_add_rate_limit_headers() {
        let decision = RateLimitDecision::from_count(3, &RateLimitPolicy::new(20, 10), 1_700_000_000_000);
        let response = add_rate_limit_headers(StatusCode::OK.into_response(), &decision);

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers().get("X-RateLimit-Remaining").unwrap(), "17");
        assert_eq!(response.headers().get("X-RateLimit-Reset").unwrap(), "1700000010");
    }
}
