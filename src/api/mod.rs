//! HTTP surface
//!
//! `GET /:code` redirects; everything under `/api` needs a bearer identity and
//! passes the coarse API-wide read check first.

pub mod handlers;

use crate::metrics::{metrics_handler, track_requests};
use crate::observability::request_id_middleware;
use crate::rate_limit::api_read_guard;
use crate::AppState;
use axum::{middleware, routing::get, Router};
use std::sync::Arc;
use std::time::Duration;
use tower_http::trace::TraceLayer;

pub const HEALTH_PATH: &str = "/health";
pub const METRICS_PATH: &str = "/metrics";
pub const API_PREFIX: &str = "/api";

/// First path segments the fixed routes claim ahead of `/:code`
pub fn reserved_codes() -> Vec<String> {
    [HEALTH_PATH, METRICS_PATH, API_PREFIX]
        .iter()
        .map(|path| path.trim_start_matches('/').to_string())
        .collect()
}

pub fn router(state: Arc<AppState>) -> Router {
    let api = Router::new()
        .route("/urls", get(handlers::list_urls).post(handlers::create_url))
        .route("/urls/:id", get(handlers::get_url).delete(handlers::delete_url))
        .route("/urls/:id/stats", get(handlers::url_stats))
        .route("/stats", get(handlers::owner_stats))
        .route_layer(middleware::from_fn_with_state(state.clone(), api_read_guard));

    let timeout = Duration::from_secs(state.config.server.timeout_secs);

    Router::new()
        .route(HEALTH_PATH, get(handlers::health))
        .route(METRICS_PATH, get(metrics_handler))
        .route("/:code", get(handlers::redirect))
        .nest(API_PREFIX, api)
        .layer(middleware::from_fn(track_requests))
        .layer(tower_http::timeout::TimeoutLayer::new(timeout))
        .layer(TraceLayer::new_for_http())
        .layer(middleware::from_fn(request_id_middleware))
        .with_state(state)
}
