use crate::error::{AppError, Result};
use axum::{
    extract::{MatchedPath, Request, State},
    http::{header, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info};

use crate::AppState;

/// Metrics service for collecting and exposing Prometheus metrics
#[derive(Clone)]
pub struct MetricsService {
    handle: Arc<PrometheusHandle>,
}

impl MetricsService {
    /// Install the global Prometheus recorder
    pub fn new() -> Result<Self> {
        let handle = PrometheusBuilder::new().install_recorder().map_err(|e| {
            AppError::Internal(format!("Failed to install metrics recorder: {}", e))
        })?;

        Self::register_metrics();

        info!("Metrics service initialized successfully");

        Ok(Self {
            handle: Arc::new(handle),
        })
    }

    /// A handle that is not installed as the global recorder. Renders nothing
    /// recorded through the `metrics` macros; used where a recorder may already exist.
    pub fn detached() -> Self {
        let recorder = PrometheusBuilder::new().build_recorder();
        Self {
            handle: Arc::new(recorder.handle()),
        }
    }

    fn register_metrics() {
        describe_counter!(
            "shortener_requests_total",
            "Total number of HTTP requests received"
        );
        describe_histogram!(
            "shortener_request_duration_seconds",
            "HTTP request latencies in seconds"
        );

        describe_counter!(
            "shortener_rate_limit_decisions_total",
            "Rate limiter decisions by action and outcome"
        );
        describe_counter!(
            "shortener_rate_limit_fallback_total",
            "Times the rate limiter answered from the in-process fallback"
        );
        describe_gauge!(
            "shortener_rate_limit_degraded",
            "Whether the rate limiter is running on the in-process fallback (1 = degraded)"
        );

        describe_counter!(
            "shortener_cache_lookups_total",
            "Cache lookups by key space and result"
        );
        describe_counter!(
            "shortener_cache_errors_total",
            "Cache backend failures by operation"
        );

        describe_counter!(
            "shortener_redirects_total",
            "Redirect resolutions by outcome"
        );
        describe_histogram!(
            "shortener_resolve_duration_seconds",
            "Time spent resolving a short code, telemetry included"
        );
        describe_counter!(
            "shortener_telemetry_failures_total",
            "Best-effort enrichment and click-recording failures by step"
        );
        describe_counter!(
            "shortener_short_code_collisions_total",
            "Generated short codes that collided with an existing record"
        );

        debug!("All metrics registered with descriptions");
    }

    /// Render metrics in Prometheus format
    pub fn render(&self) -> String {
        self.handle.render()
    }
}

/// Metrics endpoint handler
pub async fn metrics_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        state.metrics.render(),
    )
}

/// Middleware recording a counter and latency for every request, labelled by route template
pub async fn track_requests(request: Request, next: Next) -> Response {
    let method = request.method().to_string();
    let route = request
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_string())
        .unwrap_or_else(|| "unmatched".to_string());

    let timer = Timer::new(method, route);
    let response = next.run(request).await;
    timer.record(response.status().as_u16());
    response
}

/// Record a request metric
pub fn record_request(method: &str, route: &str, status: u16, duration: f64) {
    let labels = [
        ("method", method.to_string()),
        ("route", route.to_string()),
        ("status", status.to_string()),
    ];

    counter!("shortener_requests_total", &labels).increment(1);
    histogram!("shortener_request_duration_seconds", &labels).record(duration);
}

/// Record a rate limiter decision
pub fn record_rate_limit_decision(action: &str, admitted: bool) {
    let labels = [
        ("action", action.to_string()),
        (
            "outcome",
            if admitted { "admitted" } else { "denied" }.to_string(),
        ),
    ];
    counter!("shortener_rate_limit_decisions_total", &labels).increment(1);
}

/// Record a fallback to the in-process limiter
pub fn record_rate_limit_fallback(reason: &str) {
    let labels = [("reason", reason.to_string())];
    counter!("shortener_rate_limit_fallback_total", &labels).increment(1);
}

pub fn record_rate_limit_degraded(degraded: bool) {
    gauge!("shortener_rate_limit_degraded").set(if degraded { 1.0 } else { 0.0 });
}

/// Record a cache lookup against one key space (`url`, `user_urls`, `short_url`)
pub fn record_cache_lookup(keyspace: &str, hit: bool) {
    let labels = [
        ("keyspace", keyspace.to_string()),
        ("result", if hit { "hit" } else { "miss" }.to_string()),
    ];
    counter!("shortener_cache_lookups_total", &labels).increment(1);
}

pub fn record_cache_error(operation: &str) {
    let labels = [("operation", operation.to_string())];
    counter!("shortener_cache_errors_total", &labels).increment(1);
}

/// Record a redirect outcome (`found`, `not_found`, `rate_limited`)
pub fn record_redirect(outcome: &str) {
    let labels = [("outcome", outcome.to_string())];
    counter!("shortener_redirects_total", &labels).increment(1);
}

pub fn record_resolve_duration(duration: Duration) {
    histogram!("shortener_resolve_duration_seconds").record(duration.as_secs_f64());
}

/// Record a swallowed telemetry failure (`geo`, `click_record`, ...)
pub fn record_telemetry_failure(step: &str) {
    let labels = [("step", step.to_string())];
    counter!("shortener_telemetry_failures_total", &labels).increment(1);
}

pub fn record_short_code_collision() {
    counter!("shortener_short_code_collisions_total").increment(1);
}

/// Timer for measuring request duration
pub struct Timer {
    start: Instant,
    method: String,
    route: String,
}

impl Timer {
    /// Start a new timer for a request
    pub fn new(method: String, route: String) -> Self {
        Self {
            start: Instant::now(),
            method,
            route,
        }
    }

    /// Record the elapsed time with the given status code
    pub fn record(self, status: u16) {
        let duration = self.start.elapsed().as_secs_f64();
        record_request(&self.method, &self.route, status, duration);
    }

    /// Get the elapsed time in seconds
    pub fn elapsed(&self) -> f64 {
        self.start.elapsed().as_secs_f64()
    }
}
