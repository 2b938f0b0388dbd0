//! Request orchestration: rate limiting, cache, durable store and telemetry
//! composed into the redirect, mutation and analytics paths.

pub mod analytics;
pub mod links;
pub mod redirect;
pub mod shortcode;

pub use analytics::{AnalyticsService, CountBucket, OwnerStats, UrlStats};
pub use links::{CreateLink, LinkService, QrImage};
pub use redirect::{RedirectService, Resolution};

use crate::metrics;
use std::fmt::Display;
use std::future::Future;
use std::time::Duration;
use tracing::warn;

/// Run a best-effort step within `budget`. Failures and timeouts are logged,
/// counted and turned into `None`; the caller carries on.
pub async fn attempt<T, E, F>(step: &'static str, budget: Duration, future: F) -> Option<T>
where
    F: Future<Output = std::result::Result<T, E>>,
    E: Display,
{
    match tokio::time::timeout(budget, future).await {
        Ok(Ok(value)) => Some(value),
        Ok(Err(err)) => {
            warn!(step, error = %err, "Best-effort step failed");
            metrics::record_telemetry_failure(step);
            None
        }
        Err(_) => {
            warn!(step, budget_ms = budget.as_millis() as u64, "Best-effort step timed out");
            metrics::record_telemetry_failure(step);
            None
        }
    }
}
