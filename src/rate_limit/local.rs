use super::types::{now_millis, RateLimitDecision, RateLimitKey, RateLimitPolicy};
use dashmap::DashMap;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// Entries untouched for this long are dropped by the sweep
pub const IDLE_EXPIRY: Duration = Duration::from_secs(3600);

/// How often the sweep runs
pub const SWEEP_INTERVAL: Duration = Duration::from_secs(3600);

#[derive(Debug, Default)]
struct WindowEntry {
    /// Admitted-request timestamps (ms), oldest first
    timestamps: VecDeque<i64>,
    /// Last time this key was touched (ms)
    last_seen: i64,
}

/// Local (in-memory) sliding-window rate limiter.
///
/// Single-process only: counters are not shared between instances. Each key's
/// insert/prune/count runs under that key's shard lock, so concurrent handlers
/// never interleave on one window.
#[derive(Debug, Default)]
pub struct LocalRateLimiter {
    windows: DashMap<String, WindowEntry>,
}

impl LocalRateLimiter {
    /// Create a new local rate limiter
    pub fn new() -> Self {
        Self {
            windows: DashMap::new(),
        }
    }

    /// Check if a request is allowed
    pub fn check_rate_limit(&self, key: &RateLimitKey, policy: &RateLimitPolicy) -> RateLimitDecision {
        self.check_at(key, policy, now_millis())
    }

    /// Same as [`check_rate_limit`](Self::check_rate_limit) with an explicit clock reading
    pub fn check_at(
        &self,
        key: &RateLimitKey,
        policy: &RateLimitPolicy,
        now_ms: i64,
    ) -> RateLimitDecision {
        let storage_key = key.storage_key();
        let window_start = now_ms - policy.window_millis();

        let count = {
            let mut entry = self.windows.entry(storage_key.clone()).or_default();
            entry.timestamps.push_back(now_ms);
            while entry
                .timestamps
                .front()
                .is_some_and(|ts| *ts < window_start)
            {
                entry.timestamps.pop_front();
            }
            entry.last_seen = now_ms;
            entry.timestamps.len() as u64
        };

        let decision = RateLimitDecision::from_count(count, policy, now_ms);
        debug!(
            key = %storage_key,
            count,
            admitted = decision.admitted,
            "Local sliding window check"
        );
        decision
    }

    /// Drop windows untouched for longer than `max_idle`. Returns how many were removed.
    pub fn sweep_idle(&self, now_ms: i64, max_idle: Duration) -> usize {
        let cutoff = now_ms - max_idle.as_millis() as i64;
        let before = self.windows.len();
        self.windows.retain(|_, entry| entry.last_seen >= cutoff);
        before.saturating_sub(self.windows.len())
    }

    /// Spawn the periodic housekeeping sweep
    pub fn spawn_sweeper(self: &Arc<Self>, every: Duration, max_idle: Duration) -> JoinHandle<()> {
        let limiter = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            // The first tick completes immediately.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let removed = limiter.sweep_idle(now_millis(), max_idle);
                if removed > 0 {
                    info!(removed, "Swept idle local rate limit windows");
                }
            }
        })
    }

    /// Get the number of active windows (for testing/monitoring)
    pub fn active_windows(&self) -> usize {
        self.windows.len()
    }
}
