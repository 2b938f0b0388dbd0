use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

use crate::error::AppError;

/// Action being rate limited. Each action owns an independent counter per identifier.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum RateLimitAction {
    Login,
    Signup,
    PasswordReset,
    Redirect,
    ListUrls,
    GetUrl,
    UrlStats,
    /// Coarse API-wide read check, counted separately from the per-operation reads
    ApiRead,
    CreateUrl,
    DeleteUrl,
}

/// Policy category an action draws its limit from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionCategory {
    Auth,
    Read,
    ReadCoarse,
    Create,
    Delete,
}

impl RateLimitAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            RateLimitAction::Login => "login",
            RateLimitAction::Signup => "signup",
            RateLimitAction::PasswordReset => "password-reset",
            RateLimitAction::Redirect => "url-redirect",
            RateLimitAction::ListUrls => "url-list",
            RateLimitAction::GetUrl => "url-get",
            RateLimitAction::UrlStats => "url-stats",
            RateLimitAction::ApiRead => "api-read",
            RateLimitAction::CreateUrl => "url-create",
            RateLimitAction::DeleteUrl => "url-delete",
        }
    }

    pub fn category(&self) -> ActionCategory {
        match self {
            RateLimitAction::Login | RateLimitAction::Signup | RateLimitAction::PasswordReset => {
                ActionCategory::Auth
            }
            RateLimitAction::Redirect
            | RateLimitAction::ListUrls
            | RateLimitAction::GetUrl
            | RateLimitAction::UrlStats => ActionCategory::Read,
            RateLimitAction::ApiRead => ActionCategory::ReadCoarse,
            RateLimitAction::CreateUrl => ActionCategory::Create,
            RateLimitAction::DeleteUrl => ActionCategory::Delete,
        }
    }
}

impl fmt::Display for RateLimitAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Limit and trailing window for one category
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct RateLimitPolicy {
    /// Maximum number of requests allowed in the window
    pub requests: u32,
    /// Length of the trailing window (in seconds)
    pub window_secs: u64,
}

impl RateLimitPolicy {
    pub const fn new(requests: u32, window_secs: u64) -> Self {
        Self {
            requests,
            window_secs,
        }
    }

    /// Get the window as a Duration
    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs)
    }

    pub fn window_millis(&self) -> i64 {
        (self.window_secs as i64).saturating_mul(1000)
    }
}

/// Per-category policies
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RateLimitPolicies {
    #[serde(default = "default_auth_policy")]
    pub auth: RateLimitPolicy,
    #[serde(default = "default_read_policy")]
    pub read: RateLimitPolicy,
    #[serde(default = "default_read_coarse_policy")]
    pub read_coarse: RateLimitPolicy,
    #[serde(default = "default_create_policy")]
    pub create: RateLimitPolicy,
    #[serde(default = "default_delete_policy")]
    pub delete: RateLimitPolicy,
}

fn default_auth_policy() -> RateLimitPolicy {
    RateLimitPolicy::new(5, 300)
}

fn default_read_policy() -> RateLimitPolicy {
    RateLimitPolicy::new(20, 10)
}

fn default_read_coarse_policy() -> RateLimitPolicy {
    RateLimitPolicy::new(100, 60)
}

fn default_create_policy() -> RateLimitPolicy {
    RateLimitPolicy::new(10, 60)
}

fn default_delete_policy() -> RateLimitPolicy {
    RateLimitPolicy::new(10, 60)
}

impl Default for RateLimitPolicies {
    fn default() -> Self {
        Self {
            auth: default_auth_policy(),
            read: default_read_policy(),
            read_coarse: default_read_coarse_policy(),
            create: default_create_policy(),
            delete: default_delete_policy(),
        }
    }
}

impl RateLimitPolicies {
    pub fn for_action(&self, action: RateLimitAction) -> RateLimitPolicy {
        match action.category() {
            ActionCategory::Auth => self.auth,
            ActionCategory::Read => self.read,
            ActionCategory::ReadCoarse => self.read_coarse,
            ActionCategory::Create => self.create,
            ActionCategory::Delete => self.delete,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&'static str, &RateLimitPolicy)> {
        [
            ("auth", &self.auth),
            ("read", &self.read),
            ("read_coarse", &self.read_coarse),
            ("create", &self.create),
            ("delete", &self.delete),
        ]
        .into_iter()
    }
}

/// Outcome of a single admit call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitDecision {
    /// Whether the request is admitted
    pub admitted: bool,
    /// Remaining requests in the current window
    pub remaining: u32,
    /// Total limit
    pub limit: u32,
    /// When the window measured from this request ends
    pub reset_at: DateTime<Utc>,
}

impl RateLimitDecision {
    /// Build a decision from the surviving count after insert and prune
    pub fn from_count(count: u64, policy: &RateLimitPolicy, now_ms: i64) -> Self {
        let limit = policy.requests;
        let reset_ms = now_ms.saturating_add(policy.window_millis());

        Self {
            admitted: count <= u64::from(limit),
            remaining: u64::from(limit).saturating_sub(count) as u32,
            limit,
            reset_at: DateTime::<Utc>::from_timestamp_millis(reset_ms)
                .unwrap_or_else(|| Utc::now() + ChronoDuration::seconds(policy.window_secs as i64)),
        }
    }

    /// Seconds until the window resets, at least one
    pub fn retry_after_secs(&self) -> u64 {
        let millis = (self.reset_at - Utc::now()).num_milliseconds().max(0) as u64;
        millis.div_ceil(1000).max(1)
    }

    /// Turn a denial into a `RateLimited` error
    pub fn into_result(self) -> Result<Self, AppError> {
        if self.admitted {
            Ok(self)
        } else {
            Err(AppError::RateLimited {
                limit: self.limit,
                retry_after_secs: self.retry_after_secs(),
                reset_at: self.reset_at,
            })
        }
    }
}

/// Rate limit key components
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RateLimitKey {
    /// The action being performed
    pub action: RateLimitAction,
    /// The caller identifier (IP address or pseudo-session)
    pub identifier: String,
}

impl RateLimitKey {
    pub fn new(action: RateLimitAction, identifier: impl Into<String>) -> Self {
        Self {
            action,
            identifier: identifier.into(),
        }
    }

    /// Key used both in Redis and in the in-process fallback map
    pub fn storage_key(&self) -> String {
        format!("rate_limit:{}:{}", self.action.as_str(), self.identifier)
    }
}

/// Current wall-clock time in milliseconds
pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_storage_key() {
        let key = RateLimitKey::new(RateLimitAction::Redirect, "203.0.113.7");
        assert_eq!(key.storage_key(), "rate_limit:url-redirect:203.0.113.7");

        let key = RateLimitKey::new(RateLimitAction::CreateUrl, "client:abc");
        assert_eq!(key.storage_key(), "rate_limit:url-create:client:abc");
    }

    #[test]
    fn test_default_policies() {
        let policies = RateLimitPolicies::default();
        assert_eq!(policies.for_action(RateLimitAction::Login), RateLimitPolicy::new(5, 300));
        assert_eq!(policies.for_action(RateLimitAction::PasswordReset), RateLimitPolicy::new(5, 300));
        assert_eq!(policies.for_action(RateLimitAction::Redirect), RateLimitPolicy::new(20, 10));
        assert_eq!(policies.for_action(RateLimitAction::ListUrls), RateLimitPolicy::new(20, 10));
        assert_eq!(policies.for_action(RateLimitAction::ApiRead), RateLimitPolicy::new(100, 60));
        assert_eq!(policies.for_action(RateLimitAction::CreateUrl), RateLimitPolicy::new(10, 60));
        assert_eq!(policies.for_action(RateLimitAction::DeleteUrl), RateLimitPolicy::new(10, 60));
    }

    #[test]
    fn test_decision_from_count() {
        let policy = RateLimitPolicy::new(20, 10);
        let now = 1_700_000_000_000;

        let admitted = RateLimitDecision::from_count(20, &policy, now);
        assert!(admitted.admitted);
        assert_eq!(admitted.remaining, 0);
        assert_eq!(admitted.reset_at.timestamp_millis(), now + 10_000);

        let denied = RateLimitDecision::from_count(21, &policy, now);
        assert!(!denied.admitted);
        assert_eq!(denied.remaining, 0);

        let fresh = RateLimitDecision::from_count(1, &policy, now);
        assert_eq!(fresh.remaining, 19);
    }

    #[test]
    fn test_denial_into_result() {
        let policy = RateLimitPolicy::new(1, 60);
        let denied = RateLimitDecision::from_count(2, &policy, now_millis());
        match denied.into_result() {
            Err(AppError::RateLimited {
                limit,
                retry_after_secs,
                ..
            }) => {
                assert_eq!(limit, 1);
                assert!(retry_after_secs >= 59 && retry_after_secs <= 60);
            }
            other => panic!("expected RateLimited, got {:?}", other),
        }
    }

    #[test]
    fn test_action_kebab_case_serde() {
        let action: RateLimitAction = serde_json::from_str("\"password-reset\"").unwrap();
        assert_eq!(action, RateLimitAction::PasswordReset);
    }
}
