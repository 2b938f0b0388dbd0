//! Rate limiting module
//!
//! Sliding-window limiting keyed by `(action, identifier)`. Every call records
//! the request, prunes timestamps older than the window and counts the rest, so
//! the current request counts toward its own decision.
//!
//! # Features
//!
//! - Redis sorted sets as the shared store, one atomic Lua script per check
//! - Transparent fallback to in-process windows when Redis is unreachable or slow
//! - Per-action policies; actions never share counters
//! - Rate limit headers in responses (`X-RateLimit-*`)
//!
//! # Example
//!
//! ```rust,no_run
//! use shortener::rate_limit::{RateLimitAction, RateLimitPolicies, RateLimiterService};
//!
//! #[tokio::main]
//! async fn main() {
//!     let service = RateLimiterService::local_only(RateLimitPolicies::default(), false);
//!
//!     let decision = service.admit(RateLimitAction::Redirect, "203.0.113.7").await;
//!     assert!(decision.admitted);
//! }
//! ```

pub mod local;
pub mod lua_scripts;
pub mod middleware;
pub mod redis;
pub mod service;
pub mod types;

// Re-export commonly used types
pub use local::LocalRateLimiter;
pub use middleware::{add_rate_limit_headers, api_read_guard, rate_limit_headers};
pub use redis::{BackendError, RedisRateLimiter, WindowBackend};
pub use service::RateLimiterService;
pub use types::{
    RateLimitAction, RateLimitDecision, RateLimitKey, RateLimitPolicies, RateLimitPolicy,
};
