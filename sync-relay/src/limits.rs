//! Rate limiting for sync-relay.
//!
//! Sessions are anonymous, so requests are limited per session id, plus one
//! global limit across all sessions. Both use the governor crate; the keyed
//! limiter is backed by DashMap.

use crate::config::LimitsConfig;
use governor::clock::DefaultClock;
use governor::middleware::NoOpMiddleware;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter};
use std::num::NonZeroU32;
use std::sync::Arc;

/// Type alias for a keyed rate limiter using DashMap.
type KeyedLimiter<K> = RateLimiter<
    K,
    dashmap::DashMap<K, InMemoryState>,
    DefaultClock,
    NoOpMiddleware<governor::clock::QuantaInstant>,
>;

/// Type alias for a direct (non-keyed) rate limiter.
type DirectLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// Rate limiters for the relay server.
#[derive(Clone)]
pub struct RateLimits {
    /// Limits requests per session. Configured via `limits.messages_per_minute`.
    session_limiter: Arc<KeyedLimiter<u64>>,

    /// Caps aggregate throughput even if every session is within its limit.
    global_limiter: Arc<DirectLimiter>,
}

impl std::fmt::Debug for RateLimits {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimits")
            .field("session_limiter", &"KeyedLimiter<u64>")
            .field("global_limiter", &"DirectLimiter")
            .finish()
    }
}

impl RateLimits {
    /// Create rate limiters from configuration.
    ///
    /// Zero values are raised to one; [`Config::validate`](crate::config::Config::validate)
    /// rejects them before this point.
    pub fn new(config: &LimitsConfig) -> Self {
        let per_minute = NonZeroU32::new(config.messages_per_minute).unwrap_or(NonZeroU32::MIN);
        let global_rps =
            NonZeroU32::new(config.global_requests_per_second).unwrap_or(NonZeroU32::MIN);

        Self {
            session_limiter: Arc::new(RateLimiter::keyed(Quota::per_minute(per_minute))),
            global_limiter: Arc::new(RateLimiter::direct(Quota::per_second(global_rps))),
        }
    }

    /// Check if a request from `session_id` is allowed.
    pub fn check_session(&self, session_id: u64) -> Result<(), RateLimitError> {
        self.session_limiter
            .check_key(&session_id)
            .map_err(|_| RateLimitError::SessionLimitExceeded)
    }

    /// Check if the global request rate is within limits.
    pub fn check_global(&self) -> Result<(), RateLimitError> {
        self.global_limiter
            .check()
            .map_err(|_| RateLimitError::GlobalLimitExceeded)
    }

    /// Number of tracked session keys.
    pub fn session_keys_count(&self) -> usize {
        self.session_limiter.len()
    }

    /// Evict entries of idle sessions whose quota has fully recharged.
    pub fn shrink(&self) {
        self.session_limiter.retain_recent();
    }
}

/// Rate limit error types.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RateLimitError {
    /// Too many requests from this session.
    #[error("session rate limit exceeded")]
    SessionLimitExceeded,
    /// Global request rate exceeded across all sessions.
    #[error("global rate limit exceeded")]
    GlobalLimitExceeded,
}
