//! Per-sender rate limiting.
//!
//! Fixed windows per sender address; a sender over the limit gets no reply
//! for the rest of the window.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

/// Rate limit configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Maximum messages per window.
    pub max_requests: u32,
    /// Window duration in seconds.
    pub window_seconds: u32,
}

impl RateLimitConfig {
    #[must_use]
    pub fn new(max_requests: u32, window_seconds: u32) -> Self {
        Self {
            max_requests,
            window_seconds,
        }
    }

    #[must_use]
    pub fn per_minute(max_requests: u32) -> Self {
        Self::new(max_requests, 60)
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self::per_minute(20)
    }
}

/// Result of a rate limit check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RateLimitResult {
    Allowed {
        remaining: u32,
        resets_at: DateTime<Utc>,
    },
    Exceeded {
        retry_after: Duration,
        resets_at: DateTime<Utc>,
    },
}

impl RateLimitResult {
    #[must_use]
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allowed { .. })
    }
}

#[derive(Debug, Clone)]
struct WindowState {
    count: u32,
    window_start: DateTime<Utc>,
}

/// Fixed-window limiter keyed by sender address.
///
/// Windows live in process memory, so each replica limits independently.
#[derive(Debug, Clone)]
pub struct RateLimiter {
    config: RateLimitConfig,
    state: Arc<RwLock<HashMap<String, WindowState>>>,
}

impl RateLimiter {
    #[must_use]
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            state: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    fn window(&self) -> Duration {
        Duration::seconds(i64::from(self.config.window_seconds))
    }

    /// Counts one message for `key` if the window still has room.
    pub fn check_and_increment(&self, key: &str) -> RateLimitResult {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        let now = Utc::now();
        let window = self.window();

        // Drop windows that have ended so idle senders don't accumulate.
        state.retain(|_, w| now - w.window_start < window);

        let entry = state.entry(key.to_string()).or_insert(WindowState {
            count: 0,
            window_start: now,
        });
        let resets_at = entry.window_start + window;

        if entry.count >= self.config.max_requests {
            return RateLimitResult::Exceeded {
                retry_after: resets_at - now,
                resets_at,
            };
        }

        entry.count += 1;
        RateLimitResult::Allowed {
            remaining: self.config.max_requests - entry.count,
            resets_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allows_under_limit() {
        let limiter = RateLimiter::new(RateLimitConfig::new(10, 60));
        for i in 0..10 {
            let result = limiter.check_and_increment("385911234567");
            assert!(matches!(
                result,
                RateLimitResult::Allowed { remaining, .. } if remaining == 10 - i - 1
            ));
        }
    }

    #[test]
    fn blocks_over_limit() {
        let limiter = RateLimiter::new(RateLimitConfig::new(5, 60));
        for _ in 0..5 {
            assert!(limiter.check_and_increment("385911234567").is_allowed());
        }
        let result = limiter.check_and_increment("385911234567");
        assert!(matches!(result, RateLimitResult::Exceeded { .. }));
    }

    #[test]
    fn senders_are_isolated() {
        let limiter = RateLimiter::new(RateLimitConfig::new(2, 60));
        limiter.check_and_increment("a");
        limiter.check_and_increment("a");
        assert!(!limiter.check_and_increment("a").is_allowed());
        assert!(limiter.check_and_increment("b").is_allowed());
    }

    #[test]
    fn elapsed_window_starts_over() {
        let limiter = RateLimiter::new(RateLimitConfig::new(1, 0));
        assert!(limiter.check_and_increment("a").is_allowed());
        assert!(limiter.check_and_increment("a").is_allowed());
    }

    #[test]
    fn default_is_twenty_per_minute() {
        let config = RateLimitConfig::default();
        assert_eq!(config.max_requests, 20);
        assert_eq!(config.window_seconds, 60);
    }
}
