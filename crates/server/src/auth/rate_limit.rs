//! Fixed-window request limiting keyed by client address.

use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::{
    extract::{Request, State},
    middleware::Next,
    response::{IntoResponse, Response},
};
use dashmap::DashMap;

use crate::AuthState;
use crate::auth::ClientIp;
use crate::config::RateLimitConfig;
use crate::error::AuthError;

#[derive(Debug, Clone, Copy)]
struct Window {
    count: u32,
    started: Instant,
}

/// Allows `max` requests per key within each `window`.
#[derive(Debug, Clone)]
pub struct RateLimiter {
    max: u32,
    window: Duration,
    windows: Arc<DashMap<String, Window>>,
}

impl RateLimiter {
    pub fn new(max: u32, window: Duration) -> Self {
        Self {
            max,
            window,
            windows: Arc::new(DashMap::new()),
        }
    }

    pub fn for_registrations(config: &RateLimitConfig) -> Self {
        Self::new(
            config.register_max,
            Duration::from_secs(config.register_window_secs),
        )
    }

    /// Count one request for `key`, failing once the window is full.
    pub fn check(&self, key: &str) -> Result<(), AuthError> {
        self.check_at(key, Instant::now())
    }

    fn check_at(&self, key: &str, now: Instant) -> Result<(), AuthError> {
        let mut entry = self.windows.entry(key.to_string()).or_insert(Window {
            count: 0,
            started: now,
        });
        let elapsed = now.saturating_duration_since(entry.started);
        if elapsed >= self.window {
            *entry = Window {
                count: 0,
                started: now,
            };
        }
        if entry.count >= self.max {
            let remaining = self.window.saturating_sub(elapsed);
            return Err(AuthError::TooManyRequests {
                retry_after: remaining.as_secs() + 1,
            });
        }
        entry.count += 1;
        Ok(())
    }

    /// Drop windows that have ended. Returns how many were removed.
    pub fn prune(&self) -> usize {
        self.prune_at(Instant::now())
    }

    fn prune_at(&self, now: Instant) -> usize {
        let before = self.windows.len();
        self.windows
            .retain(|_, w| now.saturating_duration_since(w.started) < self.window);
        before.saturating_sub(self.windows.len())
    }
}

/// Rejects registrations beyond the configured rate for the caller's address.
pub async fn limit_registrations(
    State(state): State<AuthState>,
    ip: ClientIp,
    req: Request,
    next: Next,
) -> Response {
    if let Err(e) = state.register_limiter.check(ip.as_str()) {
        tracing::warn!(ip = %ip.as_str(), "registration rate limit exceeded");
        return e.into_response();
    }
    next.run(req).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blocks_after_max_within_window() {
        let limiter = RateLimiter::new(3, Duration::from_secs(60));
        let now = Instant::now();
        for _ in 0..3 {
            assert!(limiter.check_at("203.0.113.9", now).is_ok());
        }
        let err = limiter
            .check_at("203.0.113.9", now + Duration::from_secs(10))
            .unwrap_err();
        assert!(matches!(err, AuthError::TooManyRequests { retry_after: 51 }));
    }

    #[test]
    fn addresses_are_counted_separately() {
        let limiter = RateLimiter::new(1, Duration::from_secs(60));
        let now = Instant::now();
        assert!(limiter.check_at("203.0.113.9", now).is_ok());
        assert!(limiter.check_at("203.0.113.9", now).is_err());
        assert!(limiter.check_at("198.51.100.4", now).is_ok());
    }

    #[test]
    fn window_resets_after_it_elapses() {
        let limiter = RateLimiter::new(1, Duration::from_secs(60));
        let now = Instant::now();
        assert!(limiter.check_at("203.0.113.9", now).is_ok());
        assert!(limiter.check_at("203.0.113.9", now).is_err());
        assert!(
            limiter
                .check_at("203.0.113.9", now + Duration::from_secs(60))
                .is_ok()
        );
    }

    #[test]
    fn prune_drops_only_finished_windows() {
        let limiter = RateLimiter::new(5, Duration::from_secs(60));
        let now = Instant::now();
        limiter.check_at("old", now).unwrap();
        limiter.check_at("fresh", now + Duration::from_secs(50)).unwrap();
        assert_eq!(limiter.prune_at(now + Duration::from_secs(70)), 1);
        assert!(limiter.windows.contains_key("fresh"));
    }
}
