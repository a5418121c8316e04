//! Sliding-window rate limiting of chat commands, keyed by chat id.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::{Duration, Instant};

use crate::config::RateLimitConfig;

#[derive(Debug)]
struct LimiterState {
    requests: HashMap<i64, Vec<Instant>>,
    last_sweep: Instant,
}

/// Per-user sliding window limiter.
///
/// Users with nothing left in their window are swept out at most once per
/// window, from the request path, so the map only holds recently active chats.
#[derive(Debug)]
pub struct RateLimiter {
    state: Mutex<LimiterState>,
    max_requests: usize,
    window: Duration,
}

impl RateLimiter {
    pub fn new(max_requests: usize, window: Duration) -> Self {
        Self {
            state: Mutex::new(LimiterState {
                requests: HashMap::new(),
                last_sweep: Instant::now(),
            }),
            max_requests,
            window,
        }
    }

    pub fn from_config(config: &RateLimitConfig) -> Self {
        Self::new(config.max_requests, config.window())
    }

    /// Check if a request is allowed for the user, recording it when it is
    pub fn is_allowed(&self, user_id: i64) -> bool {
        self.check_at(user_id, Instant::now())
    }

    fn check_at(&self, user_id: i64, now: Instant) -> bool {
        let mut state = self.state.lock();
        if now.saturating_duration_since(state.last_sweep) >= self.window {
            self.sweep(&mut state, now);
        }

        let user_requests = state.requests.entry(user_id).or_default();

        user_requests.retain(|&time| now.saturating_duration_since(time) < self.window);

        if user_requests.len() >= self.max_requests {
            return false;
        }

        user_requests.push(now);
        true
    }

    /// Time until the user's oldest request leaves the window
    pub fn wait_time(&self, user_id: i64) -> Duration {
        let state = self.state.lock();
        state
            .requests
            .get(&user_id)
            .and_then(|times| times.iter().min())
            .map(|oldest| self.window.saturating_sub(oldest.elapsed()))
            .unwrap_or(Duration::ZERO)
    }

    /// Drop users with no request inside the window
    fn sweep(&self, state: &mut LimiterState, now: Instant) {
        let window = self.window;
        state.requests.retain(|_, times| {
            times.retain(|&time| now.saturating_duration_since(time) < window);
            !times.is_empty()
        });
        state.last_sweep = now;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_limit_is_per_user() {
        let limiter = RateLimiter::new(2, Duration::from_secs(60));
        assert!(limiter.is_allowed(1));
        assert!(limiter.is_allowed(1));
        assert!(!limiter.is_allowed(1));
        assert!(limiter.is_allowed(2));
        assert!(limiter.wait_time(1) > Duration::from_secs(55));
        assert_eq!(limiter.wait_time(3), Duration::ZERO);
    }

    #[test]
    fn test_window_expiry() {
        let limiter = RateLimiter::new(1, Duration::from_secs(60));
        let start = Instant::now();
        assert!(limiter.check_at(1, start));
        assert!(!limiter.check_at(1, start + Duration::from_secs(30)));
        assert!(limiter.check_at(1, start + Duration::from_secs(61)));
    }

    fn tracked_users(limiter: &RateLimiter) -> usize {
        limiter.state.lock().requests.len()
    }

    #[test]
    fn test_idle_users_are_swept_on_later_requests() {
        let limiter = RateLimiter::new(5, Duration::from_secs(60));
        let start = Instant::now();
        for user in 1..=100 {
            assert!(limiter.check_at(user, start));
        }
        assert_eq!(tracked_users(&limiter), 100);

        // still inside the window, nothing to sweep
        assert!(limiter.check_at(1, start + Duration::from_secs(30)));
        assert_eq!(tracked_users(&limiter), 100);

        // only user 1 (request at +30s) and the newcomer remain
        assert!(limiter.check_at(500, start + Duration::from_secs(61)));
        assert_eq!(tracked_users(&limiter), 2);
    }
}
