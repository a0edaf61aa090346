//! Sliding-window connection rate limiter: at most `limit` new WebSocket
//! connections per user within `window`.
//!
//! Grounded on the teacher's preference for small in-memory guard structs
//! behind a `Mutex` (see `KeyService`'s in-memory cache pattern), generalised
//! to a per-key timestamp deque rather than a token bucket since the spec
//! calls for a sliding window, not a refill rate.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

pub struct RateLimiter {
    window: Duration,
    limit: usize,
    hits: Mutex<HashMap<String, Vec<Instant>>>,
}

impl RateLimiter {
    pub fn new(window: Duration, limit: usize) -> Self {
        Self { window, limit, hits: Mutex::new(HashMap::new()) }
    }

    /// Records an attempt for `key` and returns whether it is allowed under
    /// the sliding window. Denied attempts are not counted against the key.
    pub fn check(&self, key: &str) -> bool {
        let now = Instant::now();
        let mut hits = self.hits.lock().expect("rate limiter mutex poisoned");
        let entry = hits.entry(key.to_string()).or_default();
        entry.retain(|t| now.duration_since(*t) < self.window);
        if entry.len() >= self.limit {
            return false;
        }
        entry.push(now);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allows_up_to_limit_then_denies() {
        let limiter = RateLimiter::new(Duration::from_secs(60), 3);
        assert!(limiter.check("user-1"));
        assert!(limiter.check("user-1"));
        assert!(limiter.check("user-1"));
        assert!(!limiter.check("user-1"));
    }

    #[test]
    fn keys_are_independent() {
        let limiter = RateLimiter::new(Duration::from_secs(60), 1);
        assert!(limiter.check("user-1"));
        assert!(limiter.check("user-2"));
        assert!(!limiter.check("user-1"));
    }
}
