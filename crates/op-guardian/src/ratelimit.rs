//! Dual-axis fixed-window rate limiter (spec §3 "Rate-limit buckets", §4.3
//! step 6, §9 "Rate-limit windows are fixed, not sliding").
//!
//! Each key (a user id, or `ch:<channel>`) gets an independent O(1)
//! counter that resets when the window elapses. This is a known,
//! accepted tradeoff: a client can burst up to ~2x the limit across a
//! window boundary. Fixing that would require a sliding window or token
//! bucket, which spec §9 explicitly defers as a deliberate future change.

use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;

/// Evict opportunistically once the bucket map exceeds this size (spec §5).
const EVICT_THRESHOLD: usize = 10_000;

struct Bucket {
    count: u32,
    window_start_ms: i64,
}

pub struct RateLimiter {
    window_ms: i64,
    limit: u32,
    buckets: Mutex<HashMap<String, Bucket>>,
}

impl RateLimiter {
    pub fn new(limit: u32, window_ms: i64) -> Self {
        Self {
            window_ms,
            limit,
            buckets: Mutex::new(HashMap::new()),
        }
    }

    /// `120 req/min` per-user limiter (spec §4.3 step 6).
    pub fn per_user() -> Self {
        Self::new(120, 60_000)
    }

    /// `200 req/min` per-channel limiter (spec §4.3 step 6).
    pub fn per_channel() -> Self {
        Self::new(200, 60_000)
    }

    /// Returns `true` if the request identified by `key` is allowed.
    pub fn check(&self, key: &str) -> bool {
        self.check_at(key, now_ms())
    }

    pub fn check_at(&self, key: &str, now: i64) -> bool {
        let mut buckets = self.buckets.lock();

        if buckets.len() > EVICT_THRESHOLD {
            buckets.retain(|_, b| now - b.window_start_ms <= self.window_ms);
        }

        let bucket = buckets.entry(key.to_string()).or_insert(Bucket {
            count: 0,
            window_start_ms: now,
        });

        if now - bucket.window_start_ms > self.window_ms {
            bucket.count = 0;
            bucket.window_start_ms = now;
        }

        if bucket.count >= self.limit {
            return false;
        }

        bucket.count += 1;
        true
    }
}

fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allows_up_to_limit_then_denies() {
        let limiter = RateLimiter::new(3, 60_000);
        assert!(limiter.check_at("alice", 0));
        assert!(limiter.check_at("alice", 0));
        assert!(limiter.check_at("alice", 0));
        assert!(!limiter.check_at("alice", 0));
    }

    #[test]
    fn resets_after_window_elapses() {
        let limiter = RateLimiter::new(1, 60_000);
        assert!(limiter.check_at("alice", 0));
        assert!(!limiter.check_at("alice", 30_000));
        assert!(limiter.check_at("alice", 60_001));
    }

    #[test]
    fn keys_are_independent() {
        let limiter = RateLimiter::new(1, 60_000);
        assert!(limiter.check_at("alice", 0));
        assert!(limiter.check_at("bob", 0));
        assert!(!limiter.check_at("alice", 0));
    }

    #[test]
    fn channel_key_convention_is_independent_axis() {
        let limiter = RateLimiter::new(1, 60_000);
        assert!(limiter.check_at("alice", 0));
        assert!(limiter.check_at("ch:api", 0));
    }

    #[test]
    fn per_user_default_matches_spec() {
        let limiter = RateLimiter::per_user();
        for _ in 0..120 {
            assert!(limiter.check_at("alice", 0));
        }
        assert!(!limiter.check_at("alice", 0));
    }

    #[test]
    fn per_channel_default_matches_spec() {
        let limiter = RateLimiter::per_channel();
        for _ in 0..200 {
            assert!(limiter.check_at("ch:api", 0));
        }
        assert!(!limiter.check_at("ch:api", 0));
    }
}
