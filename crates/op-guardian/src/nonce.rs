//! Nonce replay cache (spec §3 "Nonce cache", §4.3 step 5, §5 "Resource
//! bounds"). In-memory, keyed by nonce, mapping to the payload's
//! timestamp so stale entries can be pruned by clock skew alone.

use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;

/// ±5 minutes, per spec §3 invariants and §4.3 step 5.
pub const SKEW_WINDOW_MS: i64 = 5 * 60 * 1000;

/// Prune when the cache grows past this many entries (spec §5).
const PRUNE_THRESHOLD: usize = 100;

pub struct NonceCache {
    seen: Mutex<HashMap<String, i64>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NonceCheck {
    Accepted,
    StaleTimestamp,
    ReplayedNonce,
}

impl Default for NonceCache {
    fn default() -> Self {
        Self::new()
    }
}

impl NonceCache {
    pub fn new() -> Self {
        Self {
            seen: Mutex::new(HashMap::new()),
        }
    }

    /// Check `(nonce, timestamp)` against the current wall clock and the
    /// replay cache, inserting on acceptance. Both checks and the
    /// opportunistic prune happen inside one critical section (spec §5
    /// "amortizing cost").
    pub fn check_and_insert(&self, nonce: &str, timestamp_ms: i64) -> NonceCheck {
        self.check_and_insert_at(nonce, timestamp_ms, now_ms())
    }

    /// Testable variant that takes the "current" wall-clock time
    /// explicitly instead of reading `SystemTime::now()`.
    pub fn check_and_insert_at(&self, nonce: &str, timestamp_ms: i64, now: i64) -> NonceCheck {
        if (now - timestamp_ms).abs() > SKEW_WINDOW_MS {
            return NonceCheck::StaleTimestamp;
        }

        let mut seen = self.seen.lock();

        if seen.len() > PRUNE_THRESHOLD {
            seen.retain(|_, ts| (now - *ts).abs() <= SKEW_WINDOW_MS);
        }

        if seen.contains_key(nonce) {
            return NonceCheck::ReplayedNonce;
        }

        seen.insert(nonce.to_string(), timestamp_ms);
        NonceCheck::Accepted
    }

    pub fn len(&self) -> usize {
        self.seen.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
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
    fn fresh_nonce_is_accepted() {
        let cache = NonceCache::new();
        assert_eq!(
            cache.check_and_insert_at("n1", 1_000, 1_000),
            NonceCheck::Accepted
        );
    }

    #[test]
    fn replayed_nonce_within_window_is_rejected() {
        let cache = NonceCache::new();
        assert_eq!(
            cache.check_and_insert_at("n1", 1_000, 1_000),
            NonceCheck::Accepted
        );
        assert_eq!(
            cache.check_and_insert_at("n1", 1_000, 2_000),
            NonceCheck::ReplayedNonce
        );
    }

    #[test]
    fn timestamp_outside_skew_window_is_rejected() {
        let cache = NonceCache::new();
        let now = 10_000_000;
        let old = now - SKEW_WINDOW_MS - 1;
        assert_eq!(
            cache.check_and_insert_at("n1", old, now),
            NonceCheck::StaleTimestamp
        );
    }

    #[test]
    fn timestamp_in_future_outside_skew_is_rejected() {
        let cache = NonceCache::new();
        let now = 10_000_000;
        let future = now + SKEW_WINDOW_MS + 1;
        assert_eq!(
            cache.check_and_insert_at("n1", future, now),
            NonceCheck::StaleTimestamp
        );
    }

    #[test]
    fn timestamp_exactly_at_skew_boundary_is_accepted() {
        let cache = NonceCache::new();
        let now = 10_000_000;
        let at_edge = now - SKEW_WINDOW_MS;
        assert_eq!(
            cache.check_and_insert_at("n1", at_edge, now),
            NonceCheck::Accepted
        );
    }

    #[test]
    fn different_nonces_both_accepted() {
        let cache = NonceCache::new();
        assert_eq!(cache.check_and_insert_at("n1", 0, 0), NonceCheck::Accepted);
        assert_eq!(cache.check_and_insert_at("n2", 0, 0), NonceCheck::Accepted);
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn prune_drops_entries_older_than_skew_window() {
        let cache = NonceCache::new();
        // Insert more than PRUNE_THRESHOLD stale entries, then one fresh.
        for i in 0..(PRUNE_THRESHOLD + 1) {
            cache.check_and_insert_at(&format!("old-{i}"), 0, 0);
        }
        assert_eq!(cache.len(), PRUNE_THRESHOLD + 1);

        // Advance time far enough that all prior entries are stale, which
        // triggers the prune on the next insert (cache is over threshold).
        let far_future = SKEW_WINDOW_MS * 10;
        cache.check_and_insert_at("fresh", far_future, far_future);

        // All the old entries should have been pruned away, leaving only
        // the fresh one.
        assert_eq!(cache.len(), 1);
    }
}
