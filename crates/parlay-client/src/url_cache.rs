use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tracing::debug;

use parlay_types::api::SignedUrl;

use crate::clock::Clock;

/// Storage key -> signed URL, shared by everything that shows profile pictures.
///
/// Constructed once per signed-in process and handed to whoever needs it;
/// cleared on sign-out. Entries within `refresh_margin` of expiry count as
/// misses so callers never receive a URL that is about to stop working.
pub struct SignedUrlCache {
    entries: DashMap<String, SignedUrl>,
    refresh_margin: chrono::Duration,
    clock: Arc<dyn Clock>,
}

impl SignedUrlCache {
    pub fn new(refresh_margin: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: DashMap::new(),
            refresh_margin: chrono::Duration::from_std(refresh_margin)
                .unwrap_or_else(|_| chrono::Duration::seconds(60)),
            clock,
        }
    }

    pub fn get(&self, key: &str) -> Option<String> {
        let entry = self.entries.get(key)?;
        let fresh_until = entry.expires_at.checked_sub_signed(self.refresh_margin);
        if fresh_until.is_none_or(|t| t <= self.clock.now()) {
            drop(entry);
            self.entries.remove(key);
            debug!("signed URL for {} expired", key);
            return None;
        }
        Some(entry.url.clone())
    }

    pub fn insert(&self, key: &str, url: SignedUrl) {
        self.entries.insert(key.to_string(), url);
    }

    /// Drop the entry for a key that no longer points at the current picture.
    pub fn invalidate(&self, key: &str) -> bool {
        self.entries.remove(key).is_some()
    }

    pub fn clear(&self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use chrono::{TimeZone, Utc};

    fn setup() -> (Arc<FixedClock>, SignedUrlCache) {
        let clock = Arc::new(FixedClock::new(Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap()));
        let cache = SignedUrlCache::new(Duration::from_secs(60), clock.clone());
        (clock, cache)
    }

    fn signed(clock: &FixedClock, secs: i64) -> SignedUrl {
        SignedUrl {
            url: format!("https://cdn.example.com/x?exp={}", secs),
            expires_at: clock.now() + chrono::Duration::seconds(secs),
        }
    }

    #[test]
    fn hit_until_refresh_margin() {
        let (clock, cache) = setup();
        cache.insert("a", signed(&clock, 3600));
        assert!(cache.get("a").is_some());

        clock.advance(chrono::Duration::seconds(3540));
        assert!(cache.get("a").is_none());
        assert!(cache.is_empty());
    }

    #[test]
    fn oversized_margin_is_a_miss() {
        let (clock, _) = setup();
        let cache = SignedUrlCache::new(Duration::from_secs(i64::MAX as u64 / 1000), clock.clone());
        cache.insert("a", signed(&clock, 3600));

        assert!(cache.get("a").is_none());
        assert!(cache.is_empty());
    }

    #[test]
    fn invalidate_and_clear() {
        let (clock, cache) = setup();
        cache.insert("a", signed(&clock, 3600));
        cache.insert("b", signed(&clock, 3600));

        assert!(cache.invalidate("a"));
        assert!(!cache.invalidate("a"));
        assert_eq!(cache.len(), 1);

        cache.clear();
        assert!(cache.get("b").is_none());
    }
}
