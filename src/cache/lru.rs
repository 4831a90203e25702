//! LRU cache — capacity-bounded map with recency eviction and lazy expiry

use super::{unix_now, CachedResponse};
use std::collections::HashMap;
use std::sync::Mutex;

/// An entry in the recency list. Links are arena indices into `slots`.
struct Entry {
    key: String,
    value: CachedResponse,
    expires_at: i64,
    prev: Option<usize>,
    next: Option<usize>,
}

/// List + map state, always mutated together under the cache mutex.
///
/// Invariant: every index in `map` points at an occupied slot that is
/// reachable by walking the list from `head`, and vice versa.
#[derive(Default)]
struct LruInner {
    map: HashMap<String, usize>,
    slots: Vec<Option<Entry>>,
    free: Vec<usize>,
    head: Option<usize>,
    tail: Option<usize>,
}

impl LruInner {
    fn detach(&mut self, idx: usize) {
        let (prev, next) = match self.slots[idx].as_ref() {
            Some(entry) => (entry.prev, entry.next),
            None => return,
        };
        match prev {
            Some(p) => {
                if let Some(entry) = self.slots[p].as_mut() {
                    entry.next = next;
                }
            }
            None => self.head = next,
        }
        match next {
            Some(n) => {
                if let Some(entry) = self.slots[n].as_mut() {
                    entry.prev = prev;
                }
            }
            None => self.tail = prev,
        }
        if let Some(entry) = self.slots[idx].as_mut() {
            entry.prev = None;
            entry.next = None;
        }
    }

    fn push_front(&mut self, idx: usize) {
        let old_head = self.head;
        if let Some(entry) = self.slots[idx].as_mut() {
            entry.prev = None;
            entry.next = old_head;
        }
        if let Some(h) = old_head {
            if let Some(entry) = self.slots[h].as_mut() {
                entry.prev = Some(idx);
            }
        }
        self.head = Some(idx);
        if self.tail.is_none() {
            self.tail = Some(idx);
        }
    }

    /// Unlink and drop the entry at `idx`, returning its slot to the free list.
    fn remove(&mut self, idx: usize) {
        self.detach(idx);
        if let Some(entry) = self.slots[idx].take() {
            self.map.remove(&entry.key);
            self.free.push(idx);
        }
    }

    fn alloc(&mut self, entry: Entry) -> usize {
        match self.free.pop() {
            Some(idx) => {
                self.slots[idx] = Some(entry);
                idx
            }
            None => {
                self.slots.push(Some(entry));
                self.slots.len() - 1
            }
        }
    }
}

/// Mutex-guarded LRU response cache with per-entry TTL and a body-size cap.
///
/// All mutations happen under one mutex with short critical sections; the
/// cache path is the uncommon case per request so contention stays low.
pub struct LruCache {
    capacity: usize,
    max_size: usize,
    ttl: i64,
    inner: Mutex<LruInner>,
}

impl LruCache {
    /// Create a cache holding at most `capacity` entries, skipping bodies
    /// larger than `max_size` bytes (0 = no cap), with `ttl` seconds as the
    /// default entry lifetime.
    pub fn new(capacity: u64, max_size: u64, ttl: u64) -> Self {
        Self {
            capacity: capacity as usize,
            max_size: max_size as usize,
            ttl: ttl as i64,
            inner: Mutex::new(LruInner::default()),
        }
    }

    /// Default TTL in seconds for new entries
    pub fn ttl(&self) -> i64 {
        self.ttl
    }

    /// Look up `key`, removing it if expired. A hit moves the entry to the
    /// front of the recency list.
    pub fn get(&self, key: &str) -> Option<CachedResponse> {
        let mut inner = self.inner.lock().unwrap();
        let idx = *inner.map.get(key)?;
        let expired = match inner.slots[idx].as_ref() {
            Some(entry) => entry.expires_at < unix_now(),
            None => true,
        };
        if expired {
            inner.remove(idx);
            return None;
        }
        inner.detach(idx);
        inner.push_front(idx);
        inner.slots[idx].as_ref().map(|entry| entry.value.clone())
    }

    /// Insert or overwrite `key`. Oversized bodies are silently skipped;
    /// exceeding capacity evicts the least recently used entry.
    pub fn set(&self, key: &str, value: CachedResponse, expires_at: i64) {
        if self.max_size > 0 && value.body.len() > self.max_size {
            return;
        }

        let mut inner = self.inner.lock().unwrap();

        let existing = inner.map.get(key).copied();
        if let Some(idx) = existing {
            // overwrite keeps the entry's original expiry
            if let Some(entry) = inner.slots[idx].as_mut() {
                entry.value = value;
            }
            inner.detach(idx);
            inner.push_front(idx);
            return;
        }

        let idx = inner.alloc(Entry {
            key: key.to_string(),
            value,
            expires_at,
            prev: None,
            next: None,
        });
        inner.map.insert(key.to_string(), idx);
        inner.push_front(idx);

        if inner.map.len() > self.capacity {
            if let Some(t) = inner.tail {
                inner.remove(t);
            }
        }
    }

    /// Number of live entries
    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().map.len()
    }

    /// Whether the cache holds no entries
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Keys from most to least recently used (test support)
    #[cfg(test)]
    fn keys_by_recency(&self) -> Vec<String> {
        let inner = self.inner.lock().unwrap();
        let mut keys = Vec::new();
        let mut cursor = inner.head;
        while let Some(idx) = cursor {
            let entry = inner.slots[idx].as_ref().expect("linked slot occupied");
            keys.push(entry.key.clone());
            cursor = entry.next;
        }
        keys
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use http::{HeaderMap, StatusCode};

    fn response(body: &str) -> CachedResponse {
        CachedResponse {
            status: StatusCode::OK,
            headers: HeaderMap::new(),
            body: Bytes::copy_from_slice(body.as_bytes()),
        }
    }

    fn far_future() -> i64 {
        unix_now() + 3600
    }

    #[test]
    fn test_get_miss() {
        let cache = LruCache::new(4, 0, 60);
        assert!(cache.get("absent").is_none());
    }

    #[test]
    fn test_set_then_get() {
        let cache = LruCache::new(4, 0, 60);
        cache.set("k", response("v"), far_future());
        let hit = cache.get("k").unwrap();
        assert_eq!(hit.body, Bytes::from("v"));
        assert_eq!(hit.status, StatusCode::OK);
    }

    #[test]
    fn test_capacity_never_exceeded() {
        let cache = LruCache::new(3, 0, 60);
        for i in 0..10 {
            cache.set(&format!("k{}", i), response("v"), far_future());
            assert!(cache.len() <= 3);
        }
        assert_eq!(cache.len(), 3);
    }

    #[test]
    fn test_evicts_least_recently_used() {
        let cache = LruCache::new(2, 0, 60);
        cache.set("a", response("1"), far_future());
        cache.set("b", response("2"), far_future());
        // touch "a" so "b" becomes the tail
        assert!(cache.get("a").is_some());
        cache.set("c", response("3"), far_future());

        assert!(cache.get("b").is_none());
        assert!(cache.get("a").is_some());
        assert!(cache.get("c").is_some());
    }

    #[test]
    fn test_recency_order() {
        let cache = LruCache::new(3, 0, 60);
        cache.set("a", response("1"), far_future());
        cache.set("b", response("2"), far_future());
        cache.set("c", response("3"), far_future());
        assert_eq!(cache.keys_by_recency(), vec!["c", "b", "a"]);

        cache.get("a");
        assert_eq!(cache.keys_by_recency(), vec!["a", "c", "b"]);
    }

    #[test]
    fn test_list_and_map_agree() {
        let cache = LruCache::new(3, 0, 60);
        for i in 0..8 {
            cache.set(&format!("k{}", i), response("v"), far_future());
        }
        cache.get("k7");
        cache.get("missing");
        assert_eq!(cache.keys_by_recency().len(), cache.len());
    }

    #[test]
    fn test_expired_entry_removed_on_get() {
        let cache = LruCache::new(4, 0, 60);
        cache.set("old", response("v"), unix_now() - 1);
        assert!(cache.get("old").is_none());
        assert_eq!(cache.len(), 0);
    }

    #[test]
    fn test_overwrite_moves_to_front() {
        let cache = LruCache::new(2, 0, 60);
        cache.set("a", response("1"), far_future());
        cache.set("b", response("2"), far_future());
        cache.set("a", response("1b"), far_future());

        assert_eq!(cache.keys_by_recency(), vec!["a", "b"]);
        assert_eq!(cache.get("a").unwrap().body, Bytes::from("1b"));
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn test_overwrite_keeps_original_expiry() {
        let cache = LruCache::new(2, 0, 60);
        cache.set("a", response("1"), unix_now() - 1);
        cache.set("a", response("2"), far_future());
        // the refreshed value still carries the first expiry
        assert!(cache.get("a").is_none());
    }

    #[test]
    fn test_oversized_body_skipped() {
        let cache = LruCache::new(4, 4, 60);
        cache.set("big", response("too large"), far_future());
        assert!(cache.get("big").is_none());
        assert_eq!(cache.len(), 0);

        cache.set("ok", response("tiny"), far_future());
        assert!(cache.get("ok").is_some());
    }

    #[test]
    fn test_zero_max_size_means_no_cap() {
        let cache = LruCache::new(4, 0, 60);
        cache.set("big", response(&"x".repeat(10_000)), far_future());
        assert!(cache.get("big").is_some());
    }

    #[test]
    fn test_slot_reuse_after_eviction() {
        let cache = LruCache::new(2, 0, 60);
        for i in 0..20 {
            cache.set(&format!("k{}", i), response("v"), far_future());
        }
        let inner = cache.inner.lock().unwrap();
        // evicted slots are recycled instead of growing the arena
        assert!(inner.slots.len() <= 3);
    }
}
