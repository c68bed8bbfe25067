//! TTL cache of per-role permission maps.
//!
//! A stale entry is a deliberate miss: the caller reloads from the
//! credential store and `put`s the fresh map, which replaces (never merges
//! with) whatever was cached before.

use super::RolePermissions;
use crate::clock::Clock;
use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

#[derive(Debug, Clone)]
pub struct PermissionCacheEntry {
    pub role_id: String,
    pub permissions: Arc<RolePermissions>,
    pub cached_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub entries: usize,
}

pub struct PermissionCache {
    entries: Mutex<HashMap<String, PermissionCacheEntry>>,
    ttl: Duration,
    clock: Arc<dyn Clock>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl PermissionCache {
    pub fn new(ttl: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            ttl,
            clock,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Cached permissions for `role_id` if younger than the TTL.
    pub fn get(&self, role_id: &str) -> Option<Arc<RolePermissions>> {
        let now = self.clock.now();
        let mut entries = self.entries.lock();

        let fresh = match entries.get(role_id) {
            Some(entry) if now - entry.cached_at < self.ttl => Some(Arc::clone(&entry.permissions)),
            Some(_) => {
                entries.remove(role_id);
                None
            }
            None => None,
        };

        if fresh.is_some() {
            self.hits.fetch_add(1, Ordering::Relaxed);
        } else {
            self.misses.fetch_add(1, Ordering::Relaxed);
        }
        fresh
    }

    pub fn put(&self, role_id: &str, permissions: RolePermissions) -> Arc<RolePermissions> {
        let permissions = Arc::new(permissions);
        let entry = PermissionCacheEntry {
            role_id: role_id.to_owned(),
            permissions: Arc::clone(&permissions),
            cached_at: self.clock.now(),
        };
        self.entries.lock().insert(role_id.to_owned(), entry);
        permissions
    }

    pub fn invalidate(&self, role_id: &str) -> bool {
        self.entries.lock().remove(role_id).is_some()
    }

    pub fn invalidate_all(&self) -> usize {
        let mut entries = self.entries.lock();
        let count = entries.len();
        entries.clear();
        count
    }

    /// Evict entries older than the TTL, whether or not they were read.
    pub fn sweep_expired(&self) -> usize {
        let now = self.clock.now();
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|_, entry| now - entry.cached_at < self.ttl);
        before - entries.len()
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            entries: self.entries.lock().len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    fn cache() -> (Arc<ManualClock>, PermissionCache) {
        let clock = Arc::new(ManualClock::starting_now());
        let cache = PermissionCache::new(Duration::minutes(5), clock.clone());
        (clock, cache)
    }

    #[test]
    fn hit_within_ttl() {
        let (clock, cache) = cache();
        cache.put("editor", RolePermissions::new().with("contracts", "write"));

        clock.advance(Duration::seconds(299));
        let perms = cache.get("editor").unwrap();
        assert!(perms.allows("contracts", "write"));
        assert_eq!(cache.stats().hits, 1);
    }

    #[test]
    fn stale_entry_is_a_miss() {
        let (clock, cache) = cache();
        cache.put("editor", RolePermissions::new().with("contracts", "write"));

        clock.advance(Duration::minutes(5));
        assert!(cache.get("editor").is_none());
        assert_eq!(cache.stats().misses, 1);
        assert_eq!(cache.stats().entries, 0);
    }

    #[test]
    fn invalidate_then_put_reflects_only_new_data() {
        let (_clock, cache) = cache();
        cache.put(
            "editor",
            RolePermissions::new()
                .with("contracts", "write")
                .with("documents", "read"),
        );

        assert!(cache.invalidate("editor"));
        assert!(cache.get("editor").is_none());

        cache.put("editor", RolePermissions::new().with("contracts", "read"));
        let perms = cache.get("editor").unwrap();
        assert!(perms.allows("contracts", "read"));
        assert!(!perms.allows("contracts", "write"));
        assert!(!perms.allows("documents", "read"));
    }

    #[test]
    fn put_replaces_without_invalidate() {
        let (_clock, cache) = cache();
        cache.put("viewer", RolePermissions::new().with("a", "read"));
        cache.put("viewer", RolePermissions::new().with("b", "read"));
        let perms = cache.get("viewer").unwrap();
        assert!(!perms.allows("a", "read"));
        assert!(perms.allows("b", "read"));
    }

    #[test]
    fn invalidate_all_clears() {
        let (_clock, cache) = cache();
        cache.put("a", RolePermissions::new());
        cache.put("b", RolePermissions::new());
        assert_eq!(cache.invalidate_all(), 2);
        assert!(cache.get("a").is_none());
        assert!(!cache.invalidate("b"));
    }

    #[test]
    fn sweep_evicts_untouched_stale_entries() {
        let (clock, cache) = cache();
        cache.put("old", RolePermissions::new());
        clock.advance(Duration::minutes(4));
        cache.put("new", RolePermissions::new());
        clock.advance(Duration::minutes(2));

        assert_eq!(cache.sweep_expired(), 1);
        assert!(cache.get("new").is_some());
        assert_eq!(cache.stats().entries, 1);
    }
}
