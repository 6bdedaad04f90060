//! MemoryCache: map-backed [`Cache`] with per-entry expiry.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::{Duration, Instant};

use tracing::debug;

use crate::cache::Cache;
use crate::error::{StateError, StateResult};

struct Entry {
    value: Vec<u8>,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.is_none_or(|at| now < at)
    }
}

/// In-process cache. Expired entries are invisible to reads and are
/// dropped on the next write.
#[derive(Clone, Default)]
pub struct MemoryCache {
    entries: Arc<RwLock<HashMap<String, Entry>>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn insert(&self, key: &str, value: &[u8], expires_at: Option<Instant>) {
        let now = Instant::now();
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        entries.retain(|_, entry| entry.is_live(now));
        entries.insert(
            key.to_string(),
            Entry {
                value: value.to_vec(),
                expires_at,
            },
        );
    }
}

impl Cache for MemoryCache {
    fn put(&self, key: &str, value: &[u8]) -> StateResult<()> {
        self.insert(key, value, None);
        Ok(())
    }

    fn put_with_ttl(&self, key: &str, value: &[u8], ttl: Duration) -> StateResult<()> {
        self.insert(key, value, Instant::now().checked_add(ttl));
        debug!(%key, ?ttl, "entry stored with ttl");
        Ok(())
    }

    fn get(&self, key: &str) -> StateResult<Vec<u8>> {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        entries
            .get(key)
            .filter(|entry| entry.is_live(Instant::now()))
            .map(|entry| entry.value.clone())
            .ok_or_else(|| StateError::NotFound(key.to_string()))
    }

    fn delete(&self, key: &str) -> StateResult<()> {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        entries.remove(key);
        Ok(())
    }

    fn list(&self, prefix: &str) -> StateResult<HashMap<String, Vec<u8>>> {
        let now = Instant::now();
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        Ok(entries
            .iter()
            .filter(|(key, entry)| key.starts_with(prefix) && entry.is_live(now))
            .map(|(key, entry)| (key.clone(), entry.value.clone()))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn put_get_delete() {
        let cache = MemoryCache::new();
        cache.put("a", b"1").unwrap();
        assert_eq!(cache.get("a").unwrap(), b"1");
        cache.delete("a").unwrap();
        cache.delete("a").unwrap();
        assert!(cache.get("a").unwrap_err().is_not_found());
    }

    #[test]
    fn expired_entries_are_invisible() {
        let cache = MemoryCache::new();
        cache.put_with_ttl("gone", b"x", Duration::ZERO).unwrap();
        cache
            .put_with_ttl("kept", b"y", Duration::from_secs(3600))
            .unwrap();

        assert!(cache.get("gone").unwrap_err().is_not_found());
        assert_eq!(cache.get("kept").unwrap(), b"y");

        let listed = cache.list("").unwrap();
        assert_eq!(listed.len(), 1);
        assert!(listed.contains_key("kept"));
    }

    #[test]
    fn list_scopes_by_prefix() {
        let cache = MemoryCache::new();
        cache.put("approvals/helm/a", b"1").unwrap();
        cache.put("approvals/kubernetes/b", b"2").unwrap();
        assert_eq!(cache.list("approvals/helm/").unwrap().len(), 1);
        assert_eq!(cache.list("approvals/").unwrap().len(), 2);
    }
}
