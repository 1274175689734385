//! Collaborator contracts: the database driver and the key/value cache.
//!
//! The mapper never talks SQL wire protocols or cache servers itself. It
//! generates statement text with `:name` placeholders and hands it to a
//! [`DatabaseHandle`]; entity snapshots and id redirects are stored through a
//! [`CacheHandle`]. [`MemoryCache`] is a bounded in-process cache suitable for
//! single-process deployments and tests.

use crate::core::{BoxError, Params, Row, Value};
use lru::LruCache;
use std::num::NonZeroUsize;
use std::sync::Mutex;

pub type DriverResult<T> = std::result::Result<T, BoxError>;

/// Blocking database driver used by table descriptors and entities.
pub trait DatabaseHandle: Send + Sync {
    /// Quotes a table or column name for inclusion in statement text.
    fn escape_identifier(&self, ident: &str) -> String;

    /// Runs a statement and returns the number of affected rows.
    fn execute(&self, sql: &str, params: &Params) -> DriverResult<u64>;

    /// Id generated by the most recent INSERT on this handle.
    fn last_insert_id(&self) -> DriverResult<i64>;

    /// First column of the first row, `Value::Null` when nothing matched.
    fn fetch_one(&self, sql: &str, params: &Params) -> DriverResult<Value>;

    fn fetch_row(&self, sql: &str, params: &Params) -> DriverResult<Option<Row>>;

    fn fetch_all(&self, sql: &str, params: &Params) -> DriverResult<Vec<Row>>;
}

/// Key/value cache. Keys are always `"{table}:{field}:{value}"`.
///
/// Operations are best-effort: a backend that cannot reach its store reports
/// a miss from `get` and ignores writes.
pub trait CacheHandle: Send + Sync {
    fn get(&self, key: &str) -> Option<Vec<u8>>;
    fn put(&self, key: &str, value: Vec<u8>);
    fn remove(&self, key: &str);
}

/// LRU-bounded in-process cache.
pub struct MemoryCache {
    entries: Mutex<LruCache<String, Vec<u8>>>,
}

impl MemoryCache {
    pub fn new(capacity: NonZeroUsize) -> Self {
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.lock().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries
            .lock()
            .map(|e| e.contains(key))
            .unwrap_or(false)
    }
}

impl Default for MemoryCache {
    fn default() -> Self {
        Self::new(NonZeroUsize::new(1024).unwrap_or(NonZeroUsize::MIN))
    }
}

impl CacheHandle for MemoryCache {
    fn get(&self, key: &str) -> Option<Vec<u8>> {
        let mut entries = self.entries.lock().ok()?;
        entries.get(key).cloned()
    }

    fn put(&self, key: &str, value: Vec<u8>) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.put(key.to_string(), value);
        }
    }

    fn remove(&self, key: &str) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.pop(key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_cache_roundtrip_and_remove() {
        let cache = MemoryCache::default();
        cache.put("users:id:1", vec![1, 2, 3]);
        assert_eq!(cache.get("users:id:1"), Some(vec![1, 2, 3]));
        cache.remove("users:id:1");
        assert_eq!(cache.get("users:id:1"), None);
        assert!(cache.is_empty());
    }

    #[test]
    fn memory_cache_evicts_least_recently_used() {
        let cache = MemoryCache::new(NonZeroUsize::new(2).unwrap());
        cache.put("a", vec![1]);
        cache.put("b", vec![2]);
        assert!(cache.get("a").is_some());
        cache.put("c", vec![3]);

        assert!(cache.contains("a"));
        assert!(!cache.contains("b"));
        assert!(cache.contains("c"));
    }
}
