//! Query result cache
//!
//! Results are stored serialized and addressed by a blake3 hash of the
//! query id and its canonicalised arguments. The whole cache is tied to a
//! store revision: once the store moves past it, every entry is dropped.

use blake3::Hasher;
use dashmap::DashMap;
use serde::{de::DeserializeOwned, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

use crate::revision::Revision;

/// Address of one query invocation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CacheKey([u8; 32]);

impl CacheKey {
    /// Key for `id` called with `args`.
    ///
    /// `args` must serialize deterministically (e.g. a `BTreeMap`).
    pub fn for_query<A: Serialize>(id: &str, args: &A) -> Result<Self, CacheError> {
        let args = serde_json::to_vec(args)
            .map_err(|e| CacheError::SerializationError(e.to_string()))?;

        let mut hasher = Hasher::new();
        // Length prefixes keep ("ab", "c") and ("a", "bc") apart
        for part in [id.as_bytes(), args.as_slice()] {
            hasher.update(&(part.len() as u64).to_le_bytes());
            hasher.update(part);
        }
        Ok(CacheKey(*hasher.finalize().as_bytes()))
    }
}

#[derive(Debug)]
struct Slot {
    bytes: Vec<u8>,

    /// Logical clock value of the last read or write
    last_used: u64,
}

/// Counters reported by `dataserver query --stats`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub revision: u64,
    pub hits: u64,
    pub misses: u64,
    pub entries: usize,
    pub size_bytes: usize,
}

/// In-memory result cache bound to a store revision
#[derive(Debug)]
pub struct ResultCache {
    entries: DashMap<CacheKey, Slot>,

    /// Store revision the current entries were computed against
    revision: AtomicU64,

    clock: AtomicU64,
    hits: AtomicU64,
    misses: AtomicU64,

    /// Byte budget for serialized results (0 = unlimited)
    max_size_bytes: usize,
}

impl ResultCache {
    pub fn new() -> Self {
        Self::with_max_size(0)
    }

    pub fn with_max_size(max_size_bytes: usize) -> Self {
        ResultCache {
            entries: DashMap::new(),
            revision: AtomicU64::new(Revision::ZERO.0),
            clock: AtomicU64::new(0),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            max_size_bytes,
        }
    }

    /// Drop every entry if the store moved to a different revision.
    ///
    /// Returns true when entries were discarded.
    pub fn sync_revision(&self, revision: Revision) -> bool {
        let previous = self.revision.swap(revision.0, Ordering::SeqCst);
        if previous == revision.0 {
            return false;
        }
        let dropped = !self.entries.is_empty();
        self.entries.clear();
        if dropped {
            tracing::debug!("Query cache reset at store revision {}", revision);
        }
        dropped
    }

    pub fn get<T: DeserializeOwned>(&self, key: &CacheKey) -> Option<T> {
        let Some(mut slot) = self.entries.get_mut(key) else {
            self.misses.fetch_add(1, Ordering::Relaxed);
            return None;
        };
        slot.last_used = self.tick();
        self.hits.fetch_add(1, Ordering::Relaxed);
        serde_json::from_slice(&slot.bytes).ok()
    }

    /// Store `value`, evicting least recently used entries to stay in budget
    pub fn put<T: Serialize>(&self, key: CacheKey, value: &T) -> Result<(), CacheError> {
        let bytes = serde_json::to_vec(value)
            .map_err(|e| CacheError::SerializationError(e.to_string()))?;

        if self.max_size_bytes > 0 {
            if bytes.len() > self.max_size_bytes {
                return Err(CacheError::SizeLimitExceeded);
            }
            let used = self.size_bytes();
            if used + bytes.len() > self.max_size_bytes {
                self.evict(used + bytes.len() - self.max_size_bytes);
            }
        }

        let last_used = self.tick();
        self.entries.insert(key, Slot { bytes, last_used });
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            revision: self.revision.load(Ordering::SeqCst),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            entries: self.entries.len(),
            size_bytes: self.size_bytes(),
        }
    }

    fn tick(&self) -> u64 {
        self.clock.fetch_add(1, Ordering::Relaxed)
    }

    fn size_bytes(&self) -> usize {
        self.entries.iter().map(|slot| slot.bytes.len()).sum()
    }

    fn evict(&self, needed_bytes: usize) {
        let mut by_age: Vec<(CacheKey, u64)> = self
            .entries
            .iter()
            .map(|slot| (*slot.key(), slot.last_used))
            .collect();
        by_age.sort_by_key(|(_, last_used)| *last_used);

        let mut freed = 0;
        for (key, _) in by_age {
            if freed >= needed_bytes {
                break;
            }
            if let Some((_, slot)) = self.entries.remove(&key) {
                freed += slot.bytes.len();
            }
        }
    }
}

impl Default for ResultCache {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("Failed to serialize value: {0}")]
    SerializationError(String),

    #[error("Cache size limit exceeded")]
    SizeLimitExceeded,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn key(id: &str, pairs: &[(&str, &str)]) -> CacheKey {
        let args: BTreeMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        CacheKey::for_query(id, &args).unwrap()
    }

    #[test]
    fn test_query_key_is_stable() {
        let a = key("latest", &[("limit", "3"), ("type", "article")]);
        let b = key("latest", &[("type", "article"), ("limit", "3")]);

        assert_eq!(a, b);
        assert_ne!(a, key("latest", &[("limit", "4")]));
        assert_ne!(a, key("oldest", &[("limit", "3"), ("type", "article")]));
    }

    #[test]
    fn test_hits_and_misses_are_counted() {
        let cache = ResultCache::new();
        cache.put(key("q", &[]), &"value".to_string()).unwrap();

        assert_eq!(cache.get::<String>(&key("q", &[])).as_deref(), Some("value"));
        assert_eq!(cache.get::<String>(&key("other", &[])), None);

        let stats = cache.stats();
        assert_eq!((stats.hits, stats.misses, stats.entries), (1, 1, 1));
    }

    #[test]
    fn test_revision_change_drops_entries() {
        let cache = ResultCache::new();
        assert!(!cache.sync_revision(Revision(0)));

        cache.put(key("q", &[]), &1u32).unwrap();
        assert!(!cache.sync_revision(Revision(0)));
        assert_eq!(cache.get::<u32>(&key("q", &[])), Some(1));

        assert!(cache.sync_revision(Revision(1)));
        assert_eq!(cache.get::<u32>(&key("q", &[])), None);
        assert_eq!(cache.stats().revision, 1);
    }

    #[test]
    fn test_budget_evicts_least_recently_used() {
        // Each value serializes to 12 bytes
        let cache = ResultCache::with_max_size(30);
        cache.put(key("a", &[]), &"aaaaaaaaaa".to_string()).unwrap();
        cache.put(key("b", &[]), &"bbbbbbbbbb".to_string()).unwrap();
        let _ = cache.get::<String>(&key("a", &[]));

        cache.put(key("c", &[]), &"cccccccccc".to_string()).unwrap();

        assert!(cache.get::<String>(&key("a", &[])).is_some());
        assert!(cache.get::<String>(&key("b", &[])).is_none());
        assert!(cache.stats().size_bytes <= 30);
        assert!(matches!(
            cache.put(key("d", &[]), &"d".repeat(64)),
            Err(CacheError::SizeLimitExceeded)
        ));
    }
}
