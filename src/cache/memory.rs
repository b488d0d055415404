//! Memory Tier - bounded in-process LRU
//!
//! Strict least-recently-used eviction over combined `get`/`put` access
//! order. Eviction happens inside the `put` that would exceed capacity, so
//! the tier never holds more than `capacity` entries.
//!
//! Entries are owned by the tier. Callers get clones whose payload is a
//! [`Bytes`] handle: cheap to copy and immutable, never an alias into the
//! tier's storage.

use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};

use bytes::Bytes;
use lru::LruCache;
use parking_lot::Mutex;

/// A cached payload together with the fingerprint it was produced for
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoryEntry {
    /// Logical identifier
    pub key: String,
    /// Content hash the payload belongs to
    pub content_hash: String,
    /// Cached bytes
    pub payload: Bytes,
    /// Creation time (epoch millis); disk promotions keep the on-disk stamp
    pub created_at_millis: i64,
}

impl MemoryEntry {
    pub fn new(
        key: impl Into<String>,
        content_hash: impl Into<String>,
        payload: Bytes,
        created_at_millis: i64,
    ) -> Self {
        Self {
            key: key.into(),
            content_hash: content_hash.into(),
            payload,
            created_at_millis,
        }
    }

    /// True if this entry was produced for `content_hash`
    #[inline]
    pub fn matches(&self, content_hash: &str) -> bool {
        self.content_hash == content_hash
    }

    #[inline]
    pub fn size(&self) -> usize {
        self.payload.len()
    }
}

/// Bounded, thread-safe LRU map from logical key to entry
pub struct MemoryTier {
    entries: Mutex<LruCache<String, MemoryEntry>>,
    capacity: NonZeroUsize,
    evictions: AtomicU64,
}

impl MemoryTier {
    /// Create a tier holding at most `capacity` entries (minimum 1)
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
            capacity,
            evictions: AtomicU64::new(0),
        }
    }

    /// Look up an entry, marking it most recently used
    pub fn get(&self, key: &str) -> Option<MemoryEntry> {
        self.entries.lock().get(key).cloned()
    }

    /// Look up an entry without touching recency
    pub fn peek(&self, key: &str) -> Option<MemoryEntry> {
        self.entries.lock().peek(key).cloned()
    }

    /// Insert or replace an entry
    ///
    /// Returns the entry evicted to make room, if any. Replacing the value of
    /// an existing key is not an eviction.
    pub fn put(&self, entry: MemoryEntry) -> Option<MemoryEntry> {
        self.put_if(entry, || true).unwrap_or(None)
    }

    /// Insert `entry` only if `admit` holds, checked under the tier lock
    ///
    /// `Ok` carries the evicted entry as for [`MemoryTier::put`]; `Err` hands
    /// back the rejected entry.
    pub fn put_if<F>(&self, entry: MemoryEntry, admit: F) -> Result<Option<MemoryEntry>, MemoryEntry>
    where
        F: FnOnce() -> bool,
    {
        let mut entries = self.entries.lock();
        if !admit() {
            return Err(entry);
        }
        let key = entry.key.clone();
        match entries.push(key.clone(), entry) {
            Some((old_key, evicted)) if old_key != key => {
                self.evictions.fetch_add(1, Ordering::Relaxed);
                Ok(Some(evicted))
            }
            _ => Ok(None),
        }
    }

    /// Remove an entry
    pub fn remove(&self, key: &str) -> Option<MemoryEntry> {
        self.entries.lock().pop(key)
    }

    /// Remove every entry matching `predicate`, returning what was removed
    pub fn remove_if<F>(&self, mut predicate: F) -> Vec<MemoryEntry>
    where
        F: FnMut(&MemoryEntry) -> bool,
    {
        let mut entries = self.entries.lock();
        let doomed: Vec<String> = entries
            .iter()
            .filter(|(_, entry)| predicate(entry))
            .map(|(key, _)| key.clone())
            .collect();

        doomed
            .into_iter()
            .filter_map(|key| entries.pop(&key))
            .collect()
    }

    /// Keys from most to least recently used
    pub fn snapshot_keys(&self) -> Vec<String> {
        self.entries
            .lock()
            .iter()
            .map(|(key, _)| key.clone())
            .collect()
    }

    /// Copies of all entries, most recently used first
    pub fn snapshot(&self) -> Vec<MemoryEntry> {
        self.entries
            .lock()
            .iter()
            .map(|(_, entry)| entry.clone())
            .collect()
    }

    /// Check if a key is present without touching recency
    pub fn contains(&self, key: &str) -> bool {
        self.entries.lock().contains(key)
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity.get()
    }

    /// Fill ratio (0.0 - 1.0)
    pub fn utilization(&self) -> f64 {
        self.len() as f64 / self.capacity() as f64
    }

    /// Total payload bytes held
    pub fn size_bytes(&self) -> u64 {
        self.entries
            .lock()
            .iter()
            .map(|(_, entry)| entry.size() as u64)
            .sum()
    }

    /// Number of capacity evictions since creation
    pub fn evictions(&self) -> u64 {
        self.evictions.load(Ordering::Relaxed)
    }

    pub fn clear(&self) {
        self.entries.lock().clear();
    }
}

// =============================================================================
// Tests
// =============================================================================
