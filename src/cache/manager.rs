//! Cache Manager - the artifact cache facade
//!
//! Wires the memory tier, disk tier and write-back scheduler together and
//! exposes the operations collaborators use. Disk failures never reach the
//! caller: they degrade to misses and show up in [`ArtifactCache::health`].

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tracing::{debug, error, info, instrument, warn};

use super::clock::{Clock, SystemClock};
use super::compression::CompressionAlgorithm;
use super::config::CacheConfig;
use super::disk::{sanitize, DiskTier};
use super::expiration::ExpirationPolicy;
use super::health::{HealthChecker, HealthReport};
use super::maintenance::{MaintenanceJob, MaintenanceReport};
use super::memory::{MemoryEntry, MemoryTier};
use super::stats::{LatencyTracker, StatsCollector, StatsSnapshot};
use super::writeback::{SchedulerState, WriteBackScheduler};
use crate::error::Result;

/// Two-tier content-addressed artifact cache
pub struct ArtifactCache {
    config: CacheConfig,
    memory: MemoryTier,
    disk: Option<Arc<DiskTier>>,
    scheduler: WriteBackScheduler,
    stats: Arc<StatsCollector>,
    clock: Arc<dyn Clock>,
    policy: ExpirationPolicy,
    health: HealthChecker,
    /// Bumped after every disk invalidation; promotions that started before
    /// a bump are dropped
    epoch: AtomicU64,
}

impl std::fmt::Debug for ArtifactCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArtifactCache")
            .field("dir", &self.config.cache_directory)
            .field("disk", &self.disk.is_some())
            .field("memory_entries", &self.memory.len())
            .field("scheduler", &self.scheduler.state())
            .finish_non_exhaustive()
    }
}

impl ArtifactCache {
    /// Open a cache with the system clock
    pub fn open(config: CacheConfig) -> Result<Self> {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    /// Open a cache reading time from `clock`
    ///
    /// Invalid configuration is rejected here. A disk tier that cannot be
    /// opened is not: the cache runs memory-only and reports unhealthy.
    pub fn with_clock(config: CacheConfig, clock: Arc<dyn Clock>) -> Result<Self> {
        config.validate()?;

        let stats = Arc::new(StatsCollector::new());
        let policy = ExpirationPolicy::new(config.max_cache_age_millis);

        let disk = if config.enable_disk_cache {
            match DiskTier::open(
                &config.cache_directory,
                CompressionAlgorithm::from_enabled(config.compress_cache),
                policy,
                Arc::clone(&stats),
                Arc::clone(&clock),
            ) {
                Ok(disk) => Some(Arc::new(disk)),
                Err(e) => {
                    stats.record_disk_error();
                    error!(
                        dir = %config.cache_directory.display(),
                        error = %e,
                        "Failed to open disk tier, continuing memory-only"
                    );
                    None
                }
            }
        } else {
            None
        };

        let scheduler = WriteBackScheduler::new(
            config.write_mode,
            config.disk_io_threads,
            config.shutdown_grace_period(),
        )?;

        let health = HealthChecker::new(
            config.health.clone(),
            config.max_disk_size_bytes(),
            config.enable_disk_cache,
        );

        info!(
            dir = %config.cache_directory.display(),
            disk = disk.is_some(),
            compression = config.compress_cache,
            memory_entries = config.max_memory_entries,
            write_mode = %config.write_mode,
            "Artifact cache opened"
        );

        Ok(Self {
            memory: MemoryTier::new(config.max_memory_entries),
            disk,
            scheduler,
            stats,
            clock,
            policy,
            health,
            epoch: AtomicU64::new(0),
            config,
        })
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn memory(&self) -> &MemoryTier {
        &self.memory
    }

    /// The disk tier, if enabled and open
    pub fn disk(&self) -> Option<&DiskTier> {
        self.disk.as_deref()
    }

    pub fn scheduler_state(&self) -> SchedulerState {
        self.scheduler.state()
    }

    /// Look up the payload stored for `key` at `content_hash`
    pub fn get(&self, key: &str, content_hash: &str) -> Option<Bytes> {
        self.stats.record_request();
        let now = self.clock.now_millis();

        let tracker = LatencyTracker::start();
        if let Some(entry) = self.memory.get(key) {
            if entry.matches(content_hash) {
                if !self.policy.is_expired(entry.created_at_millis, now) {
                    self.stats.record_memory_hit();
                    self.stats.record_memory_lookup_latency(tracker.elapsed());
                    return Some(entry.payload);
                }
                self.memory.remove(key);
            }
        }
        self.stats.record_memory_lookup_latency(tracker.elapsed());

        if let Some(disk) = &self.disk {
            let epoch = self.epoch.load(Ordering::SeqCst);
            let tracker = LatencyTracker::start();
            let loaded = disk.load(key, content_hash);
            self.stats.record_disk_lookup_latency(tracker.elapsed());

            if let Some(record) = loaded {
                let payload = Bytes::from(record.payload);
                let entry = MemoryEntry::new(key, content_hash, payload.clone(), record.timestamp_millis);
                if self.promote(entry, epoch) {
                    self.stats.record_promotion();
                }
                self.stats.record_disk_hit();
                return Some(payload);
            }
        }

        self.stats.record_miss();
        None
    }

    /// Store `payload` for `key` at `content_hash`
    ///
    /// The memory tier is updated before this returns. The disk write runs on
    /// the write-back pool, or inline in `sync` write mode.
    pub fn put(&self, key: &str, content_hash: &str, payload: impl Into<Bytes>) {
        let payload = payload.into();
        let now = self.clock.now_millis();

        self.insert_memory(MemoryEntry::new(key, content_hash, payload.clone(), now));

        let Some(disk) = &self.disk else {
            return;
        };
        let disk = Arc::clone(disk);
        let stats = Arc::clone(&self.stats);
        let key = key.to_string();
        let content_hash = content_hash.to_string();

        let accepted = self.scheduler.submit(move || {
            match disk.store(&key, &content_hash, &payload, now) {
                Ok(_) => stats.record_disk_write(),
                Err(e) => {
                    stats.record_failed_disk_write();
                    stats.record_disk_error();
                    warn!(key = %key, error = %e, "Failed to persist cache entry");
                }
            }
        });
        if !accepted {
            debug!("Cache is shutting down, disk write skipped");
        }
    }

    fn insert_memory(&self, entry: MemoryEntry) {
        if let Some(evicted) = self.memory.put(entry) {
            self.record_eviction(&evicted);
        }
    }

    /// Insert a disk hit unless an invalidation ran since `epoch` was read
    fn promote(&self, entry: MemoryEntry, epoch: u64) -> bool {
        match self
            .memory
            .put_if(entry, || self.epoch.load(Ordering::SeqCst) == epoch)
        {
            Ok(evicted) => {
                if let Some(evicted) = evicted {
                    self.record_eviction(&evicted);
                }
                true
            }
            Err(entry) => {
                debug!(key = %entry.key, "Promotion dropped, invalidated during load");
                false
            }
        }
    }

    fn record_eviction(&self, evicted: &MemoryEntry) {
        self.stats.record_eviction();
        debug!(key = %evicted.key, "Evicted from memory tier");
    }

    /// Close the window in which a load that read a now-deleted file could
    /// still promote it. Call after the disk tier has been invalidated and
    /// before the memory tier is.
    fn advance_epoch(&self) {
        self.epoch.fetch_add(1, Ordering::SeqCst);
    }

    /// Drop every stored version of `key` from both tiers
    ///
    /// Pending writes are flushed first so a queued write cannot bring the
    /// entry back.
    pub fn invalidate(&self, key: &str) -> usize {
        self.flush_pending();
        let mut removed = self.disk.as_ref().map_or(0, |disk| disk.invalidate(key));
        self.advance_epoch();
        removed += usize::from(self.memory.remove(key).is_some());
        removed
    }

    /// Drop every entry whose key starts with `prefix`
    pub fn invalidate_prefix(&self, prefix: &str) -> usize {
        self.flush_pending();
        let mut removed = self
            .disk
            .as_ref()
            .map_or(0, |disk| disk.invalidate_prefix(prefix));
        self.advance_epoch();

        let target = sanitize(prefix);
        removed += self
            .memory
            .remove_if(|entry| sanitize(&entry.key).starts_with(&target))
            .len();
        removed
    }

    /// Drop memory entries created, and disk files modified, before
    /// `timestamp_millis`
    pub fn invalidate_older_than(&self, timestamp_millis: i64) -> usize {
        self.flush_pending();
        let mut removed = self
            .disk
            .as_ref()
            .map_or(0, |disk| disk.invalidate_older_than(timestamp_millis));
        self.advance_epoch();

        removed += self
            .memory
            .remove_if(|entry| entry.created_at_millis < timestamp_millis)
            .len();
        removed
    }

    /// Empty both tiers
    pub fn clear(&self) {
        self.flush_pending();
        if let Some(disk) = &self.disk {
            if let Err(e) = disk.clear() {
                self.stats.record_disk_error();
                warn!(error = %e, "Failed to clear disk tier");
            }
        }
        self.advance_epoch();
        self.memory.clear();
    }

    fn flush_pending(&self) {
        if !self.scheduler.await_idle(self.config.shutdown_grace_period()) {
            warn!(
                pending = self.scheduler.pending(),
                "Pending disk writes did not finish before invalidation"
            );
        }
    }

    /// Expire, de-orphan, recompact and prune
    #[instrument(skip(self), fields(dir = %self.config.cache_directory.display()))]
    pub fn run_maintenance(&self) -> MaintenanceReport {
        MaintenanceJob::new(
            &self.memory,
            self.disk.as_deref(),
            self.policy,
            &self.config.maintenance,
            self.clock.as_ref(),
        )
        .run()
    }

    pub fn health(&self) -> HealthReport {
        self.health
            .check(&self.stats.snapshot(), &self.memory, self.disk.as_deref())
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    pub fn reset_stats(&self) {
        self.stats.reset();
    }

    /// Report time spent producing a payload after a miss
    pub fn record_generation_time(&self, duration: Duration) {
        self.stats.record_generation_time(duration);
    }

    /// Wait for queued disk writes; false if `timeout` elapsed first
    pub fn await_idle(&self, timeout: Duration) -> bool {
        self.scheduler.await_idle(timeout)
    }

    /// Drain and stop the write-back pool. Safe to call more than once.
    #[instrument(skip(self), fields(dir = %self.config.cache_directory.display()))]
    pub fn shutdown(&self) {
        if let Err(e) = self.scheduler.shutdown() {
            warn!(error = %e, "Write-back pool did not drain in time");
        }
    }
}

// =============================================================================
// Registry
// =============================================================================

/// Shared cache instances keyed by directory
///
/// Owned explicitly by the application; there is no process-wide instance.
#[derive(Default)]
pub struct CacheRegistry {
    caches: DashMap<PathBuf, Arc<ArtifactCache>>,
}

impl CacheRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the cache for `config.cache_directory`, opening it on first use
    ///
    /// Later calls for the same directory get the existing instance and
    /// their configuration is ignored.
    pub fn get_or_open(&self, config: CacheConfig) -> Result<Arc<ArtifactCache>> {
        if config.enable_disk_cache {
            // Canonical paths need the directory to exist
            if let Err(e) = std::fs::create_dir_all(&config.cache_directory) {
                debug!(
                    dir = %config.cache_directory.display(),
                    error = %e,
                    "Could not create cache directory before canonicalizing"
                );
            }
        }
        let dir = normalize(&config.cache_directory);

        match self.caches.entry(dir) {
            Entry::Occupied(existing) => Ok(Arc::clone(existing.get())),
            Entry::Vacant(slot) => {
                let cache = Arc::new(ArtifactCache::open(config)?);
                slot.insert(Arc::clone(&cache));
                Ok(cache)
            }
        }
    }

    pub fn get(&self, dir: impl AsRef<Path>) -> Option<Arc<ArtifactCache>> {
        self.caches
            .get(&normalize(dir.as_ref()))
            .map(|cache| Arc::clone(cache.value()))
    }

    /// Detach and shut down the cache for `dir`
    pub fn remove(&self, dir: impl AsRef<Path>) -> bool {
        match self.caches.remove(&normalize(dir.as_ref())) {
            Some((_, cache)) => {
                cache.shutdown();
                true
            }
            None => false,
        }
    }

    /// Shut down and detach every cache
    pub fn shutdown_all(&self) {
        let dirs: Vec<PathBuf> = self.caches.iter().map(|e| e.key().clone()).collect();
        for dir in dirs {
            if let Some((_, cache)) = self.caches.remove(&dir) {
                cache.shutdown();
            }
        }
    }

    pub fn len(&self) -> usize {
        self.caches.len()
    }

    pub fn is_empty(&self) -> bool {
        self.caches.is_empty()
    }
}

fn normalize(dir: &Path) -> PathBuf {
    dir.canonicalize().unwrap_or_else(|_| dir.to_path_buf())
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::clock::ManualClock;
    use crate::cache::config::WriteMode;
    use crate::error::Error;
    use assert_matches::assert_matches;
    use tempfile::TempDir;

    const T0: i64 = 1_700_000_000_000;

    fn sync_config(dir: &Path) -> CacheConfig {
        CacheConfig::new(dir).with_write_mode(WriteMode::Sync)
    }

    #[test]
    fn test_rejects_invalid_config() {
        let dir = TempDir::new().unwrap();
        let result = ArtifactCache::open(sync_config(dir.path()).with_disk_io_threads(0));
        assert_matches!(result, Err(Error::Config(_)));

        let result = ArtifactCache::open(sync_config(dir.path()).with_max_memory_entries(0));
        assert_matches!(result, Err(Error::Config(_)));
    }

    #[test]
    fn test_memory_hit_then_disk_hit() {
        let dir = TempDir::new().unwrap();
        let config = sync_config(dir.path());

        {
            let cache = ArtifactCache::open(config.clone()).unwrap();
            cache.put("com.foo.Bar", "abcd1234", vec![1, 2, 3]);
            assert_eq!(cache.get("com.foo.Bar", "abcd1234").unwrap().as_ref(), &[1, 2, 3]);

            let stats = cache.stats();
            assert_eq!(stats.memory_hits, 1);
            assert_eq!(stats.disk_writes, 1);
        }

        // Fresh instance: memory empty, disk still populated
        let cache = ArtifactCache::open(config).unwrap();
        assert_eq!(cache.get("com.foo.Bar", "abcd1234").unwrap().as_ref(), &[1, 2, 3]);
        assert_eq!(cache.stats().disk_hits, 1);
        assert_eq!(cache.stats().promotions, 1);

        // Promoted: next hit comes from memory
        cache.get("com.foo.Bar", "abcd1234");
        assert_eq!(cache.stats().memory_hits, 1);
    }

    #[test]
    fn test_miss_is_counted() {
        let dir = TempDir::new().unwrap();
        let cache = ArtifactCache::open(sync_config(dir.path())).unwrap();
        assert!(cache.get("absent", "abcd").is_none());

        let stats = cache.stats();
        assert_eq!(stats.requests, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.miss_rate, 1.0);
    }

    #[test]
    fn test_memory_ttl_boundary() {
        let dir = TempDir::new().unwrap();
        let clock = Arc::new(ManualClock::new(T0));
        let cache = ArtifactCache::with_clock(
            sync_config(dir.path())
                .with_disk_cache(false)
                .with_max_age_millis(1_000),
            clock.clone(),
        )
        .unwrap();

        cache.put("k", "abcd", &b"v"[..]);
        clock.set(T0 + 999);
        assert!(cache.get("k", "abcd").is_some());
        clock.set(T0 + 1_001);
        assert!(cache.get("k", "abcd").is_none());
        assert!(cache.memory().is_empty());
    }

    #[test]
    fn test_promotion_keeps_disk_timestamp() {
        let dir = TempDir::new().unwrap();
        let clock = Arc::new(ManualClock::new(T0));
        let config = sync_config(dir.path()).with_max_age_millis(1_000);

        {
            let cache = ArtifactCache::with_clock(config.clone(), clock.clone()).unwrap();
            cache.put("k", "abcd", &b"v"[..]);
        }

        let cache = ArtifactCache::with_clock(config, clock.clone()).unwrap();
        clock.set(T0 + 500);
        assert!(cache.get("k", "abcd").is_some());

        // Still measured from the original write, not the promotion
        clock.set(T0 + 1_001);
        assert!(cache.get("k", "abcd").is_none());
    }

    #[test]
    fn test_promotion_dropped_after_invalidation() {
        let dir = TempDir::new().unwrap();
        let cache = ArtifactCache::open(sync_config(dir.path())).unwrap();
        cache.put("com.foo.Bar", "abcd1234", vec![1, 2, 3]);

        // A load that read the file before the invalidation finishes after it
        let epoch = cache.epoch.load(Ordering::SeqCst);
        let stale = MemoryEntry::new("com.foo.Bar", "abcd1234", Bytes::from_static(&[1, 2, 3]), 0);
        cache.invalidate("com.foo.Bar");
        assert!(!cache.promote(stale, epoch));
        assert!(cache.get("com.foo.Bar", "abcd1234").is_none());

        let epoch = cache.epoch.load(Ordering::SeqCst);
        let fresh = MemoryEntry::new("com.foo.Baz", "abcd1234", Bytes::from_static(&[4]), 0);
        assert!(cache.promote(fresh, epoch));
        assert_eq!(cache.memory().len(), 1);
    }

    #[test]
    fn test_debug_names_directory() {
        let dir = TempDir::new().unwrap();
        let cache = ArtifactCache::open(sync_config(dir.path())).unwrap();
        let rendered = format!("{cache:?}");
        assert!(rendered.starts_with("ArtifactCache"));
        assert!(rendered.contains("disk: true"));
    }

    #[test]
    fn test_evictions_counted() {
        let dir = TempDir::new().unwrap();
        let cache = ArtifactCache::open(
            sync_config(dir.path())
                .with_disk_cache(false)
                .with_max_memory_entries(2),
        )
        .unwrap();

        cache.put("a", "h", &b"1"[..]);
        cache.put("b", "h", &b"2"[..]);
        cache.put("c", "h", &b"3"[..]);
        assert_eq!(cache.stats().evictions, 1);
        assert!(cache.get("a", "h").is_none());
    }

    #[test]
    fn test_invalidate_prefix_and_older_than() {
        let dir = TempDir::new().unwrap();
        let clock = Arc::new(ManualClock::new(T0));
        let cache = ArtifactCache::with_clock(sync_config(dir.path()), clock.clone()).unwrap();

        cache.put("com.foo.A", "aaaa", &b"1"[..]);
        cache.put("com.foo.B", "bbbb", &b"2"[..]);
        cache.put("org.bar.C", "cccc", &b"3"[..]);

        assert_eq!(cache.invalidate_prefix("com.foo"), 4);
        assert!(cache.get("com.foo.A", "aaaa").is_none());
        assert!(cache.get("org.bar.C", "cccc").is_some());

        // Memory entry created at T0, disk mtime is real time
        let removed = cache.invalidate_older_than(T0 + 1);
        assert_eq!(removed, 1);
        assert!(cache.memory().is_empty());
    }

    #[test]
    fn test_clear_empties_both_tiers() {
        let dir = TempDir::new().unwrap();
        let cache = ArtifactCache::open(sync_config(dir.path())).unwrap();
        cache.put("a", "aaaa", &b"1"[..]);
        cache.put("b", "bbbb", &b"2"[..]);

        cache.clear();
        assert!(cache.memory().is_empty());
        assert_eq!(cache.disk().unwrap().file_count(), 0);
        assert!(cache.get("a", "aaaa").is_none());
    }

    #[test]
    fn test_put_after_shutdown_is_memory_only() {
        let dir = TempDir::new().unwrap();
        let cache = ArtifactCache::open(CacheConfig::new(dir.path())).unwrap();
        cache.shutdown();
        cache.shutdown();
        assert_eq!(cache.scheduler_state(), SchedulerState::Stopped);

        cache.put("k", "abcd", &b"v"[..]);
        assert!(cache.get("k", "abcd").is_some());
        assert_eq!(cache.disk().unwrap().file_count(), 0);
    }

    #[test]
    fn test_unopenable_disk_degrades_to_memory() {
        let dir = TempDir::new().unwrap();
        let blocker = dir.path().join("file");
        std::fs::write(&blocker, b"not a directory").unwrap();

        let cache = ArtifactCache::open(sync_config(&blocker.join("cache"))).unwrap();
        assert!(cache.disk().is_none());

        cache.put("k", "abcd", &b"v"[..]);
        assert!(cache.get("k", "abcd").is_some());

        let health = cache.health();
        assert!(!health.healthy);
    }

    #[test]
    fn test_generation_time_feeds_average() {
        let dir = TempDir::new().unwrap();
        let cache = ArtifactCache::open(sync_config(dir.path())).unwrap();
        cache.get("k", "abcd");
        cache.record_generation_time(Duration::from_millis(40));
        assert!((cache.stats().avg_generation_time_millis - 40.0).abs() < 1e-6);

        cache.reset_stats();
        assert_eq!(cache.stats().requests, 0);
    }

    #[test]
    fn test_registry_shares_instances() {
        let dir = TempDir::new().unwrap();
        let registry = CacheRegistry::new();

        let first = registry.get_or_open(sync_config(dir.path())).unwrap();
        let second = registry.get_or_open(sync_config(dir.path())).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(registry.len(), 1);

        let other = TempDir::new().unwrap();
        registry.get_or_open(sync_config(other.path())).unwrap();
        assert_eq!(registry.len(), 2);

        assert!(registry.get(dir.path()).is_some());
        assert!(registry.remove(dir.path()));
        assert!(!registry.remove(dir.path()));
        assert_eq!(first.scheduler_state(), SchedulerState::Stopped);

        registry.shutdown_all();
        assert!(registry.is_empty());
    }

    #[test]
    fn test_registry_opens_when_directory_cannot_be_created() {
        let dir = TempDir::new().unwrap();
        let blocker = dir.path().join("file");
        std::fs::write(&blocker, b"x").unwrap();
        let registry = CacheRegistry::new();

        let cache = registry.get_or_open(sync_config(&blocker.join("cache"))).unwrap();
        assert!(cache.disk().is_none());
        assert!(registry.get(blocker.join("cache")).is_some());
    }
}
