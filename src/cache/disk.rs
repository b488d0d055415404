//! Disk Tier - persistent sharded file store
//!
//! # Layout
//!
//! ```text
//! <root>/
//! ├── .version                         "<format>;<gzip|raw>"
//! └── ab/                              hash[0:2]
//!     └── cd/                          hash[2:4]
//!         └── com_foo_Bar-abcd1234.cache
//! ```
//!
//! Every path is a pure function of key and content hash, so different
//! hashes for one key coexist as separate files and concurrent writers of
//! different keys never touch the same file.
//!
//! Files are written to a uniquely named temp file in the shard directory and
//! renamed into place. A reader sees either the previous complete file, the
//! new complete file, or nothing.
//!
//! Failures never escape [`DiskTier::load`]: unreadable or malformed files are
//! deleted, counted as disk errors and reported as absent.

use std::collections::hash_map::DefaultHasher;
use std::fs;
use std::hash::{Hash, Hasher};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::{Mutex, MutexGuard};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use super::clock::{epoch_millis, Clock};
use super::compression::{compressor_for, CompressionAlgorithm, Compressor};
use super::expiration::ExpirationPolicy;
use super::record::{self, DiskRecord};
use super::stats::StatsCollector;
use super::{CACHE_EXTENSION, FORMAT_VERSION, VERSION_FILE};
use crate::error::{Error, Result};

/// Marker that separates a unique suffix from the final name of a temp file
const TEMP_MARKER: &str = ".tmp.";

/// Number of path lock stripes (power of 2)
const PATH_LOCK_STRIPES: usize = 64;

/// Make a key safe to embed in a file name
///
/// Dots become underscores. Path separators are mapped the same way so a key
/// can never escape its shard directory.
pub fn sanitize(key: &str) -> String {
    key.chars()
        .map(|c| match c {
            '.' | '/' | '\\' => '_',
            other => other,
        })
        .collect()
}

/// Split `<sanitized key>-<hash>.cache` into its key and hash parts
///
/// Keys may contain `-`; hashes are hex and never do, so the last dash is the
/// separator.
pub fn parse_file_name(file_name: &str) -> Option<(&str, &str)> {
    let stem = file_name.strip_suffix(CACHE_EXTENSION)?.strip_suffix('.')?;
    stem.rsplit_once('-')
}

fn is_temp_file(file_name: &str) -> bool {
    file_name.contains(TEMP_MARKER)
}

/// Two path components from the first four characters of the hash
fn shard_components(hash: &str) -> (String, String) {
    let sanitized = sanitize(hash);
    let mut chars = sanitized.chars().chain(std::iter::repeat('_'));
    let first: String = chars.by_ref().take(2).collect();
    let second: String = chars.take(2).collect();
    (first, second)
}

/// Write `data` to `path` through a temp file and rename
pub(crate) fn write_atomic(path: &Path, data: &[u8]) -> Result<()> {
    let temp_path = path.with_extension(format!("tmp.{}", uuid::Uuid::new_v4()));

    fs::write(&temp_path, data).map_err(|e| Error::disk(&temp_path, "write", e))?;

    if let Err(e) = fs::rename(&temp_path, path) {
        let _ = fs::remove_file(&temp_path);
        return Err(Error::disk(path, "rename", e));
    }
    Ok(())
}

/// Metadata about one cache file, gathered by a directory walk
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiskEntry {
    pub path: PathBuf,
    /// Sanitized key parsed from the file name
    pub key: String,
    pub content_hash: String,
    pub size_bytes: u64,
    /// Modification time (epoch millis)
    pub modified_millis: i64,
}

/// Persistent tier
pub struct DiskTier {
    root: PathBuf,
    compression: CompressionAlgorithm,
    compressor: Box<dyn Compressor>,
    policy: ExpirationPolicy,
    stats: Arc<StatsCollector>,
    clock: Arc<dyn Clock>,
    /// Serializes writes, rewrites and deletes of the same path
    path_locks: Vec<Mutex<()>>,
}

impl DiskTier {
    /// Open (creating if needed) the tier rooted at `root`
    ///
    /// A missing or mismatched version marker wipes any previous cache
    /// content under the root before the marker is rewritten.
    pub fn open(
        root: impl Into<PathBuf>,
        compression: CompressionAlgorithm,
        policy: ExpirationPolicy,
        stats: Arc<StatsCollector>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        let tier = Self {
            root: root.into(),
            compression,
            compressor: compressor_for(compression),
            policy,
            stats,
            clock,
            path_locks: (0..PATH_LOCK_STRIPES).map(|_| Mutex::new(())).collect(),
        };

        fs::create_dir_all(&tier.root).map_err(|e| Error::disk(&tier.root, "create directory", e))?;
        tier.ensure_version_marker()?;

        info!(
            root = %tier.root.display(),
            compression = %compression,
            "Disk tier opened"
        );
        Ok(tier)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn compression(&self) -> CompressionAlgorithm {
        self.compression
    }

    pub fn policy(&self) -> ExpirationPolicy {
        self.policy
    }

    /// Contents the version marker must hold
    pub fn version_string(&self) -> String {
        format!("{};{}", FORMAT_VERSION, self.compression.name())
    }

    fn lock_path(&self, path: &Path) -> MutexGuard<'_, ()> {
        let mut hasher = DefaultHasher::new();
        path.hash(&mut hasher);
        self.path_locks[(hasher.finish() as usize) & (PATH_LOCK_STRIPES - 1)].lock()
    }

    fn version_path(&self) -> PathBuf {
        self.root.join(VERSION_FILE)
    }

    fn ensure_version_marker(&self) -> Result<()> {
        let expected = self.version_string();
        let found = match fs::read_to_string(self.version_path()) {
            Ok(contents) => Some(contents.trim().to_string()),
            Err(e) if e.kind() == ErrorKind::NotFound => None,
            Err(e) => return Err(Error::disk(self.version_path(), "read", e)),
        };

        if found.as_deref() == Some(expected.as_str()) {
            return Ok(());
        }

        let removed = self.wipe_cache_content()?;
        if removed > 0 || found.is_some() {
            info!(
                root = %self.root.display(),
                found = found.as_deref().unwrap_or("<none>"),
                expected = %expected,
                removed,
                "Cache format changed, wiped disk tier"
            );
        }

        write_atomic(&self.version_path(), expected.as_bytes())
    }

    /// Remove shard directories and loose cache/temp files under the root
    ///
    /// Anything else that happens to live in the directory is left alone.
    fn wipe_cache_content(&self) -> Result<usize> {
        let dir = fs::read_dir(&self.root).map_err(|e| Error::disk(&self.root, "list", e))?;
        let mut removed = 0;

        for entry in dir.flatten() {
            let name = entry.file_name().to_string_lossy().into_owned();
            let path = entry.path();
            let is_dir = entry.file_type().map(|t| t.is_dir()).unwrap_or(false);

            let result = if is_dir && name.chars().count() == 2 {
                fs::remove_dir_all(&path)
            } else if !is_dir
                && (name == VERSION_FILE
                    || name.ends_with(CACHE_EXTENSION)
                    || is_temp_file(&name))
            {
                fs::remove_file(&path)
            } else {
                continue;
            };

            match result {
                Ok(()) => removed += 1,
                Err(e) => return Err(Error::disk(path, "remove", e)),
            }
        }
        Ok(removed)
    }

    /// Deterministic location of the record for `key` at `hash`
    pub fn path_for(&self, key: &str, hash: &str) -> PathBuf {
        let (first, second) = shard_components(hash);
        self.root.join(first).join(second).join(format!(
            "{}-{}.{}",
            sanitize(key),
            sanitize(hash),
            CACHE_EXTENSION
        ))
    }

    /// Load and decode the record for `key` at `hash`
    ///
    /// Returns the stored timestamp and the decompressed payload. Absent,
    /// expired and corrupt files all yield `None`; the latter two are deleted.
    pub fn load(&self, key: &str, hash: &str) -> Option<DiskRecord> {
        let path = self.path_for(key, hash);

        let data = match fs::read(&path) {
            Ok(data) => data,
            Err(e) if e.kind() == ErrorKind::NotFound => return None,
            Err(e) => {
                self.stats.record_disk_error();
                warn!(path = %path.display(), error = %e, "Failed to read cache file");
                return None;
            }
        };

        let stored = match DiskRecord::decode(&path, &data) {
            Ok(stored) => stored,
            Err(e) => {
                self.discard_corrupt(&path, &e);
                return None;
            }
        };

        if self
            .policy
            .is_expired(stored.timestamp_millis, self.clock.now_millis())
        {
            debug!(path = %path.display(), "Expired cache file removed");
            self.remove_file(&path);
            return None;
        }

        match self.compressor.decompress(&stored.payload) {
            Ok(payload) => Some(DiskRecord::new(stored.timestamp_millis, payload)),
            Err(e) => {
                self.discard_corrupt(&path, &e);
                None
            }
        }
    }

    /// Persist `payload` for `key` at `hash`, stamped with `timestamp_millis`
    pub fn store(&self, key: &str, hash: &str, payload: &[u8], timestamp_millis: i64) -> Result<PathBuf> {
        let path = self.path_for(key, hash);
        let compressed = self.compressor.compress(payload)?;
        let encoded = record::encode(timestamp_millis, &compressed);

        let _guard = self.lock_path(&path);
        self.ensure_parent(&path)?;
        match write_atomic(&path, &encoded) {
            // Shard directory pruned between creation and write
            Err(Error::DiskIo { source, .. }) if source.kind() == ErrorKind::NotFound => {
                self.ensure_parent(&path)?;
                write_atomic(&path, &encoded)?;
            }
            other => other?,
        }

        debug!(
            path = %path.display(),
            raw = payload.len(),
            stored = encoded.len(),
            "Stored cache file"
        );
        Ok(path)
    }

    fn ensure_parent(&self, path: &Path) -> Result<()> {
        match path.parent() {
            Some(parent) => {
                fs::create_dir_all(parent).map_err(|e| Error::disk(parent, "create directory", e))
            }
            None => Ok(()),
        }
    }

    /// Replace the contents of an existing cache file
    ///
    /// `transform` gets the current bytes and returns the replacement, or
    /// `None` to leave the file alone. A file that no longer exists is
    /// skipped, so a rewrite never brings back a deleted entry. Returns the
    /// number of bytes saved when the file was replaced.
    pub fn rewrite<F>(&self, path: &Path, transform: F) -> Result<Option<u64>>
    where
        F: FnOnce(&[u8]) -> Result<Option<Vec<u8>>>,
    {
        let _guard = self.lock_path(path);

        let current = match fs::read(path) {
            Ok(data) => data,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(Error::disk(path, "read", e)),
        };
        let Some(replacement) = transform(&current)? else {
            return Ok(None);
        };

        write_atomic(path, &replacement)?;
        Ok(Some(current.len().saturating_sub(replacement.len()) as u64))
    }

    /// Delete every file stored for exactly `key`, whatever its hash
    pub fn invalidate(&self, key: &str) -> usize {
        let target = sanitize(key);
        let removed = self.remove_where(|entry| entry.key == target);
        debug!(key, removed, "Invalidated key on disk");
        removed
    }

    /// Delete every file whose sanitized key starts with `sanitize(prefix)`
    pub fn invalidate_prefix(&self, prefix: &str) -> usize {
        let target = sanitize(prefix);
        let removed = self.remove_where(|entry| entry.key.starts_with(&target));
        debug!(prefix, removed, "Invalidated prefix on disk");
        removed
    }

    /// Delete every file last modified before `timestamp_millis`
    pub fn invalidate_older_than(&self, timestamp_millis: i64) -> usize {
        let removed = self.remove_where(|entry| entry.modified_millis < timestamp_millis);
        debug!(timestamp_millis, removed, "Invalidated old files on disk");
        removed
    }

    fn remove_where<F>(&self, mut predicate: F) -> usize
    where
        F: FnMut(&DiskEntry) -> bool,
    {
        self.entries()
            .into_iter()
            .filter(|entry| predicate(entry))
            .filter(|entry| self.remove_file(&entry.path))
            .count()
    }

    /// Delete the whole tree and start over with a fresh marker
    pub fn clear(&self) -> Result<()> {
        let _guards: Vec<_> = self.path_locks.iter().map(|lock| lock.lock()).collect();
        match fs::remove_dir_all(&self.root) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(Error::disk(&self.root, "remove", e)),
        }
        fs::create_dir_all(&self.root).map_err(|e| Error::disk(&self.root, "create directory", e))?;
        write_atomic(&self.version_path(), self.version_string().as_bytes())?;

        info!(root = %self.root.display(), "Disk tier cleared");
        Ok(())
    }

    /// Total bytes held in cache files
    pub fn size_bytes(&self) -> u64 {
        self.entries().iter().map(|e| e.size_bytes).sum()
    }

    /// Number of cache files
    pub fn file_count(&self) -> usize {
        self.entries().len()
    }

    /// Walk the tree and describe every well-formed cache file name
    pub fn entries(&self) -> Vec<DiskEntry> {
        self.walk_files()
            .filter_map(|entry| {
                let name = entry.file_name().to_str()?;
                let (key, hash) = parse_file_name(name)?;
                let metadata = entry.metadata().ok()?;
                Some(DiskEntry {
                    path: entry.path().to_path_buf(),
                    key: key.to_string(),
                    content_hash: hash.to_string(),
                    size_bytes: metadata.len(),
                    modified_millis: metadata.modified().map(epoch_millis).unwrap_or(0),
                })
            })
            .collect()
    }

    /// Leftover temp files with their modification times
    pub fn temp_files(&self) -> Vec<(PathBuf, i64)> {
        self.walk_files()
            .filter(|entry| entry.file_name().to_str().is_some_and(is_temp_file))
            .filter_map(|entry| {
                let modified = entry.metadata().ok()?.modified().ok()?;
                Some((entry.path().to_path_buf(), epoch_millis(modified)))
            })
            .collect()
    }

    fn walk_files(&self) -> impl Iterator<Item = walkdir::DirEntry> {
        WalkDir::new(&self.root)
            .min_depth(1)
            .into_iter()
            .filter_map(|entry| match entry {
                Ok(entry) => Some(entry),
                Err(e) => {
                    debug!(error = %e, "Skipping unreadable path during walk");
                    None
                }
            })
            .filter(|entry| entry.file_type().is_file())
    }

    /// Delete a file that failed to decode and count it as a disk error
    pub(crate) fn discard_corrupt(&self, path: &Path, reason: &Error) {
        self.stats.record_disk_error();
        warn!(path = %path.display(), error = %reason, "Corrupted cache file removed");
        self.remove_file(path);
    }

    /// Remove a file, returning true if this call deleted it
    pub(crate) fn remove_file(&self, path: &Path) -> bool {
        let _guard = self.lock_path(path);
        match fs::remove_file(path) {
            Ok(()) => true,
            Err(e) if e.kind() == ErrorKind::NotFound => false,
            Err(e) => {
                self.stats.record_disk_error();
                warn!(path = %path.display(), error = %e, "Failed to remove cache file");
                false
            }
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::clock::ManualClock;
    use tempfile::TempDir;

    const T0: i64 = 1_700_000_000_000;

    fn open_tier(dir: &Path, compression: CompressionAlgorithm, max_age: i64) -> (DiskTier, Arc<ManualClock>, Arc<StatsCollector>) {
        let clock = Arc::new(ManualClock::new(T0));
        let stats = Arc::new(StatsCollector::new());
        let tier = DiskTier::open(
            dir,
            compression,
            ExpirationPolicy::new(max_age),
            Arc::clone(&stats),
            clock.clone(),
        )
        .unwrap();
        (tier, clock, stats)
    }

    #[test]
    fn test_sanitize() {
        assert_eq!(sanitize("com.foo.Bar"), "com_foo_Bar");
        assert_eq!(sanitize("../escape"), "___escape");
        assert_eq!(sanitize("plain-key"), "plain-key");
    }

    #[test]
    fn test_parse_file_name() {
        assert_eq!(
            parse_file_name("com_foo_Bar-abcd1234.cache"),
            Some(("com_foo_Bar", "abcd1234"))
        );
        assert_eq!(
            parse_file_name("my-dashed-key-abcd.cache"),
            Some(("my-dashed-key", "abcd"))
        );
        assert_eq!(parse_file_name("nodash.cache"), None);
        assert_eq!(parse_file_name("k-abcd.tmp.1234"), None);
    }

    #[test]
    fn test_path_layout() {
        let dir = TempDir::new().unwrap();
        let (tier, _, _) = open_tier(dir.path(), CompressionAlgorithm::Gzip, 0);

        let path = tier.path_for("com.foo.Bar", "abcd1234");
        assert_eq!(
            path,
            dir.path().join("ab").join("cd").join("com_foo_Bar-abcd1234.cache")
        );
        // Short hashes pad instead of panicking
        let short = tier.path_for("k", "a");
        assert_eq!(short, dir.path().join("a_").join("__").join("k-a.cache"));
    }

    #[test]
    fn test_store_load_roundtrip() {
        for compression in [CompressionAlgorithm::Gzip, CompressionAlgorithm::None] {
            let dir = TempDir::new().unwrap();
            let (tier, _, _) = open_tier(dir.path(), compression, 0);

            let payload = b"generated bytes generated bytes generated bytes".to_vec();
            let path = tier.store("com.foo.Bar", "abcd1234", &payload, T0).unwrap();
            assert!(path.exists());

            let record = tier.load("com.foo.Bar", "abcd1234").unwrap();
            assert_eq!(record.timestamp_millis, T0);
            assert_eq!(record.payload, payload);
        }
    }

    #[test]
    fn test_stored_file_format() {
        let dir = TempDir::new().unwrap();
        let (tier, _, _) = open_tier(dir.path(), CompressionAlgorithm::None, 0);

        let path = tier.store("k", "abcd", &[9, 8, 7], T0).unwrap();
        let raw = fs::read(path).unwrap();
        assert_eq!(&raw[..8], &T0.to_be_bytes());
        assert_eq!(&raw[8..], &[9, 8, 7]);
    }

    #[test]
    fn test_missing_is_none() {
        let dir = TempDir::new().unwrap();
        let (tier, _, stats) = open_tier(dir.path(), CompressionAlgorithm::Gzip, 0);
        assert!(tier.load("absent", "abcd").is_none());
        assert_eq!(stats.disk_errors(), 0);
    }

    #[test]
    fn test_hashes_coexist() {
        let dir = TempDir::new().unwrap();
        let (tier, _, _) = open_tier(dir.path(), CompressionAlgorithm::Gzip, 0);

        tier.store("k", "aaaa1111", b"one", T0).unwrap();
        tier.store("k", "bbbb2222", b"two", T0).unwrap();

        assert_eq!(tier.file_count(), 2);
        assert_eq!(tier.load("k", "aaaa1111").unwrap().payload, b"one");
        assert_eq!(tier.load("k", "bbbb2222").unwrap().payload, b"two");
    }

    #[test]
    fn test_expired_file_deleted() {
        let dir = TempDir::new().unwrap();
        let (tier, clock, _) = open_tier(dir.path(), CompressionAlgorithm::Gzip, 1_000);

        let path = tier.store("k", "abcd", b"x", T0).unwrap();
        clock.set(T0 + 1_000);
        assert!(tier.load("k", "abcd").is_some());

        clock.set(T0 + 1_001);
        assert!(tier.load("k", "abcd").is_none());
        assert!(!path.exists());
    }

    #[test]
    fn test_truncated_file_is_deleted_and_counted() {
        let dir = TempDir::new().unwrap();
        let (tier, _, stats) = open_tier(dir.path(), CompressionAlgorithm::Gzip, 0);

        let path = tier.path_for("k", "abcd");
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, [1, 2, 3]).unwrap();

        assert!(tier.load("k", "abcd").is_none());
        assert!(!path.exists());
        assert_eq!(stats.disk_errors(), 1);
    }

    #[test]
    fn test_garbage_payload_is_deleted_and_counted() {
        let dir = TempDir::new().unwrap();
        let (tier, _, stats) = open_tier(dir.path(), CompressionAlgorithm::Gzip, 0);

        let path = tier.path_for("k", "abcd");
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, record::encode(T0, b"this is not gzip data")).unwrap();

        assert!(tier.load("k", "abcd").is_none());
        assert!(!path.exists());
        assert_eq!(stats.disk_errors(), 1);
    }

    #[test]
    fn test_invalidate_is_exact() {
        let dir = TempDir::new().unwrap();
        let (tier, _, _) = open_tier(dir.path(), CompressionAlgorithm::Gzip, 0);

        tier.store("com.foo.Bar", "aaaa1111", b"1", T0).unwrap();
        tier.store("com.foo.Bar", "bbbb2222", b"2", T0).unwrap();
        tier.store("com.foo.Bar-Impl", "cccc3333", b"3", T0).unwrap();

        assert_eq!(tier.invalidate("com.foo.Bar"), 2);
        assert!(tier.load("com.foo.Bar", "aaaa1111").is_none());
        assert!(tier.load("com.foo.Bar", "bbbb2222").is_none());
        assert!(tier.load("com.foo.Bar-Impl", "cccc3333").is_some());
    }

    #[test]
    fn test_invalidate_prefix() {
        let dir = TempDir::new().unwrap();
        let (tier, _, _) = open_tier(dir.path(), CompressionAlgorithm::Gzip, 0);

        tier.store("com.foo.A", "aaaa", b"1", T0).unwrap();
        tier.store("com.foo.B", "bbbb", b"2", T0).unwrap();
        tier.store("org.bar.C", "cccc", b"3", T0).unwrap();

        assert_eq!(tier.invalidate_prefix("com.foo."), 2);
        assert_eq!(tier.file_count(), 1);
        assert!(tier.load("org.bar.C", "cccc").is_some());
    }

    #[test]
    fn test_invalidate_older_than_uses_mtime() {
        let dir = TempDir::new().unwrap();
        let (tier, _, _) = open_tier(dir.path(), CompressionAlgorithm::Gzip, 0);

        tier.store("k1", "aaaa", b"1", T0).unwrap();
        tier.store("k2", "bbbb", b"2", T0).unwrap();

        // Nothing was modified before the epoch
        assert_eq!(tier.invalidate_older_than(0), 0);

        let future = epoch_millis(std::time::SystemTime::now()) + 60_000;
        assert_eq!(tier.invalidate_older_than(future), 2);
        assert_eq!(tier.file_count(), 0);
    }

    #[test]
    fn test_clear_and_size() {
        let dir = TempDir::new().unwrap();
        let root = dir.path().join("cache");
        let (tier, _, _) = open_tier(&root, CompressionAlgorithm::None, 0);

        tier.store("a", "aaaa", &[0u8; 100], T0).unwrap();
        tier.store("b", "bbbb", &[0u8; 50], T0).unwrap();
        assert_eq!(tier.file_count(), 2);
        assert_eq!(tier.size_bytes(), 100 + 50 + 2 * record::HEADER_LEN as u64);

        tier.clear().unwrap();
        assert_eq!(tier.file_count(), 0);
        assert!(root.join(VERSION_FILE).exists());

        // Still usable afterwards
        tier.store("a", "aaaa", b"again", T0).unwrap();
        assert!(tier.load("a", "aaaa").is_some());
    }

    #[test]
    fn test_version_marker_written() {
        let dir = TempDir::new().unwrap();
        let (tier, _, _) = open_tier(dir.path(), CompressionAlgorithm::Gzip, 0);

        let marker = fs::read_to_string(dir.path().join(VERSION_FILE)).unwrap();
        assert_eq!(marker, tier.version_string());
        assert!(marker.ends_with(";gzip"));
    }

    #[test]
    fn test_version_mismatch_wipes() {
        let dir = TempDir::new().unwrap();
        {
            let (tier, _, _) = open_tier(dir.path(), CompressionAlgorithm::Gzip, 0);
            tier.store("k", "abcd", b"gzipped", T0).unwrap();
        }

        // Same format, same compression: content survives
        {
            let (tier, _, _) = open_tier(dir.path(), CompressionAlgorithm::Gzip, 0);
            assert_eq!(tier.file_count(), 1);
        }

        // Toggling compression changes the marker
        let (tier, _, _) = open_tier(dir.path(), CompressionAlgorithm::None, 0);
        assert_eq!(tier.file_count(), 0);
        assert!(fs::read_to_string(dir.path().join(VERSION_FILE))
            .unwrap()
            .ends_with(";raw"));
    }

    #[test]
    fn test_wipe_leaves_foreign_files() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("notes.txt"), b"keep me").unwrap();
        fs::create_dir_all(dir.path().join("ab").join("cd")).unwrap();
        fs::write(dir.path().join("ab").join("cd").join("k-abcd.cache"), b"old").unwrap();
        fs::write(dir.path().join(VERSION_FILE), b"ancient;gzip").unwrap();

        let (tier, _, _) = open_tier(dir.path(), CompressionAlgorithm::Gzip, 0);
        assert_eq!(tier.file_count(), 0);
        assert!(dir.path().join("notes.txt").exists());
    }

    #[test]
    fn test_store_survives_pruned_shard() {
        let dir = TempDir::new().unwrap();
        let (tier, _, _) = open_tier(dir.path(), CompressionAlgorithm::Gzip, 0);

        tier.store("k", "abcd", b"1", T0).unwrap();
        fs::remove_dir_all(dir.path().join("ab")).unwrap();
        tier.store("k", "abcd", b"2", T0).unwrap();
        assert_eq!(tier.load("k", "abcd").unwrap().payload, b"2");
    }

    #[test]
    fn test_temp_files_listed_but_not_counted() {
        let dir = TempDir::new().unwrap();
        let (tier, _, _) = open_tier(dir.path(), CompressionAlgorithm::Gzip, 0);

        let path = tier.path_for("k", "abcd");
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path.with_extension("tmp.deadbeef"), b"partial").unwrap();

        assert_eq!(tier.file_count(), 0);
        assert_eq!(tier.temp_files().len(), 1);
    }

    #[test]
    fn test_entries_describe_files() {
        let dir = TempDir::new().unwrap();
        let (tier, _, _) = open_tier(dir.path(), CompressionAlgorithm::None, 0);
        tier.store("com.foo.Bar", "abcd1234", &[1, 2, 3], T0).unwrap();

        let entries = tier.entries();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].key, "com_foo_Bar");
        assert_eq!(entries[0].content_hash, "abcd1234");
        assert_eq!(entries[0].size_bytes, 11);
        assert!(entries[0].modified_millis > 0);
    }
}
