//! On-Demand Maintenance
//!
//! Runs four independent passes over the tiers. A failure on one file is
//! recorded in the report and the pass moves on; a failed pass never stops
//! the ones after it.
//!
//! 1. `clean_expired` - drop TTL-expired entries from both tiers
//! 2. `clean_orphaned` - drop old disk entries the memory tier no longer holds,
//!    plus stale temp files (only the temp files when `cleanOrphans` is off)
//! 3. `compact` - recompress gzip payloads at maximum ratio
//! 4. `prune_empty_directories` - remove empty shard directories

use std::collections::HashSet;
use std::fs::{self, File};
use std::io::{ErrorKind, Read};
use std::path::Path;
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use walkdir::WalkDir;

use super::clock::Clock;
use super::compression::{CompressionAlgorithm, Compressor, GzipCompressor};
use super::disk::{sanitize, DiskTier};
use super::expiration::ExpirationPolicy;
use super::memory::MemoryTier;
use super::record::{self, DiskRecord, HEADER_LEN};
use crate::error::{Error, Result};

/// Maintenance settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MaintenanceConfig {
    /// Minimum age before a disk entry absent from memory counts as orphaned
    pub orphan_grace_period_millis: i64,
    /// Treat disk entries missing from memory as orphans
    ///
    /// Only meaningful for a long-lived instance whose memory tier reflects
    /// recent use. Stale temp files are removed either way.
    pub clean_orphans: bool,
    /// Run the recompaction pass when compression is enabled
    pub compact: bool,
}

impl Default for MaintenanceConfig {
    fn default() -> Self {
        Self {
            orphan_grace_period_millis: 24 * 60 * 60 * 1000,
            clean_orphans: true,
            compact: true,
        }
    }
}

/// What a maintenance run did
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MaintenanceReport {
    pub expired_memory_entries: usize,
    pub expired_disk_files: usize,
    pub orphaned_files: usize,
    pub stale_temp_files: usize,
    pub compacted_files: usize,
    pub corrupt_files: usize,
    pub bytes_reclaimed: u64,
    pub directories_pruned: usize,
    /// Per-file and per-pass failures, prefixed with the pass name
    pub errors: Vec<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub duration_ms: u64,
}

impl MaintenanceReport {
    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
    }

    fn error(&mut self, step: &str, detail: impl std::fmt::Display) {
        self.errors.push(format!("{}: {}", step, detail));
    }
}

/// One maintenance run over a cache's tiers
pub struct MaintenanceJob<'a> {
    memory: &'a MemoryTier,
    disk: Option<&'a DiskTier>,
    policy: ExpirationPolicy,
    config: &'a MaintenanceConfig,
    clock: &'a dyn Clock,
}

impl<'a> MaintenanceJob<'a> {
    pub fn new(
        memory: &'a MemoryTier,
        disk: Option<&'a DiskTier>,
        policy: ExpirationPolicy,
        config: &'a MaintenanceConfig,
        clock: &'a dyn Clock,
    ) -> Self {
        Self {
            memory,
            disk,
            policy,
            config,
            clock,
        }
    }

    /// Run every pass in order
    pub fn run(&self) -> MaintenanceReport {
        let started = Instant::now();
        let mut report = MaintenanceReport {
            started_at: Some(Utc::now()),
            ..Default::default()
        };

        self.clean_expired(&mut report);
        if self.config.clean_orphans {
            self.clean_orphaned(&mut report);
        } else {
            self.clean_temp_files(&mut report);
        }
        if self.config.compact {
            self.compact(&mut report);
        }
        self.prune_empty_directories(&mut report);

        report.duration_ms = started.elapsed().as_millis() as u64;
        info!(
            expired = report.expired_memory_entries + report.expired_disk_files,
            orphaned = report.orphaned_files,
            compacted = report.compacted_files,
            corrupt = report.corrupt_files,
            pruned = report.directories_pruned,
            errors = report.errors.len(),
            duration_ms = report.duration_ms,
            "Maintenance finished"
        );
        report
    }

    /// Remove expired entries from both tiers
    pub fn clean_expired(&self, report: &mut MaintenanceReport) {
        if self.policy.is_unlimited() {
            return;
        }
        let now = self.clock.now_millis();

        report.expired_memory_entries = self
            .memory
            .remove_if(|entry| self.policy.is_expired(entry.created_at_millis, now))
            .len();

        let Some(disk) = self.disk else {
            return;
        };
        for entry in disk.entries() {
            match read_header(&entry.path) {
                Ok(timestamp) => {
                    if self.policy.is_expired(timestamp, now) && disk.remove_file(&entry.path) {
                        report.expired_disk_files += 1;
                    }
                }
                Err(e @ Error::Corrupted { .. }) => {
                    disk.discard_corrupt(&entry.path, &e);
                    report.corrupt_files += 1;
                }
                Err(Error::DiskIo { source, .. }) if source.kind() == ErrorKind::NotFound => {}
                Err(e) => report.error("clean_expired", e),
            }
        }
    }

    /// Remove disk entries that are not in memory and older than the grace
    /// period, plus temp files left behind by interrupted writes
    pub fn clean_orphaned(&self, report: &mut MaintenanceReport) {
        let Some(disk) = self.disk else {
            return;
        };

        let live: HashSet<(String, String)> = self
            .memory
            .snapshot()
            .into_iter()
            .map(|entry| (sanitize(&entry.key), entry.content_hash))
            .collect();

        for entry in disk.entries() {
            let key = (entry.key, entry.content_hash);
            if !live.contains(&key) && self.is_stale(entry.modified_millis) && disk.remove_file(&entry.path) {
                debug!(path = %entry.path.display(), "Orphaned cache file removed");
                report.orphaned_files += 1;
            }
        }

        self.clean_temp_files(report);
    }

    /// Remove temp files left behind by interrupted writes
    pub fn clean_temp_files(&self, report: &mut MaintenanceReport) {
        let Some(disk) = self.disk else {
            return;
        };
        for (path, modified) in disk.temp_files() {
            if self.is_stale(modified) && disk.remove_file(&path) {
                report.stale_temp_files += 1;
            }
        }
    }

    /// Older than the orphan grace period
    fn is_stale(&self, modified_millis: i64) -> bool {
        self.clock.now_millis().saturating_sub(modified_millis) > self.config.orphan_grace_period_millis
    }

    /// Recompress every gzip payload at maximum ratio
    ///
    /// Files are only rewritten when the result is smaller. The original
    /// timestamp header is preserved.
    pub fn compact(&self, report: &mut MaintenanceReport) {
        let Some(disk) = self.disk else {
            return;
        };
        if disk.compression() != CompressionAlgorithm::Gzip {
            return;
        }
        let gzip = GzipCompressor::best();

        for entry in disk.entries() {
            match self.compact_file(disk, &gzip, &entry.path) {
                Ok(Some(saved)) => {
                    report.compacted_files += 1;
                    report.bytes_reclaimed += saved;
                }
                Ok(None) => {}
                Err(e @ (Error::Corrupted { .. } | Error::DecompressionFailed { .. })) => {
                    disk.discard_corrupt(&entry.path, &e);
                    report.corrupt_files += 1;
                }
                Err(Error::DiskIo { source, .. }) if source.kind() == ErrorKind::NotFound => {}
                Err(e) => report.error("compact", e),
            }
        }
    }

    fn compact_file(&self, disk: &DiskTier, gzip: &GzipCompressor, path: &Path) -> Result<Option<u64>> {
        let saved = disk.rewrite(path, |data| {
            let stored = DiskRecord::decode(path, data)?;
            let plain = gzip.decompress(&stored.payload)?;
            let recompressed = gzip.compress(&plain)?;

            if recompressed.len() >= stored.payload.len() {
                return Ok(None);
            }
            Ok(Some(record::encode(stored.timestamp_millis, &recompressed)))
        })?;

        if let Some(saved) = saved {
            debug!(path = %path.display(), saved, "Compacted cache file");
        }
        Ok(saved)
    }

    /// Remove empty directories below the root, deepest first
    pub fn prune_empty_directories(&self, report: &mut MaintenanceReport) {
        let Some(disk) = self.disk else {
            return;
        };

        let dirs = WalkDir::new(disk.root())
            .min_depth(1)
            .contents_first(true)
            .into_iter()
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_type().is_dir());

        for dir in dirs {
            let path = dir.path();
            if !dir_is_empty(path) {
                continue;
            }
            match fs::remove_dir(path) {
                Ok(()) => report.directories_pruned += 1,
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                // Repopulated by a concurrent write
                Err(_) if !dir_is_empty(path) => {}
                Err(e) => report.error("prune_empty_directories", format!("{}: {}", path.display(), e)),
            }
        }
    }
}

fn dir_is_empty(path: &Path) -> bool {
    fs::read_dir(path)
        .map(|mut children| children.next().is_none())
        .unwrap_or(false)
}

/// Read only the timestamp header of a cache file
fn read_header(path: &Path) -> Result<i64> {
    let mut header = [0u8; HEADER_LEN];
    let mut file = File::open(path).map_err(|e| Error::disk(path, "open", e))?;
    match file.read_exact(&mut header) {
        Ok(()) => record::read_timestamp(path, &header),
        Err(e) if e.kind() == ErrorKind::UnexpectedEof => Err(Error::Corrupted {
            path: path.to_path_buf(),
            reason: "file is shorter than the timestamp header".into(),
        }),
        Err(e) => Err(Error::disk(path, "read", e)),
    }
}

// =============================================================================
// Tests
// =============================================================================
