//! Cache Configuration
//!
//! Immutable value object fixed at construction. Keys deserialise from the
//! camelCase option names (`cacheDirectory`, `maxCacheAgeMillis`, ...).

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::health::HealthThresholds;
use super::maintenance::MaintenanceConfig;
use super::{APP_NAME, DEFAULT_MAX_AGE_MILLIS};
use crate::error::{Error, Result};

/// Smallest accepted write-back pool size
pub const MIN_DISK_IO_THREADS: usize = 1;

/// Largest accepted write-back pool size
pub const MAX_DISK_IO_THREADS: usize = 10;

/// How `put` persists to the disk tier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WriteMode {
    /// Run the disk write inline before `put` returns
    Sync,
    /// Hand the disk write to the write-back pool
    #[default]
    Async,
}

impl std::fmt::Display for WriteMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WriteMode::Sync => write!(f, "sync"),
            WriteMode::Async => write!(f, "async"),
        }
    }
}

/// Cache configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CacheConfig {
    /// Root of the on-disk tier
    pub cache_directory: PathBuf,
    /// Enable the on-disk tier
    pub enable_disk_cache: bool,
    /// Gzip payloads on disk
    pub compress_cache: bool,
    /// Entry lifetime in milliseconds (<= 0 = unlimited)
    pub max_cache_age_millis: i64,
    /// Memory tier capacity in entries
    pub max_memory_entries: usize,
    /// Disk size limit in MB (advisory, reported by health only)
    #[serde(rename = "maxDiskSizeMB")]
    pub max_disk_size_mb: u64,
    /// Write-back worker count (1-10)
    #[serde(rename = "diskIOThreads")]
    pub disk_io_threads: usize,
    /// Synchronous or asynchronous disk persistence
    pub write_mode: WriteMode,
    /// How long shutdown waits for queued writes before cancelling them
    pub shutdown_grace_period_millis: u64,
    /// Health check thresholds
    pub health: HealthThresholds,
    /// Maintenance settings
    pub maintenance: MaintenanceConfig,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            cache_directory: default_cache_directory(),
            enable_disk_cache: true,
            compress_cache: true,
            max_cache_age_millis: DEFAULT_MAX_AGE_MILLIS,
            max_memory_entries: 1000,
            max_disk_size_mb: 500,
            disk_io_threads: 2,
            write_mode: WriteMode::Async,
            shutdown_grace_period_millis: 5_000,
            health: HealthThresholds::default(),
            maintenance: MaintenanceConfig::default(),
        }
    }
}

/// `<home>/.cache/artifact-cache`, or the temp dir when there is no home
pub fn default_cache_directory() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join(".cache")
        .join(APP_NAME)
}

impl CacheConfig {
    /// Default configuration rooted at `dir`
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            cache_directory: dir.into(),
            ..Default::default()
        }
    }

    /// Parse a YAML document
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Load a YAML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| Error::disk(path, "read config file", e))?;
        Self::from_yaml_str(&text)
    }

    pub fn with_disk_cache(mut self, enabled: bool) -> Self {
        self.enable_disk_cache = enabled;
        self
    }

    pub fn with_compression(mut self, enabled: bool) -> Self {
        self.compress_cache = enabled;
        self
    }

    pub fn with_max_age_millis(mut self, millis: i64) -> Self {
        self.max_cache_age_millis = millis;
        self
    }

    pub fn with_max_memory_entries(mut self, entries: usize) -> Self {
        self.max_memory_entries = entries;
        self
    }

    pub fn with_max_disk_size_mb(mut self, mb: u64) -> Self {
        self.max_disk_size_mb = mb;
        self
    }

    pub fn with_disk_io_threads(mut self, threads: usize) -> Self {
        self.disk_io_threads = threads;
        self
    }

    pub fn with_write_mode(mut self, mode: WriteMode) -> Self {
        self.write_mode = mode;
        self
    }

    pub fn with_shutdown_grace_period(mut self, grace: Duration) -> Self {
        self.shutdown_grace_period_millis = grace.as_millis() as u64;
        self
    }

    pub fn with_health(mut self, health: HealthThresholds) -> Self {
        self.health = health;
        self
    }

    pub fn with_maintenance(mut self, maintenance: MaintenanceConfig) -> Self {
        self.maintenance = maintenance;
        self
    }

    /// Reject configurations the cache cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.max_memory_entries == 0 {
            return Err(Error::Config(
                "maxMemoryEntries must be at least 1".to_string(),
            ));
        }

        if !(MIN_DISK_IO_THREADS..=MAX_DISK_IO_THREADS).contains(&self.disk_io_threads) {
            return Err(Error::Config(format!(
                "diskIOThreads must be between {} and {}, got {}",
                MIN_DISK_IO_THREADS, MAX_DISK_IO_THREADS, self.disk_io_threads
            )));
        }

        if self.enable_disk_cache && self.cache_directory.as_os_str().is_empty() {
            return Err(Error::Config(
                "cacheDirectory must be set when the disk cache is enabled".to_string(),
            ));
        }

        self.health.validate()?;

        Ok(())
    }

    /// Advisory disk limit in bytes
    pub fn max_disk_size_bytes(&self) -> u64 {
        self.max_disk_size_mb.saturating_mul(1024 * 1024)
    }

    pub fn shutdown_grace_period(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_period_millis)
    }

    /// True when entries never expire
    pub fn is_unlimited_age(&self) -> bool {
        self.max_cache_age_millis <= 0
    }
}

// =============================================================================
// Tests
// =============================================================================
