//! Content-Addressed Artifact Cache
//!
//! Avoids regenerating an expensive byte blob for a logical key once it has
//! been produced for a given content fingerprint.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────────┐
//! │                           ArtifactCache                                  │
//! ├──────────────────────────────────────────────────────────────────────────┤
//! │  get(key, hash)                        put(key, hash, bytes)             │
//! │       │                                     │                            │
//! │       ▼                                     ▼                            │
//! │  ┌────────────────┐   promote on hit   ┌────────────────┐                │
//! │  │ MemoryTier     │ ◄───────────────── │ DiskTier       │                │
//! │  │ (LRU, bounded) │                    │ (sharded files)│                │
//! │  └────────────────┘                    └────────────────┘                │
//! │                                             ▲                            │
//! │                              WriteBackScheduler (sync | async)           │
//! │                                                                          │
//! │  ExpirationPolicy · StatsCollector · MaintenanceJob · HealthChecker      │
//! └──────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Guarantees
//!
//! - The memory tier never holds more than `maxMemoryEntries` entries
//! - Disk paths are a pure function of key and hash
//! - Readers never observe a partially written file
//! - Disk failures become misses and are counted, never raised

pub mod clock;
pub mod compression;
pub mod config;
pub mod disk;
pub mod expiration;
pub mod fingerprint;
pub mod health;
pub mod maintenance;
pub mod manager;
pub mod memory;
pub mod record;
pub mod stats;
pub mod writeback;

mod proptest;

pub use clock::{Clock, ManualClock, SystemClock};
pub use compression::{CompressionAlgorithm, Compressor, GzipCompressor, NoopCompressor};
pub use config::{CacheConfig, WriteMode};
pub use disk::{DiskEntry, DiskTier};
pub use expiration::{is_expired, ExpirationPolicy};
pub use fingerprint::{Fingerprint, HashAlgorithm};
pub use health::{HealthCheckResult, HealthChecker, HealthReport, HealthStatus, HealthThresholds};
pub use maintenance::{MaintenanceConfig, MaintenanceJob, MaintenanceReport};
pub use manager::{ArtifactCache, CacheRegistry};
pub use memory::{MemoryEntry, MemoryTier};
pub use record::DiskRecord;
pub use stats::{StatsCollector, StatsSnapshot};
pub use writeback::{SchedulerState, WriteBackScheduler};

/// Application name, used for the default cache directory
pub const APP_NAME: &str = "artifact-cache";

/// On-disk format identifier written to the version marker
pub const FORMAT_VERSION: &str = "artifact-cache-v1";

/// Version marker file at the cache root
pub const VERSION_FILE: &str = ".version";

/// Extension of cache record files
pub const CACHE_EXTENSION: &str = "cache";

/// Default entry lifetime (7 days)
pub const DEFAULT_MAX_AGE_MILLIS: i64 = 7 * 24 * 60 * 60 * 1000;

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_max_age_is_seven_days() {
        assert_eq!(DEFAULT_MAX_AGE_MILLIS, 604_800_000);
    }

    #[test]
    fn test_marker_is_hidden_file() {
        assert!(VERSION_FILE.starts_with('.'));
        assert!(!VERSION_FILE.ends_with(CACHE_EXTENSION));
    }
}
