//! Artifact Cache - persistent content-addressed cache for derived bytes
//!
//! Keeps an expensive-to-produce byte blob for a logical key once it has been
//! computed for a specific content fingerprint, so the next run can skip the
//! work.
//!
//! # Architecture
//!
//! Two tiers behind one facade:
//!
//! ```text
//! get → MemoryTier (LRU) → DiskTier (sharded, gzip) → miss
//! put → MemoryTier, then WriteBackScheduler → DiskTier
//! ```
//!
//! # Example
//!
//! ```no_run
//! use artifact_cache::{ArtifactCache, CacheConfig, Fingerprint};
//!
//! # fn main() -> artifact_cache::Result<()> {
//! let cache = ArtifactCache::open(CacheConfig::new("/tmp/artifact-cache"))?;
//! let source = b"class Bar {}";
//! let hash = Fingerprint::default().of_bytes(source);
//!
//! if cache.get("com.foo.Bar", &hash).is_none() {
//!     cache.put("com.foo.Bar", &hash, vec![0xca, 0xfe, 0xba, 0xbe]);
//! }
//! cache.shutdown();
//! # Ok(())
//! # }
//! ```
//!
//! # Modules
//!
//! - [`cache`] - tiers, scheduler, maintenance, health and the facade
//! - [`error`] - Error types

pub mod cache;
pub mod error;

// Re-export commonly used types
pub use cache::{
    ArtifactCache, CacheConfig, CacheRegistry, Fingerprint, HashAlgorithm, HealthReport,
    HealthStatus, MaintenanceConfig, MaintenanceReport, StatsSnapshot, WriteMode,
};
pub use error::{Error, Result};
