//! Error types for the artifact cache

use std::path::PathBuf;

use thiserror::Error;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the artifact cache
///
/// Only [`Error::Config`] and [`Error::Hashing`] ever reach callers of the
/// cache facade. Disk, corruption and compression failures are recovered
/// inside the tiers and surface as cache misses plus a disk-error count.
#[derive(Error, Debug)]
pub enum Error {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// I/O error against a specific cache path
    #[error("Failed to {operation} {}: {source}", path.display())]
    DiskIo {
        path: PathBuf,
        operation: &'static str,
        #[source]
        source: std::io::Error,
    },

    /// On-disk record could not be decoded
    #[error("Corrupted cache file {}: {reason}", path.display())]
    Corrupted { path: PathBuf, reason: String },

    // =========================================================================
    // Compression Errors
    // =========================================================================
    /// Compression failed
    #[error("Compression with {algorithm} failed: {reason}")]
    CompressionFailed { algorithm: String, reason: String },

    /// Decompression failed
    #[error("Decompression with {algorithm} failed: {reason}")]
    DecompressionFailed { algorithm: String, reason: String },

    // =========================================================================
    // Construction Errors
    // =========================================================================
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Configuration file could not be parsed
    #[error("Failed to parse configuration: {0}")]
    ConfigParse(#[from] serde_yaml::Error),

    /// Digest algorithm unavailable
    #[error("Hashing error: {0}")]
    Hashing(String),

    /// Write-back pool did not drain in time
    #[error("Shutdown error: {0}")]
    Shutdown(String),
}

impl Error {
    /// Wrap an I/O error with the path and operation it failed on
    pub fn disk(path: impl Into<PathBuf>, operation: &'static str, source: std::io::Error) -> Self {
        Error::DiskIo {
            path: path.into(),
            operation,
            source,
        }
    }

    /// True for failures the cache recovers from by treating the entry as absent
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Error::Io(_)
                | Error::DiskIo { .. }
                | Error::Corrupted { .. }
                | Error::CompressionFailed { .. }
                | Error::DecompressionFailed { .. }
        )
    }
}

// =============================================================================
// Tests
// =============================================================================
