//! Payload Compression
//!
//! The on-disk format carries no per-file algorithm tag: whether payloads are
//! gzipped is a property of the whole cache directory, recorded in its
//! version marker. Compression level can still vary per write, which is what
//! recompaction relies on.
//!
//! # Example
//!
//! ```
//! use artifact_cache::cache::compression::{Compressor, GzipCompressor};
//!
//! let gzip = GzipCompressor::new();
//! let data = b"Hello, this is test data that should compress well!";
//!
//! let compressed = gzip.compress(data).unwrap();
//! let decompressed = gzip.decompress(&compressed).unwrap();
//! assert_eq!(decompressed.as_slice(), data);
//! ```

use std::io::{Read, Write};

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;

use crate::error::{Error, Result};

// =============================================================================
// Compression Algorithm
// =============================================================================

/// Supported payload encodings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum CompressionAlgorithm {
    /// Stored as-is
    None,
    /// Gzip (RFC 1952)
    #[default]
    Gzip,
}

impl CompressionAlgorithm {
    /// Algorithm selected by the `compressCache` flag
    pub fn from_enabled(enabled: bool) -> Self {
        if enabled {
            CompressionAlgorithm::Gzip
        } else {
            CompressionAlgorithm::None
        }
    }

    /// Get human-readable name
    pub fn name(&self) -> &'static str {
        match self {
            CompressionAlgorithm::None => "raw",
            CompressionAlgorithm::Gzip => "gzip",
        }
    }
}

impl std::fmt::Display for CompressionAlgorithm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

// =============================================================================
// Compressor Trait
// =============================================================================

/// Trait for payload codecs
pub trait Compressor: Send + Sync {
    /// Get the algorithm identifier
    fn algorithm(&self) -> CompressionAlgorithm;

    /// Compress data
    fn compress(&self, data: &[u8]) -> Result<Vec<u8>>;

    /// Decompress data
    fn decompress(&self, data: &[u8]) -> Result<Vec<u8>>;
}

/// Codec for the given algorithm at its default level
pub fn compressor_for(algorithm: CompressionAlgorithm) -> Box<dyn Compressor> {
    match algorithm {
        CompressionAlgorithm::None => Box::new(NoopCompressor),
        CompressionAlgorithm::Gzip => Box::new(GzipCompressor::new()),
    }
}

// =============================================================================
// No-Op Compressor
// =============================================================================

/// Pass-through compressor (no compression)
pub struct NoopCompressor;

impl Compressor for NoopCompressor {
    fn algorithm(&self) -> CompressionAlgorithm {
        CompressionAlgorithm::None
    }

    fn compress(&self, data: &[u8]) -> Result<Vec<u8>> {
        Ok(data.to_vec())
    }

    fn decompress(&self, data: &[u8]) -> Result<Vec<u8>> {
        Ok(data.to_vec())
    }
}

// =============================================================================
// Gzip Compressor
// =============================================================================

/// Gzip compressor
pub struct GzipCompressor {
    level: Compression,
}

impl GzipCompressor {
    /// Gzip at the default level (6)
    pub fn new() -> Self {
        Self {
            level: Compression::default(),
        }
    }

    /// Gzip at maximum ratio, used by recompaction
    pub fn best() -> Self {
        Self {
            level: Compression::best(),
        }
    }

    /// Create with custom compression level (0-9)
    pub fn with_level(level: u32) -> Self {
        Self {
            level: Compression::new(level.min(9)),
        }
    }

    pub fn level(&self) -> u32 {
        self.level.level()
    }
}

impl Default for GzipCompressor {
    fn default() -> Self {
        Self::new()
    }
}

impl Compressor for GzipCompressor {
    fn algorithm(&self) -> CompressionAlgorithm {
        CompressionAlgorithm::Gzip
    }

    fn compress(&self, data: &[u8]) -> Result<Vec<u8>> {
        let failed = |e: std::io::Error| Error::CompressionFailed {
            algorithm: "gzip".into(),
            reason: e.to_string(),
        };

        let mut encoder = GzEncoder::new(Vec::with_capacity(data.len() / 2 + 32), self.level);
        encoder.write_all(data).map_err(failed)?;
        encoder.finish().map_err(failed)
    }

    fn decompress(&self, data: &[u8]) -> Result<Vec<u8>> {
        let mut decoder = GzDecoder::new(data);
        let mut out = Vec::with_capacity(data.len() * 2);
        decoder
            .read_to_end(&mut out)
            .map_err(|e| Error::DecompressionFailed {
                algorithm: "gzip".into(),
                reason: e.to_string(),
            })?;
        Ok(out)
    }
}
