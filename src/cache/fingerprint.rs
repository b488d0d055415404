//! Content Fingerprints
//!
//! Stable hex digests used as the content half of a cache key. The disk
//! layout shards on the first four hex characters, so every digest produced
//! here is at least that long.

use std::io::Read;

use sha2::{Digest, Sha256, Sha512};

use crate::error::{Error, Result};

/// Supported digest algorithms
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum HashAlgorithm {
    /// SHA-256 (default)
    #[default]
    Sha256,
    /// SHA-512
    Sha512,
}

impl HashAlgorithm {
    /// Resolve an algorithm by name (`sha256`, `SHA-256`, `sha512`, ...)
    ///
    /// Unknown names are a [`Error::Hashing`]; there is no fallback digest.
    pub fn from_name(name: &str) -> Result<Self> {
        let normalized: String = name
            .chars()
            .filter(|c| *c != '-' && *c != '_')
            .collect::<String>()
            .to_ascii_lowercase();

        match normalized.as_str() {
            "sha256" => Ok(HashAlgorithm::Sha256),
            "sha512" => Ok(HashAlgorithm::Sha512),
            _ => Err(Error::Hashing(format!(
                "digest algorithm '{}' is not available",
                name
            ))),
        }
    }

    /// Get human-readable name
    pub fn name(&self) -> &'static str {
        match self {
            HashAlgorithm::Sha256 => "sha256",
            HashAlgorithm::Sha512 => "sha512",
        }
    }

    /// Length of the hex digest
    pub fn hex_len(&self) -> usize {
        match self {
            HashAlgorithm::Sha256 => 64,
            HashAlgorithm::Sha512 => 128,
        }
    }
}

impl std::fmt::Display for HashAlgorithm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Digest state for one of the supported algorithms
enum Hasher {
    Sha256(Sha256),
    Sha512(Sha512),
}

impl Hasher {
    fn new(algorithm: HashAlgorithm) -> Self {
        match algorithm {
            HashAlgorithm::Sha256 => Hasher::Sha256(Sha256::new()),
            HashAlgorithm::Sha512 => Hasher::Sha512(Sha512::new()),
        }
    }

    fn update(&mut self, data: &[u8]) {
        match self {
            Hasher::Sha256(h) => h.update(data),
            Hasher::Sha512(h) => h.update(data),
        }
    }

    fn finalize_hex(self) -> String {
        match self {
            Hasher::Sha256(h) => hex::encode(h.finalize()),
            Hasher::Sha512(h) => hex::encode(h.finalize()),
        }
    }
}

/// Computes content hashes for cache keys
#[derive(Debug, Clone, Copy, Default)]
pub struct Fingerprint {
    algorithm: HashAlgorithm,
}

impl Fingerprint {
    /// Create a fingerprinter using the given algorithm
    pub fn new(algorithm: HashAlgorithm) -> Self {
        Self { algorithm }
    }

    /// Create a fingerprinter from an algorithm name
    pub fn from_name(name: &str) -> Result<Self> {
        Ok(Self::new(HashAlgorithm::from_name(name)?))
    }

    pub fn algorithm(&self) -> HashAlgorithm {
        self.algorithm
    }

    /// Hex digest of a byte slice
    pub fn of_bytes(&self, data: &[u8]) -> String {
        let mut hasher = Hasher::new(self.algorithm);
        hasher.update(data);
        hasher.finalize_hex()
    }

    /// Hex digest of several parts
    ///
    /// Each part is length-prefixed, so `["ab", "c"]` and `["a", "bc"]`
    /// produce different digests.
    pub fn of_parts<I, P>(&self, parts: I) -> String
    where
        I: IntoIterator<Item = P>,
        P: AsRef<[u8]>,
    {
        let mut hasher = Hasher::new(self.algorithm);
        for part in parts {
            let part = part.as_ref();
            hasher.update(&(part.len() as u64).to_be_bytes());
            hasher.update(part);
        }
        hasher.finalize_hex()
    }

    /// Hex digest of everything a reader yields
    pub fn of_reader<R: Read>(&self, mut reader: R) -> Result<String> {
        let mut hasher = Hasher::new(self.algorithm);
        let mut buf = [0u8; 8 * 1024];
        loop {
            let n = reader.read(&mut buf)?;
            if n == 0 {
                break;
            }
            hasher.update(&buf[..n]);
        }
        Ok(hasher.finalize_hex())
    }
}

/// SHA-256 hex digest of a byte slice
pub fn sha256_hex(data: &[u8]) -> String {
    Fingerprint::default().of_bytes(data)
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn test_known_sha256_vector() {
        assert_eq!(
            sha256_hex(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_digest_lengths() {
        let data = b"bytecode";
        assert_eq!(Fingerprint::new(HashAlgorithm::Sha256).of_bytes(data).len(), 64);
        assert_eq!(Fingerprint::new(HashAlgorithm::Sha512).of_bytes(data).len(), 128);
        assert_eq!(HashAlgorithm::Sha512.hex_len(), 128);
    }

    #[test]
    fn test_stable_and_content_sensitive() {
        let fp = Fingerprint::default();
        assert_eq!(fp.of_bytes(b"class A {}"), fp.of_bytes(b"class A {}"));
        assert_ne!(fp.of_bytes(b"class A {}"), fp.of_bytes(b"class B {}"));
    }

    #[test]
    fn test_parts_are_length_prefixed() {
        let fp = Fingerprint::default();
        assert_ne!(fp.of_parts(["ab", "c"]), fp.of_parts(["a", "bc"]));
        assert_eq!(fp.of_parts(["ab", "c"]), fp.of_parts(vec!["ab", "c"]));
    }

    #[test]
    fn test_reader_matches_bytes() {
        let fp = Fingerprint::default();
        let data: Vec<u8> = (0..50_000u32).map(|i| (i % 251) as u8).collect();
        let from_reader = fp.of_reader(std::io::Cursor::new(&data)).unwrap();
        assert_eq!(from_reader, fp.of_bytes(&data));
    }

    #[test]
    fn test_algorithm_names() {
        assert_eq!(HashAlgorithm::from_name("SHA-256").unwrap(), HashAlgorithm::Sha256);
        assert_eq!(HashAlgorithm::from_name("sha_512").unwrap(), HashAlgorithm::Sha512);
        assert_eq!(HashAlgorithm::Sha256.to_string(), "sha256");
    }

    #[test]
    fn test_unknown_algorithm_is_hashing_error() {
        assert_matches!(HashAlgorithm::from_name("md2"), Err(Error::Hashing(_)));
        assert_matches!(Fingerprint::from_name("whirlpool"), Err(Error::Hashing(msg)) if msg.contains("whirlpool"));
    }
}
