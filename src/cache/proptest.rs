//! Property-Based Tests for the Cache
//!
//! # Test Properties
//!
//! 1. **Expiry**: the TTL predicate is monotonic in time and never fires
//!    for non-positive ages
//! 2. **Record codec**: any timestamp and payload survive encode/decode
//! 3. **Gzip**: arbitrary payloads survive compression at any level
//! 4. **Paths**: file names always parse back to the sanitized key and hash
//! 5. **LRU bound**: no sequence of operations overfills the memory tier

#![cfg(test)]

use std::path::Path;

use bytes::Bytes;
use proptest::prelude::*;

use super::compression::{Compressor, GzipCompressor};
use super::disk::{parse_file_name, sanitize};
use super::expiration::is_expired;
use super::fingerprint::Fingerprint;
use super::memory::{MemoryEntry, MemoryTier};
use super::record::{self, DiskRecord, HEADER_LEN};

// =============================================================================
// Property Strategies
// =============================================================================

/// Logical keys in the shape of qualified type names, including dashes
fn key_strategy() -> impl Strategy<Value = String> {
    "[a-zA-Z][a-zA-Z0-9_.$-]{0,40}"
}

fn hex_hash_strategy() -> impl Strategy<Value = String> {
    "[0-9a-f]{4,64}"
}

fn payload_strategy() -> impl Strategy<Value = Vec<u8>> {
    prop::collection::vec(any::<u8>(), 0..4096)
}

#[derive(Debug, Clone)]
enum MemoryOp {
    Put(u8),
    Get(u8),
    Remove(u8),
}

fn memory_op_strategy() -> impl Strategy<Value = MemoryOp> {
    prop_oneof![
        any::<u8>().prop_map(MemoryOp::Put),
        any::<u8>().prop_map(MemoryOp::Get),
        any::<u8>().prop_map(MemoryOp::Remove),
    ]
}

// =============================================================================
// Expiry Properties
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(256))]

    /// Property: a non-positive maximum age never expires anything.
    #[test]
    fn prop_unlimited_never_expires(
        ts in any::<i64>(),
        now in any::<i64>(),
        max_age in i64::MIN..=0,
    ) {
        prop_assert!(!is_expired(ts, max_age, now));
    }

    /// Property: once expired, an entry stays expired as time moves on.
    #[test]
    fn prop_expiry_is_monotonic(
        ts in 0i64..1_000_000_000_000,
        max_age in 1i64..1_000_000_000,
        now in 0i64..2_000_000_000_000,
        later in 0i64..1_000_000_000,
    ) {
        if is_expired(ts, max_age, now) {
            prop_assert!(is_expired(ts, max_age, now + later));
        }
    }

    /// Property: the boundary sits exactly at `max_age`.
    #[test]
    fn prop_expiry_boundary(
        ts in 0i64..1_000_000_000_000,
        max_age in 1i64..1_000_000_000,
    ) {
        prop_assert!(!is_expired(ts, max_age, ts + max_age));
        prop_assert!(is_expired(ts, max_age, ts + max_age + 1));
    }
}

// =============================================================================
// Codec Properties
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    /// Property: the header codec preserves timestamp and payload.
    #[test]
    fn prop_record_roundtrip(ts in any::<i64>(), payload in payload_strategy()) {
        let encoded = record::encode(ts, &payload);
        prop_assert_eq!(encoded.len(), HEADER_LEN + payload.len());

        let decoded = DiskRecord::decode(Path::new("prop"), &encoded)?;
        prop_assert_eq!(decoded.timestamp_millis, ts);
        prop_assert_eq!(decoded.payload, payload);
    }

    /// Property: gzip decompresses to the original at every level.
    #[test]
    fn prop_gzip_roundtrip(payload in payload_strategy(), level in 0u32..=9) {
        let gzip = GzipCompressor::with_level(level);
        let compressed = gzip.compress(&payload)?;
        prop_assert_eq!(gzip.decompress(&compressed)?, payload);
    }
}

// =============================================================================
// Path Properties
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(256))]

    /// Property: sanitized keys carry no dots or path separators.
    #[test]
    fn prop_sanitize_is_file_safe(key in ".{0,64}") {
        let sanitized = sanitize(&key);
        prop_assert!(!sanitized.contains('.'));
        prop_assert!(!sanitized.contains('/'));
        prop_assert!(!sanitized.contains('\\'));
        prop_assert_eq!(sanitized.chars().count(), key.chars().count());
    }

    /// Property: a record file name parses back to its key and hash.
    #[test]
    fn prop_file_name_parses(key in key_strategy(), hash in hex_hash_strategy()) {
        let name = format!("{}-{}.cache", sanitize(&key), hash);
        let (parsed_key, parsed_hash) = parse_file_name(&name).ok_or_else(|| {
            TestCaseError::fail(format!("unparseable file name {}", name))
        })?;
        prop_assert_eq!(parsed_key, sanitize(&key));
        prop_assert_eq!(parsed_hash, hash.as_str());
    }

    /// Property: fingerprints are deterministic lowercase hex.
    #[test]
    fn prop_fingerprint_is_stable_hex(data in payload_strategy()) {
        let fingerprint = Fingerprint::default();
        let first = fingerprint.of_bytes(&data);
        prop_assert_eq!(&first, &fingerprint.of_bytes(&data));
        prop_assert_eq!(first.len(), fingerprint.algorithm().hex_len());
        prop_assert!(first.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }
}

// =============================================================================
// Memory Tier Properties
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    /// Property: the tier never exceeds capacity, and the most recently
    /// written key is always present.
    #[test]
    fn prop_memory_tier_bounded(
        capacity in 1usize..16,
        ops in prop::collection::vec(memory_op_strategy(), 1..200),
    ) {
        let tier = MemoryTier::new(capacity);
        let mut last_put = None;

        for op in ops {
            match op {
                MemoryOp::Put(k) => {
                    let key = format!("k{}", k);
                    tier.put(MemoryEntry::new(key.clone(), "h", Bytes::from(vec![k]), 0));
                    last_put = Some(key);
                }
                MemoryOp::Get(k) => {
                    tier.get(&format!("k{}", k));
                }
                MemoryOp::Remove(k) => {
                    let key = format!("k{}", k);
                    tier.remove(&key);
                    if last_put.as_deref() == Some(key.as_str()) {
                        last_put = None;
                    }
                }
            }

            prop_assert!(tier.len() <= capacity);
            if let Some(key) = &last_put {
                prop_assert!(tier.contains(key));
            }
        }
    }
}
