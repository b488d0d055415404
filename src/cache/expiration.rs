//! TTL Expiration
//!
//! Shared by both tiers: an entry's expiry depends only on its stored
//! timestamp, the current time and the configured maximum age.

/// True when an entry stamped at `timestamp_millis` has outlived `max_age_millis`
///
/// A non-positive maximum age means entries never expire. The boundary is
/// exclusive: an entry exactly `max_age_millis` old is still valid.
#[inline]
pub fn is_expired(timestamp_millis: i64, max_age_millis: i64, now_millis: i64) -> bool {
    if max_age_millis <= 0 {
        return false;
    }
    now_millis.saturating_sub(timestamp_millis) > max_age_millis
}

/// Expiration policy bound to a configured maximum age
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExpirationPolicy {
    max_age_millis: i64,
}

impl ExpirationPolicy {
    pub fn new(max_age_millis: i64) -> Self {
        Self { max_age_millis }
    }

    /// Policy under which nothing expires
    pub fn unlimited() -> Self {
        Self { max_age_millis: 0 }
    }

    pub fn max_age_millis(&self) -> i64 {
        self.max_age_millis
    }

    pub fn is_unlimited(&self) -> bool {
        self.max_age_millis <= 0
    }

    #[inline]
    pub fn is_expired(&self, timestamp_millis: i64, now_millis: i64) -> bool {
        is_expired(timestamp_millis, self.max_age_millis, now_millis)
    }
}
