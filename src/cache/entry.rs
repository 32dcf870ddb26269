//! Cache Entry Types
//!
//! An entry is an encoded payload plus an absolute expiry. Entries are never
//! mutated in place: an update replaces the whole entry.

use std::time::Duration;

use bytes::Bytes;

/// Expiry marker for entries without a deadline
pub const NEVER_EXPIRES: u64 = u64::MAX;

/// Cache entry containing an encoded payload and its expiry
#[derive(Clone, PartialEq, Eq)]
pub struct CacheEntry {
    /// Encoded (framed, possibly compressed) value
    payload: Bytes,
    /// Absolute expiry in epoch milliseconds
    expires_at_ms: u64,
}

impl CacheEntry {
    /// Create an entry expiring at an absolute time
    pub fn new(payload: Bytes, expires_at_ms: u64) -> Self {
        Self {
            payload,
            expires_at_ms,
        }
    }

    /// Create an entry that expires `ttl` after `now_ms`
    ///
    /// Partial milliseconds round up, so a non-zero TTL never yields an
    /// entry that is already expired.
    pub fn with_ttl(payload: Bytes, now_ms: u64, ttl: Duration) -> Self {
        let ttl_ms = u64::try_from(ttl.as_nanos().div_ceil(1_000_000)).unwrap_or(u64::MAX);
        Self::new(payload, now_ms.saturating_add(ttl_ms))
    }

    /// Get the encoded payload (zero-copy)
    #[inline]
    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    /// Get payload size in bytes
    #[inline]
    pub fn size(&self) -> usize {
        self.payload.len()
    }

    /// Absolute expiry in epoch milliseconds
    #[inline]
    pub fn expires_at_ms(&self) -> u64 {
        self.expires_at_ms
    }

    /// An entry is dead once `now >= expiry`
    #[inline]
    pub fn is_expired_at(&self, now_ms: u64) -> bool {
        now_ms >= self.expires_at_ms
    }

    /// Lifetime left at `now_ms`, `None` for entries that never expire
    pub fn remaining_ttl(&self, now_ms: u64) -> Option<Duration> {
        if self.expires_at_ms == NEVER_EXPIRES {
            return None;
        }
        Some(Duration::from_millis(
            self.expires_at_ms.saturating_sub(now_ms),
        ))
    }
}

impl std::fmt::Debug for CacheEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheEntry")
            .field("size", &self.payload.len())
            .field("expires_at_ms", &self.expires_at_ms)
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entry_expiry_boundary() {
        let entry = CacheEntry::with_ttl(Bytes::from_static(b"v"), 1_000, Duration::from_secs(60));
        assert_eq!(entry.expires_at_ms(), 61_000);

        assert!(!entry.is_expired_at(60_999));
        // now == expiry is already dead
        assert!(entry.is_expired_at(61_000));
        assert!(entry.is_expired_at(70_000));
    }

    #[test]
    fn test_remaining_ttl() {
        let entry = CacheEntry::new(Bytes::from_static(b"v"), 10_000);
        assert_eq!(entry.remaining_ttl(4_000), Some(Duration::from_secs(6)));
        assert_eq!(entry.remaining_ttl(12_000), Some(Duration::ZERO));

        let forever = CacheEntry::new(Bytes::new(), NEVER_EXPIRES);
        assert_eq!(forever.remaining_ttl(4_000), None);
        assert!(!forever.is_expired_at(u64::MAX - 1));
    }

    #[test]
    fn test_sub_millisecond_ttl_rounds_up() {
        let entry = CacheEntry::with_ttl(Bytes::new(), 1_000, Duration::from_micros(1));
        assert_eq!(entry.expires_at_ms(), 1_001);
        assert!(!entry.is_expired_at(1_000));

        let entry = CacheEntry::with_ttl(Bytes::new(), 1_000, Duration::from_micros(1_500));
        assert_eq!(entry.expires_at_ms(), 1_002);

        let entry = CacheEntry::with_ttl(Bytes::new(), 1_000, Duration::from_millis(3));
        assert_eq!(entry.expires_at_ms(), 1_003);
    }

    #[test]
    fn test_huge_ttl_saturates() {
        let entry = CacheEntry::with_ttl(Bytes::new(), 5, Duration::MAX);
        assert_eq!(entry.expires_at_ms(), u64::MAX);
    }

    #[test]
    fn test_cache_entry_debug() {
        let entry = CacheEntry::new(Bytes::from_static(b"Test"), 42);
        let debug = format!("{:?}", entry);
        assert!(debug.contains("CacheEntry"));
        assert!(debug.contains("size"));
        assert_eq!(entry.size(), 4);
    }
}
