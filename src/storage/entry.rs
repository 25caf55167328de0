//! Stored values and their bookkeeping.
//!
//! An [`Entry`] is one value plus the metadata the rest of the engine reads:
//! an absolute expiry (unix milliseconds) for TTLs and the volatile eviction
//! scope, and a recency timestamp and read counter for the LRU and LFU
//! families. Recency and frequency belong to the read path only; every write
//! builds a fresh `Entry`, so overwriting a key resets both.

use bytes::Bytes;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

/// Raw form of "no expiry" when an expiry is flattened to an integer.
///
/// Kept apart from `0` so that a missing expiry and one due at the epoch
/// never collapse into the same value.
pub const NO_EXPIRY: i64 = -1;

/// Current wall-clock time in unix milliseconds.
#[inline]
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Reports whether `entry` has an expiry and `now` has reached it.
///
/// A pure function of its inputs; an entry without expiry never expires.
#[inline]
pub fn has_expired(entry: &Entry, now: u64) -> bool {
    matches!(entry.expires_at, Some(at) if now >= at)
}

/// Flattens an optional expiry to its raw integer form.
pub fn encode_expiry(expires_at: Option<u64>) -> i64 {
    match expires_at {
        Some(at) => i64::try_from(at).unwrap_or(i64::MAX),
        None => NO_EXPIRY,
    }
}

/// Inverse of [`encode_expiry`]. Negative values other than [`NO_EXPIRY`]
/// predate the epoch and decode as already due.
pub fn decode_expiry(raw: i64) -> Option<u64> {
    match raw {
        NO_EXPIRY => None,
        r if r < 0 => Some(0),
        r => Some(r as u64),
    }
}

/// A stored value with its expiry and access metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    /// The stored payload
    pub value: Bytes,
    /// Absolute expiry in unix milliseconds (None = never expires)
    pub expires_at: Option<u64>,
    /// Last successful read, or creation time
    pub last_accessed: Instant,
    /// Successful reads since creation
    pub access_count: u64,
}

impl Entry {
    /// Creates a new entry without expiry.
    pub fn new(value: Bytes) -> Self {
        Self::with_expiry(value, None)
    }

    /// Creates a new entry expiring at an absolute unix-millisecond time.
    pub fn with_expiry(value: Bytes, expires_at: Option<u64>) -> Self {
        Self {
            value,
            expires_at,
            last_accessed: Instant::now(),
            access_count: 0,
        }
    }

    /// Creates a new entry expiring `ttl` from now.
    pub fn with_ttl(value: Bytes, ttl: Duration) -> Self {
        Self::with_expiry(value, Some(now_ms().saturating_add(ttl.as_millis() as u64)))
    }

    /// Whether an expiry is set (the key is "volatile").
    #[inline]
    pub fn is_volatile(&self) -> bool {
        self.expires_at.is_some()
    }

    /// Checks the entry against the current wall clock.
    #[inline]
    pub fn is_expired(&self) -> bool {
        has_expired(self, now_ms())
    }

    /// Remaining time to live in milliseconds at `now`, or None if no expiry.
    pub fn ttl_ms(&self, now: u64) -> Option<u64> {
        self.expires_at.map(|at| at.saturating_sub(now))
    }

    /// Records a successful read.
    #[inline]
    pub(crate) fn touch(&mut self) {
        self.last_accessed = Instant::now();
        self.access_count = self.access_count.saturating_add(1);
    }
}

/// Per-entry cost table used to estimate memory usage.
///
/// These numbers are an accounting policy, not a measurement of this
/// process's allocator. Eviction only compares totals against the ceiling,
/// so what matters is that the estimate grows with key and value size and
/// gives the same answer for the same input. Changing any constant means
/// introducing a new version rather than editing an existing one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryModel {
    pub version: u32,
    /// Expiry, recency and frequency fields
    pub metadata: u64,
    /// Hash table slot and bookkeeping
    pub map_entry: u64,
    /// Fixed header cost of the key buffer
    pub key_header: u64,
    /// Fixed header cost of the value buffer
    pub value_header: u64,
}

impl MemoryModel {
    pub const V1: MemoryModel = MemoryModel {
        version: 1,
        metadata: 24,
        map_entry: 32,
        key_header: 16,
        value_header: 16,
    };

    /// Fixed cost of an entry before its key and value bytes.
    #[inline]
    pub fn base(&self) -> u64 {
        self.metadata + self.map_entry + self.key_header + self.value_header
    }

    /// Estimated bytes for a key and value of the given lengths.
    #[inline]
    pub fn estimate(&self, key_len: usize, value_len: usize) -> u64 {
        self.base() + key_len as u64 + value_len as u64
    }

    /// Estimated bytes held by `entry` stored under `key`.
    #[inline]
    pub fn entry_size(&self, key: &[u8], entry: &Entry) -> u64 {
        self.estimate(key.len(), entry.value.len())
    }
}

impl Default for MemoryModel {
    fn default() -> Self {
        Self::V1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_expiry_never_expires() {
        let entry = Entry::new(Bytes::from("v"));
        assert!(!has_expired(&entry, 0));
        assert!(!has_expired(&entry, u64::MAX));
        assert!(!entry.is_volatile());
    }

    #[test]
    fn test_expiry_boundary() {
        let entry = Entry::with_expiry(Bytes::from("v"), Some(1_000));
        assert!(!has_expired(&entry, 999));
        assert!(has_expired(&entry, 1_000));
        assert!(has_expired(&entry, 1_001));
    }

    #[test]
    fn test_epoch_expiry_is_not_the_sentinel() {
        let entry = Entry::with_expiry(Bytes::from("v"), Some(0));
        assert!(entry.is_volatile());
        assert!(has_expired(&entry, 0));
        assert_ne!(encode_expiry(Some(0)), NO_EXPIRY);
    }

    #[test]
    fn test_expiry_raw_form_roundtrip() {
        for expiry in [None, Some(0), Some(1), Some(1_700_000_000_000)] {
            assert_eq!(decode_expiry(encode_expiry(expiry)), expiry);
        }
        assert_eq!(decode_expiry(-42), Some(0));
    }

    #[test]
    fn test_with_ttl_sets_future_expiry() {
        let before = now_ms();
        let entry = Entry::with_ttl(Bytes::from("v"), Duration::from_secs(10));
        let at = entry.expires_at.unwrap();
        assert!(at >= before + 10_000);
        assert!(!entry.is_expired());
        assert!(entry.ttl_ms(before).unwrap() >= 10_000);
    }

    #[test]
    fn test_touch_updates_recency_and_frequency() {
        let mut entry = Entry::new(Bytes::from("v"));
        let created = entry.last_accessed;
        std::thread::sleep(Duration::from_millis(2));
        entry.touch();
        entry.touch();
        assert_eq!(entry.access_count, 2);
        assert!(entry.last_accessed > created);
    }

    #[test]
    fn test_memory_model_v1() {
        let model = MemoryModel::V1;
        assert_eq!(model.base(), 88);
        assert_eq!(model.estimate(1, 1), 90);

        let entry = Entry::new(Bytes::from("22"));
        assert_eq!(model.entry_size(b"a", &entry), 91);
    }

    #[test]
    fn test_memory_model_is_monotonic() {
        let model = MemoryModel::default();
        assert!(model.estimate(10, 5) > model.estimate(9, 5));
        assert!(model.estimate(10, 5) > model.estimate(10, 4));
        assert_eq!(model.estimate(7, 7), model.estimate(7, 7));
    }
}
