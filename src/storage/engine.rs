//! Concurrent Keyspace Store
//!
//! The store maps keys to [`Entry`] records and keeps a running estimate of
//! the memory they hold.
//!
//! ## Design Decisions
//!
//! 1. **Sharded Locks**: keys hash to one of 64 shards, each a `Mutex` around
//!    a `HashMap`. Every operation takes exactly one shard lock for its whole
//!    critical section, so operations on one key are totally ordered.
//! 2. **Mutex, not RwLock**: a successful read updates the entry's recency and
//!    frequency, so reads mutate too.
//! 3. **Lazy Expiry**: any access that finds an expired entry removes it and
//!    counts it as expired before answering "not found".
//! 4. **Incremental Accounting**: `used_memory` is an atomic adjusted inside
//!    the same critical section as the map change. It is never recomputed by
//!    scanning during normal operation; readers load it without locking.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     StorageEngine                           │
//! │  ┌─────────┐ ┌─────────┐ ┌─────────┐ ┌─────────┐           │
//! │  │ Shard 0 │ │ Shard 1 │ │ Shard 2 │ │ Shard N │           │
//! │  │ Mutex   │ │ Mutex   │ │ Mutex   │ │ Mutex   │           │
//! │  │ HashMap │ │ HashMap │ │ HashMap │ │ HashMap │           │
//! │  └─────────┘ └─────────┘ └─────────┘ └─────────┘           │
//! │        used_memory: AtomicU64 (lock-free reads)             │
//! └─────────────────────────────────────────────────────────────┘
//! ```

use crate::storage::entry::{has_expired, now_ms, Entry, MemoryModel};
use bytes::{Bytes, BytesMut};
use parking_lot::Mutex;
use rand::Rng;
use std::collections::HashMap;
use std::collections::hash_map::DefaultHasher;
use std::hash::{BuildHasherDefault, Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use thiserror::Error;
use tracing::trace;

/// Number of shards for the storage engine.
const NUM_SHARDS: usize = 64;

/// Shard map with fixed hash keys. Identical operation histories give
/// identical iteration order, so seeded sampling is reproducible.
type ShardMap = HashMap<Bytes, Entry, BuildHasherDefault<DefaultHasher>>;

/// Errors surfaced by storage operations.
///
/// The display strings are the exact error replies sent to clients.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StorageError {
    /// The memory ceiling is reached and eviction could not free enough.
    #[error("OOM command not allowed when used memory > 'maxmemory'.")]
    OutOfMemory { used: u64, limit: u64 },

    /// The stored value cannot be used as a 64-bit integer.
    #[error("ERR value is not an integer or out of range")]
    NotAnInteger,

    /// The arithmetic result does not fit in 64 bits.
    #[error("ERR increment or decrement would overflow")]
    Overflow,
}

/// What a write does to the key's expiry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetExpiry {
    /// The new value never expires
    Clear,
    /// The new value expires at this unix-millisecond time
    At(u64),
    /// Carry over the previous value's expiry, if any
    Keep,
}

/// Precondition for a write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetCondition {
    Always,
    /// Only when no live value exists (NX)
    IfAbsent,
    /// Only when a live value exists (XX)
    IfPresent,
}

/// Result of a conditional write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SetOutcome {
    /// Whether the value was stored
    pub applied: bool,
    /// The live value present before the write
    pub previous: Option<Bytes>,
}

/// A single shard containing a portion of the key-value pairs.
#[derive(Debug, Default)]
struct Shard {
    data: Mutex<ShardMap>,
}

/// Outcome of one active-expiry sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepStats {
    /// Keys with an expiry that were examined
    pub scanned: u64,
    /// Keys removed because they had expired
    pub expired: u64,
}

/// The keyspace: every key, its record, and the memory they account for.
///
/// # Thread Safety
///
/// Shared behind an `Arc` by all connections, the evictor and the expiry
/// sweeper. All methods take `&self`.
///
/// # Example
///
/// ```
/// use cinderkv::storage::StorageEngine;
/// use bytes::Bytes;
///
/// let engine = StorageEngine::new();
/// engine.set(Bytes::from("name"), Bytes::from("Ariz"));
///
/// let entry = engine.get(&Bytes::from("name")).unwrap();
/// assert_eq!(entry.value, Bytes::from("Ariz"));
/// assert_eq!(entry.access_count, 1);
/// assert_eq!(engine.memory_used(), engine.memory_model().estimate(4, 4));
/// ```
pub struct StorageEngine {
    shards: Vec<Shard>,
    model: MemoryModel,

    /// Estimated bytes held by live entries
    used_memory: AtomicU64,
    key_count: AtomicU64,
    /// Keys with an expiry set
    volatile_count: AtomicU64,

    get_count: AtomicU64,
    set_count: AtomicU64,
    del_count: AtomicU64,
    keyspace_hits: AtomicU64,
    keyspace_misses: AtomicU64,
    expired_count: AtomicU64,
    evicted_count: AtomicU64,
}

impl std::fmt::Debug for StorageEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorageEngine")
            .field("shards", &self.shards.len())
            .field("keys", &self.len())
            .field("used_memory", &self.memory_used())
            .field("model", &self.model.version)
            .finish()
    }
}

impl Default for StorageEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl StorageEngine {
    /// Creates an empty store using [`MemoryModel::V1`].
    pub fn new() -> Self {
        Self::with_model(MemoryModel::V1)
    }

    /// Creates an empty store with a specific memory cost table.
    pub fn with_model(model: MemoryModel) -> Self {
        Self {
            shards: (0..NUM_SHARDS).map(|_| Shard::default()).collect(),
            model,
            used_memory: AtomicU64::new(0),
            key_count: AtomicU64::new(0),
            volatile_count: AtomicU64::new(0),
            get_count: AtomicU64::new(0),
            set_count: AtomicU64::new(0),
            del_count: AtomicU64::new(0),
            keyspace_hits: AtomicU64::new(0),
            keyspace_misses: AtomicU64::new(0),
            expired_count: AtomicU64::new(0),
            evicted_count: AtomicU64::new(0),
        }
    }

    pub fn memory_model(&self) -> MemoryModel {
        self.model
    }

    #[inline]
    fn shard_index(&self, key: &[u8]) -> usize {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        (hasher.finish() as usize) % NUM_SHARDS
    }

    #[inline]
    fn get_shard(&self, key: &[u8]) -> &Shard {
        &self.shards[self.shard_index(key)]
    }

    // ========================================================================
    // Accounting helpers. Callers hold the shard lock.
    // ========================================================================

    fn account_in(&self, key_len: usize, entry: &Entry) {
        let size = self.model.estimate(key_len, entry.value.len());
        self.used_memory.fetch_add(size, Ordering::Relaxed);
        if entry.is_volatile() {
            self.volatile_count.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn account_out(&self, key_len: usize, entry: &Entry) {
        let size = self.model.estimate(key_len, entry.value.len());
        self.used_memory.fetch_sub(size, Ordering::Relaxed);
        if entry.is_volatile() {
            self.volatile_count.fetch_sub(1, Ordering::Relaxed);
        }
    }

    /// Inserts `entry`, accounting the previous record out before the new
    /// one in. Returns the previous record.
    fn replace(
        &self,
        data: &mut ShardMap,
        key: Bytes,
        entry: Entry,
    ) -> Option<Entry> {
        let key_len = key.len();
        let previous = data.remove(&key);
        match &previous {
            Some(old) => self.account_out(key_len, old),
            None => {
                self.key_count.fetch_add(1, Ordering::Relaxed);
            }
        }
        self.account_in(key_len, &entry);
        data.insert(key, entry);
        previous
    }

    /// Removes `key` and accounts it out.
    fn remove_locked(&self, data: &mut ShardMap, key: &[u8]) -> Option<Entry> {
        let entry = data.remove(key)?;
        self.account_out(key.len(), &entry);
        self.key_count.fetch_sub(1, Ordering::Relaxed);
        Some(entry)
    }

    /// Passive expiry: drops `key` if its entry has expired at `now`.
    /// Returns true if the key is now absent.
    fn expire_if_due(&self, data: &mut ShardMap, key: &[u8], now: u64) -> bool {
        match data.get(key) {
            None => true,
            Some(entry) if has_expired(entry, now) => {
                self.remove_locked(data, key);
                self.expired_count.fetch_add(1, Ordering::Relaxed);
                trace!(key = ?key, "passively expired");
                true
            }
            Some(_) => false,
        }
    }

    // ========================================================================
    // Core operations
    // ========================================================================

    /// Stores `value` under `key` with no expiry, replacing any previous
    /// record.
    ///
    /// Returns `true` if a new key was created.
    pub fn set(&self, key: Bytes, value: Bytes) -> bool {
        self.set_with_expiry(key, value, None)
    }

    /// Stores `value` to expire `ttl` from now.
    pub fn set_with_ttl(&self, key: Bytes, value: Bytes, ttl: Duration) -> bool {
        let at = now_ms().saturating_add(ttl.as_millis() as u64);
        self.set_with_expiry(key, value, Some(at))
    }

    /// Stores `value` with an absolute expiry (unix ms), or none.
    pub fn set_with_expiry(&self, key: Bytes, value: Bytes, expires_at: Option<u64>) -> bool {
        self.set_count.fetch_add(1, Ordering::Relaxed);

        let shard = self.get_shard(&key);
        let mut data = shard.data.lock();
        let is_new = self
            .replace(&mut data, key.clone(), Entry::with_expiry(value, expires_at))
            .is_none();

        trace!(
            key = ?key,
            used_memory = self.used_memory.load(Ordering::Relaxed),
            "set"
        );
        is_new
    }

    /// Conditional write used by SET's option forms, SETNX and GETSET.
    ///
    /// The check, the write and the read of the previous value happen in one
    /// critical section.
    pub fn set_with_options(
        &self,
        key: Bytes,
        value: Bytes,
        expiry: SetExpiry,
        condition: SetCondition,
    ) -> SetOutcome {
        let now = now_ms();
        let shard = self.get_shard(&key);
        let mut data = shard.data.lock();

        self.expire_if_due(&mut data, &key, now);
        let current = data.get(&key);
        let previous = current.map(|e| e.value.clone());

        let allowed = match condition {
            SetCondition::Always => true,
            SetCondition::IfAbsent => current.is_none(),
            SetCondition::IfPresent => current.is_some(),
        };
        if !allowed {
            return SetOutcome {
                applied: false,
                previous,
            };
        }

        let expires_at = match expiry {
            SetExpiry::Clear => None,
            SetExpiry::At(at) => Some(at),
            SetExpiry::Keep => current.and_then(|e| e.expires_at),
        };

        self.set_count.fetch_add(1, Ordering::Relaxed);
        self.replace(&mut data, key, Entry::with_expiry(value, expires_at));

        SetOutcome {
            applied: true,
            previous,
        }
    }

    /// Looks up `key`, recording the read on a hit.
    ///
    /// Returns a snapshot of the record. An expired record is removed and
    /// reported as absent. The recency/frequency update happens under the
    /// same lock as the lookup, so concurrent readers never lose a count.
    pub fn get(&self, key: &[u8]) -> Option<Entry> {
        self.get_count.fetch_add(1, Ordering::Relaxed);

        let now = now_ms();
        let shard = self.get_shard(key);
        let mut data = shard.data.lock();

        if self.expire_if_due(&mut data, key, now) {
            self.keyspace_misses.fetch_add(1, Ordering::Relaxed);
            return None;
        }

        let entry = data.get_mut(key)?;
        entry.touch();
        self.keyspace_hits.fetch_add(1, Ordering::Relaxed);
        Some(entry.clone())
    }

    /// Looks up `key` without recording a read.
    ///
    /// Used by commands that inspect a key (EXISTS, TTL, TYPE) rather than
    /// read its value. Still performs passive expiry.
    pub fn peek(&self, key: &[u8]) -> Option<Entry> {
        let now = now_ms();
        let shard = self.get_shard(key);
        let mut data = shard.data.lock();

        if self.expire_if_due(&mut data, key, now) {
            return None;
        }
        data.get(key).cloned()
    }

    /// Removes `key`. Returns `true` if a live value was removed.
    pub fn delete(&self, key: &[u8]) -> bool {
        self.take(key).is_some()
    }

    /// Removes `key` and returns its live value (GETDEL).
    pub fn take(&self, key: &[u8]) -> Option<Bytes> {
        self.del_count.fetch_add(1, Ordering::Relaxed);

        let now = now_ms();
        let shard = self.get_shard(key);
        let mut data = shard.data.lock();

        if self.expire_if_due(&mut data, key, now) {
            return None;
        }
        let entry = self.remove_locked(&mut data, key)?;
        trace!(
            key = ?key,
            used_memory = self.used_memory.load(Ordering::Relaxed),
            "deleted"
        );
        Some(entry.value)
    }

    /// Deletes multiple keys, returning how many existed.
    pub fn delete_many(&self, keys: &[Bytes]) -> u64 {
        keys.iter().filter(|k| self.delete(k)).count() as u64
    }

    /// Removes `key` on behalf of the eviction engine.
    ///
    /// Counted as an eviction, not a deletion.
    pub fn evict(&self, key: &[u8]) -> bool {
        let shard = self.get_shard(key);
        let mut data = shard.data.lock();

        if self.remove_locked(&mut data, key).is_some() {
            self.evicted_count.fetch_add(1, Ordering::Relaxed);
            true
        } else {
            false
        }
    }

    /// Removes `key` only if its record has expired, counting it as expired.
    pub fn remove_if_expired(&self, key: &[u8]) -> bool {
        let now = now_ms();
        let shard = self.get_shard(key);
        let mut data = shard.data.lock();

        let expired = data.get(key).is_some_and(|entry| has_expired(entry, now));
        expired && self.expire_if_due(&mut data, key, now)
    }

    /// Current estimated memory usage in bytes. Lock-free.
    #[inline]
    pub fn memory_used(&self) -> u64 {
        self.used_memory.load(Ordering::Relaxed)
    }

    /// Change in [`memory_used`](Self::memory_used) if `key` were written
    /// with a value of `value_len` bytes.
    pub fn estimate_growth(&self, key: &[u8], value_len: usize) -> i64 {
        let new_size = self.model.estimate(key.len(), value_len) as i64;
        let shard = self.get_shard(key);
        let data = shard.data.lock();
        let old_size = data
            .get(key)
            .map(|e| self.model.entry_size(key, e) as i64)
            .unwrap_or(0);
        new_size - old_size
    }

    // ========================================================================
    // Key metadata
    // ========================================================================

    /// Checks if a key exists (and is not expired).
    pub fn exists(&self, key: &[u8]) -> bool {
        self.peek(key).is_some()
    }

    /// Counts how many of the given keys exist.
    pub fn exists_many(&self, keys: &[Bytes]) -> u64 {
        keys.iter().filter(|k| self.exists(k)).count() as u64
    }

    /// Sets or clears the expiry of an existing key without touching its
    /// value, recency or frequency.
    ///
    /// Returns `false` if the key does not exist.
    pub fn set_expiry(&self, key: &[u8], expires_at: Option<u64>) -> bool {
        let now = now_ms();
        let shard = self.get_shard(key);
        let mut data = shard.data.lock();

        if self.expire_if_due(&mut data, key, now) {
            return false;
        }
        let Some(entry) = data.get_mut(key) else {
            return false;
        };

        match (entry.expires_at.is_some(), expires_at.is_some()) {
            (false, true) => {
                self.volatile_count.fetch_add(1, Ordering::Relaxed);
            }
            (true, false) => {
                self.volatile_count.fetch_sub(1, Ordering::Relaxed);
            }
            _ => {}
        }
        entry.expires_at = expires_at;
        true
    }

    /// Sets an expiry `ttl` from now on an existing key.
    pub fn expire(&self, key: &[u8], ttl: Duration) -> bool {
        let at = now_ms().saturating_add(ttl.as_millis() as u64);
        self.set_expiry(key, Some(at))
    }

    /// Removes the expiry from a key.
    ///
    /// Returns `true` only if the key existed and had an expiry.
    pub fn persist(&self, key: &[u8]) -> bool {
        match self.peek(key) {
            Some(entry) if entry.is_volatile() => self.set_expiry(key, None),
            _ => false,
        }
    }

    /// Remaining TTL in milliseconds.
    ///
    /// - `Some(ms)` if the key exists and has an expiry
    /// - `Some(-1)` if the key exists but has no expiry
    /// - `None` if the key doesn't exist
    pub fn pttl(&self, key: &[u8]) -> Option<i64> {
        let entry = self.peek(key)?;
        Some(
            entry
                .ttl_ms(now_ms())
                .map(|ms| ms as i64)
                .unwrap_or(-1),
        )
    }

    /// Remaining TTL in seconds, rounded up like Redis.
    pub fn ttl(&self, key: &[u8]) -> Option<i64> {
        self.pttl(key)
            .map(|ms| if ms < 0 { ms } else { (ms + 999) / 1000 })
    }

    // ========================================================================
    // Read-modify-write
    // ========================================================================

    /// Adds `delta` to the integer stored at `key` (0 if absent).
    ///
    /// The result is a fresh record that keeps the previous expiry.
    pub fn incr_by(&self, key: &Bytes, delta: i64) -> Result<i64, StorageError> {
        let now = now_ms();
        let shard = self.get_shard(key);
        let mut data = shard.data.lock();

        self.expire_if_due(&mut data, key, now);
        let (current, expires_at) = match data.get(key) {
            Some(entry) => (parse_integer(&entry.value)?, entry.expires_at),
            None => (0, None),
        };

        let new_value = current.checked_add(delta).ok_or(StorageError::Overflow)?;

        self.set_count.fetch_add(1, Ordering::Relaxed);
        self.replace(
            &mut data,
            key.clone(),
            Entry::with_expiry(Bytes::from(new_value.to_string()), expires_at),
        );
        Ok(new_value)
    }

    /// Appends `suffix` to the value at `key`, creating it if absent.
    ///
    /// Returns the length of the value after the append.
    pub fn append(&self, key: &Bytes, suffix: &[u8]) -> usize {
        let now = now_ms();
        let shard = self.get_shard(key);
        let mut data = shard.data.lock();

        self.expire_if_due(&mut data, key, now);
        let (mut buf, expires_at) = match data.get(key) {
            Some(entry) => (BytesMut::from(&entry.value[..]), entry.expires_at),
            None => (BytesMut::new(), None),
        };
        buf.extend_from_slice(suffix);
        let len = buf.len();

        self.set_count.fetch_add(1, Ordering::Relaxed);
        self.replace(
            &mut data,
            key.clone(),
            Entry::with_expiry(buf.freeze(), expires_at),
        );
        len
    }

    // ========================================================================
    // Whole-keyspace operations
    // ========================================================================

    /// Returns all live keys matching a glob pattern.
    ///
    /// Scans every shard; intended for KEYS on small keyspaces.
    pub fn keys(&self, pattern: &str) -> Vec<Bytes> {
        let now = now_ms();
        let pattern = pattern.as_bytes();
        let mut result = Vec::new();

        for shard in &self.shards {
            let data = shard.data.lock();
            result.extend(
                data.iter()
                    .filter(|(key, entry)| !has_expired(entry, now) && glob_match(pattern, key))
                    .map(|(key, _)| key.clone()),
            );
        }
        result
    }

    /// Draws up to `count` distinct (key, record) pairs uniformly at random.
    ///
    /// When `count` covers the whole keyspace every entry is returned. The
    /// pairs are snapshots; the store keeps ownership of its records.
    pub fn sample<R: Rng + ?Sized>(&self, count: usize, rng: &mut R) -> Vec<(Bytes, Entry)> {
        let sizes: Vec<usize> = self.shards.iter().map(|s| s.data.lock().len()).collect();
        let total: usize = sizes.iter().sum();
        if total == 0 || count == 0 {
            return Vec::new();
        }
        if count >= total {
            return self.snapshot();
        }

        let mut picks = rand::seq::index::sample(rng, total, count).into_vec();
        picks.sort_unstable();
        let mut picks = picks.into_iter().peekable();

        let mut sampled = Vec::with_capacity(count);
        let mut offset = 0;
        for (shard, &size) in self.shards.iter().zip(&sizes) {
            let end = offset + size;
            let mut wanted = Vec::new();
            while let Some(pick) = picks.next_if(|&p| p < end) {
                wanted.push(pick - offset);
            }
            offset = end;
            if wanted.is_empty() {
                continue;
            }

            // Shard sizes may have moved since they were read; positions
            // past the current end are dropped.
            let data = shard.data.lock();
            let mut wanted = wanted.into_iter().peekable();
            for (position, (key, entry)) in data.iter().enumerate() {
                let Some(&next) = wanted.peek() else {
                    break;
                };
                if next == position {
                    sampled.push((key.clone(), entry.clone()));
                    wanted.next();
                }
            }
        }
        sampled
    }

    /// Copies every (key, record) pair. Full scan.
    pub fn snapshot(&self) -> Vec<(Bytes, Entry)> {
        let mut all = Vec::with_capacity(self.len() as usize);
        for shard in &self.shards {
            let data = shard.data.lock();
            all.extend(data.iter().map(|(k, e)| (k.clone(), e.clone())));
        }
        all
    }

    /// Recomputes memory usage by scanning every shard.
    ///
    /// For verification and telemetry only; the running total is never
    /// replaced by this value.
    pub fn recompute_memory(&self) -> u64 {
        self.shards
            .iter()
            .map(|shard| {
                let data = shard.data.lock();
                data.iter()
                    .map(|(k, e)| self.model.entry_size(k, e))
                    .sum::<u64>()
            })
            .sum()
    }

    /// Removes expired keys from every shard (active expiry).
    pub fn cleanup_expired(&self, now: u64) -> SweepStats {
        let mut stats = SweepStats::default();

        for shard in &self.shards {
            let mut data = shard.data.lock();
            let mut freed = 0u64;
            let mut removed = 0u64;

            data.retain(|key, entry| {
                if !entry.is_volatile() {
                    return true;
                }
                stats.scanned += 1;
                if has_expired(entry, now) {
                    freed += self.model.entry_size(key, entry);
                    removed += 1;
                    false
                } else {
                    true
                }
            });

            if removed > 0 {
                self.used_memory.fetch_sub(freed, Ordering::Relaxed);
                self.volatile_count.fetch_sub(removed, Ordering::Relaxed);
                self.key_count.fetch_sub(removed, Ordering::Relaxed);
                self.expired_count.fetch_add(removed, Ordering::Relaxed);
                stats.expired += removed;
            }
        }

        stats
    }

    /// Clears all data from the database (FLUSHDB).
    pub fn flush(&self) {
        for shard in &self.shards {
            let mut data = shard.data.lock();
            for (key, entry) in data.drain() {
                self.account_out(key.len(), &entry);
                self.key_count.fetch_sub(1, Ordering::Relaxed);
            }
        }
    }

    /// Number of keys, including expired ones not yet reclaimed.
    pub fn len(&self) -> u64 {
        self.key_count.load(Ordering::Relaxed)
    }

    /// Returns true if the database is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of keys with an expiry set.
    pub fn volatile_len(&self) -> u64 {
        self.volatile_count.load(Ordering::Relaxed)
    }

    /// Returns database statistics.
    pub fn stats(&self) -> StorageStats {
        StorageStats {
            keys: self.len(),
            volatile_keys: self.volatile_len(),
            used_memory: self.memory_used(),
            get_ops: self.get_count.load(Ordering::Relaxed),
            set_ops: self.set_count.load(Ordering::Relaxed),
            del_ops: self.del_count.load(Ordering::Relaxed),
            keyspace_hits: self.keyspace_hits.load(Ordering::Relaxed),
            keyspace_misses: self.keyspace_misses.load(Ordering::Relaxed),
            expired_keys: self.expired_count.load(Ordering::Relaxed),
            evicted_keys: self.evicted_count.load(Ordering::Relaxed),
        }
    }
}

pub(crate) fn parse_integer(value: &[u8]) -> Result<i64, StorageError> {
    std::str::from_utf8(value)
        .ok()
        .and_then(|s| s.parse::<i64>().ok())
        .ok_or(StorageError::NotAnInteger)
}

/// Point-in-time counters for INFO and telemetry.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StorageStats {
    pub keys: u64,
    pub volatile_keys: u64,
    /// Estimated bytes in use
    pub used_memory: u64,
    pub get_ops: u64,
    pub set_ops: u64,
    pub del_ops: u64,
    pub keyspace_hits: u64,
    pub keyspace_misses: u64,
    /// Keys removed by passive or active expiry
    pub expired_keys: u64,
    /// Keys removed by the eviction engine
    pub evicted_keys: u64,
}

/// Redis-style glob matching over bytes: `*`, `?`, `[abc]`, `[^a-z]`, `\x`.
pub(crate) fn glob_match(pattern: &[u8], text: &[u8]) -> bool {
    let (mut p, mut t) = (0, 0);
    // Where to resume after the most recent `*`: (pattern index, text index)
    let mut backtrack: Option<(usize, usize)> = None;

    while t < text.len() {
        let step = match pattern.get(p) {
            Some(b'*') => {
                backtrack = Some((p + 1, t));
                p += 1;
                continue;
            }
            Some(b'?') => Some(p + 1),
            Some(b'[') => match_class(pattern, p, text[t]),
            Some(b'\\') if p + 1 < pattern.len() => {
                (pattern[p + 1] == text[t]).then_some(p + 2)
            }
            Some(&c) => (c == text[t]).then_some(p + 1),
            None => None,
        };

        match (step, backtrack) {
            (Some(next), _) => {
                p = next;
                t += 1;
            }
            (None, Some((star_p, star_t))) => {
                p = star_p;
                t = star_t + 1;
                backtrack = Some((star_p, star_t + 1));
            }
            (None, None) => return false,
        }
    }

    pattern[p..].iter().all(|&c| c == b'*')
}

/// Matches `c` against the class starting at `pattern[start] == b'['`.
/// Returns the index after the closing `]` on a match.
fn match_class(pattern: &[u8], start: usize, c: u8) -> Option<usize> {
    let mut i = start + 1;
    let negate = pattern.get(i) == Some(&b'^');
    if negate {
        i += 1;
    }

    let mut matched = false;
    while i < pattern.len() && pattern[i] != b']' {
        if i + 2 < pattern.len() && pattern[i + 1] == b'-' && pattern[i + 2] != b']' {
            let (lo, hi) = (pattern[i].min(pattern[i + 2]), pattern[i].max(pattern[i + 2]));
            matched |= (lo..=hi).contains(&c);
            i += 3;
        } else {
            matched |= pattern[i] == c;
            i += 1;
        }
    }

    // Unterminated class never matches
    if i >= pattern.len() {
        return None;
    }
    (matched != negate).then_some(i + 1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    fn key(s: &str) -> Bytes {
        Bytes::from(s.to_string())
    }

    fn assert_accounting(engine: &StorageEngine) {
        assert_eq!(engine.memory_used(), engine.recompute_memory());
    }

    #[test]
    fn test_set_and_get() {
        let engine = StorageEngine::new();

        engine.set(key("key"), key("value"));
        let entry = engine.get(b"key").unwrap();
        assert_eq!(entry.value, key("value"));
    }

    #[test]
    fn test_get_nonexistent() {
        let engine = StorageEngine::new();
        assert_eq!(engine.get(b"nonexistent"), None);
        assert_eq!(engine.stats().keyspace_misses, 1);
    }

    #[test]
    fn test_delete() {
        let engine = StorageEngine::new();

        engine.set(key("key"), key("value"));
        assert!(engine.delete(b"key"));
        assert_eq!(engine.get(b"key"), None);
        assert!(!engine.delete(b"key"));
        assert_eq!(engine.memory_used(), 0);
    }

    #[test]
    fn test_overwrite_accounts_only_latest_record() {
        let engine = StorageEngine::new();
        let model = engine.memory_model();

        engine.set(key("a"), key("1"));
        assert_eq!(engine.memory_used(), model.estimate(1, 1));

        engine.set(key("a"), key("22"));
        assert_eq!(engine.memory_used(), model.estimate(1, 2));
        assert_eq!(engine.len(), 1);
        assert_accounting(&engine);
    }

    #[test]
    fn test_accounting_over_mixed_operations() {
        let engine = StorageEngine::new();

        for i in 0..200 {
            engine.set(key(&format!("k{}", i)), Bytes::from(vec![b'x'; i]));
        }
        for i in (0..200).step_by(3) {
            engine.delete(format!("k{}", i).as_bytes());
        }
        for i in (0..200).step_by(7) {
            engine.set_with_ttl(key(&format!("k{}", i)), key("v"), Duration::from_secs(60));
        }
        engine.append(&key("k1"), b"more");
        engine.incr_by(&key("counter"), 10).unwrap();

        assert_accounting(&engine);
        assert_eq!(engine.len() as usize, engine.snapshot().len());
    }

    #[test]
    fn test_fresh_write_resets_access_metadata() {
        let engine = StorageEngine::new();

        engine.set(key("k"), key("v1"));
        engine.get(b"k");
        engine.get(b"k");
        assert_eq!(engine.peek(b"k").unwrap().access_count, 2);

        engine.set(key("k"), key("v2"));
        assert_eq!(engine.peek(b"k").unwrap().access_count, 0);
    }

    #[test]
    fn test_peek_does_not_touch() {
        let engine = StorageEngine::new();
        engine.set(key("k"), key("v"));
        let before = engine.peek(b"k").unwrap();
        assert!(engine.exists(b"k"));
        let after = engine.peek(b"k").unwrap();
        assert_eq!(before.access_count, 0);
        assert_eq!(after.last_accessed, before.last_accessed);
    }

    #[test]
    fn test_expired_record_is_invisible_and_removed() {
        let engine = StorageEngine::new();

        engine.set_with_expiry(key("old"), key("value"), Some(now_ms() - 1_000));
        assert_eq!(engine.len(), 1);

        assert_eq!(engine.get(b"old"), None);
        assert_eq!(engine.len(), 0);
        assert_eq!(engine.memory_used(), 0);
        assert_eq!(engine.stats().expired_keys, 1);
    }

    #[test]
    fn test_expiry_after_ttl() {
        let engine = StorageEngine::new();

        engine.set_with_ttl(key("key"), key("value"), Duration::from_millis(50));
        assert!(engine.exists(b"key"));

        thread::sleep(Duration::from_millis(100));
        assert_eq!(engine.get(b"key"), None);
    }

    #[test]
    fn test_no_expiry_stays_visible() {
        let engine = StorageEngine::new();
        engine.set(key("forever"), key("v"));
        assert_eq!(engine.peek(b"forever").unwrap().expires_at, None);
        assert_eq!(engine.ttl(b"forever"), Some(-1));
    }

    #[test]
    fn test_set_with_options_conditions() {
        let engine = StorageEngine::new();

        let outcome =
            engine.set_with_options(key("k"), key("v1"), SetExpiry::Clear, SetCondition::IfPresent);
        assert!(!outcome.applied);
        assert!(!engine.exists(b"k"));

        let outcome =
            engine.set_with_options(key("k"), key("v1"), SetExpiry::Clear, SetCondition::IfAbsent);
        assert!(outcome.applied);
        assert_eq!(outcome.previous, None);

        let outcome =
            engine.set_with_options(key("k"), key("v2"), SetExpiry::Clear, SetCondition::IfAbsent);
        assert!(!outcome.applied);
        assert_eq!(outcome.previous, Some(key("v1")));

        let outcome =
            engine.set_with_options(key("k"), key("v3"), SetExpiry::Clear, SetCondition::Always);
        assert_eq!(outcome.previous, Some(key("v1")));
        assert_eq!(engine.peek(b"k").unwrap().value, key("v3"));
        assert_accounting(&engine);
    }

    #[test]
    fn test_keep_ttl() {
        let engine = StorageEngine::new();
        let at = now_ms() + 60_000;

        engine.set_with_expiry(key("k"), key("v1"), Some(at));
        engine.set_with_options(key("k"), key("v2"), SetExpiry::Keep, SetCondition::Always);
        assert_eq!(engine.peek(b"k").unwrap().expires_at, Some(at));

        engine.set_with_options(key("k"), key("v3"), SetExpiry::Clear, SetCondition::Always);
        assert_eq!(engine.peek(b"k").unwrap().expires_at, None);
        assert_eq!(engine.volatile_len(), 0);
    }

    #[test]
    fn test_incr() {
        let engine = StorageEngine::new();

        assert_eq!(engine.incr_by(&key("counter"), 1), Ok(1));
        assert_eq!(engine.incr_by(&key("counter"), 1), Ok(2));

        engine.set(key("num"), key("10"));
        assert_eq!(engine.incr_by(&key("num"), -11), Ok(-1));

        engine.set(key("text"), key("hello"));
        assert_eq!(engine.incr_by(&key("text"), 1), Err(StorageError::NotAnInteger));

        engine.set(key("max"), Bytes::from(i64::MAX.to_string()));
        assert_eq!(engine.incr_by(&key("max"), 1), Err(StorageError::Overflow));
        assert_accounting(&engine);
    }

    #[test]
    fn test_incr_keeps_expiry() {
        let engine = StorageEngine::new();
        engine.set_with_ttl(key("n"), key("1"), Duration::from_secs(100));
        engine.incr_by(&key("n"), 1).unwrap();
        assert!(engine.peek(b"n").unwrap().is_volatile());
    }

    #[test]
    fn test_append() {
        let engine = StorageEngine::new();

        assert_eq!(engine.append(&key("key"), b"Hello"), 5);
        assert_eq!(engine.append(&key("key"), b" World"), 11);
        assert_eq!(engine.get(b"key").unwrap().value, key("Hello World"));
        assert_accounting(&engine);
    }

    #[test]
    fn test_take() {
        let engine = StorageEngine::new();
        engine.set(key("k"), key("v"));
        assert_eq!(engine.take(b"k"), Some(key("v")));
        assert_eq!(engine.take(b"k"), None);
        assert_eq!(engine.memory_used(), 0);
    }

    #[test]
    fn test_ttl_and_persist() {
        let engine = StorageEngine::new();

        assert_eq!(engine.ttl(b"nonexistent"), None);

        engine.set(key("key"), key("value"));
        assert!(!engine.persist(b"key"));
        assert!(engine.expire(b"key", Duration::from_secs(60)));
        assert_eq!(engine.volatile_len(), 1);

        let ttl = engine.ttl(b"key").unwrap();
        assert!(ttl > 0 && ttl <= 60);

        assert!(engine.persist(b"key"));
        assert_eq!(engine.ttl(b"key"), Some(-1));
        assert_eq!(engine.volatile_len(), 0);
    }

    #[test]
    fn test_set_expiry_leaves_metadata_alone() {
        let engine = StorageEngine::new();
        engine.set(key("k"), key("v"));
        engine.get(b"k");
        let before = engine.peek(b"k").unwrap();

        engine.expire(b"k", Duration::from_secs(5));
        let after = engine.peek(b"k").unwrap();
        assert_eq!(after.access_count, before.access_count);
        assert_eq!(after.last_accessed, before.last_accessed);
        assert_accounting(&engine);
    }

    #[test]
    fn test_evict_counts_separately() {
        let engine = StorageEngine::new();
        engine.set(key("k"), key("v"));
        assert!(engine.evict(b"k"));
        assert!(!engine.evict(b"k"));

        let stats = engine.stats();
        assert_eq!(stats.evicted_keys, 1);
        assert_eq!(stats.expired_keys, 0);
        assert_eq!(stats.used_memory, 0);
    }

    #[test]
    fn test_estimate_growth() {
        let engine = StorageEngine::new();
        let model = engine.memory_model();
        assert_eq!(engine.estimate_growth(b"k", 3), model.estimate(1, 3) as i64);

        engine.set(key("k"), key("abc"));
        assert_eq!(engine.estimate_growth(b"k", 3), 0);
        assert_eq!(engine.estimate_growth(b"k", 1), -2);
    }

    #[test]
    fn test_sample_full_and_partial() {
        use rand::rngs::StdRng;
        use rand::SeedableRng;

        let engine = StorageEngine::new();
        for i in 0..100 {
            engine.set(key(&format!("key{}", i)), key("v"));
        }
        let mut rng = StdRng::seed_from_u64(7);

        assert_eq!(engine.sample(500, &mut rng).len(), 100);

        let sample = engine.sample(5, &mut rng);
        assert_eq!(sample.len(), 5);
        let mut keys: Vec<_> = sample.iter().map(|(k, _)| k.clone()).collect();
        keys.sort();
        keys.dedup();
        assert_eq!(keys.len(), 5);

        assert!(StorageEngine::new().sample(5, &mut rng).is_empty());
    }

    #[test]
    fn test_keys_pattern() {
        let engine = StorageEngine::new();

        engine.set(key("hello"), key("1"));
        engine.set(key("hallo"), key("2"));
        engine.set(key("hxllo"), key("3"));
        engine.set(key("world"), key("4"));

        assert_eq!(engine.keys("*").len(), 4);
        assert_eq!(engine.keys("h*llo").len(), 3);
        assert_eq!(engine.keys("h?llo").len(), 3);
        assert_eq!(engine.keys("h[ae]llo").len(), 2);
    }

    #[test]
    fn test_glob_match() {
        assert!(glob_match(b"h*llo", b"hllo"));
        assert!(glob_match(b"h*llo", b"heeeello"));
        assert!(!glob_match(b"h*llo", b"world"));
        assert!(glob_match(b"h?llo", b"hallo"));
        assert!(!glob_match(b"h?llo", b"heello"));
        assert!(glob_match(b"*", b""));
        assert!(glob_match(b"h[a-c]llo", b"hbllo"));
        assert!(!glob_match(b"h[^e]llo", b"hello"));
        assert!(glob_match(b"a\\*b", b"a*b"));
        assert!(!glob_match(b"a\\*b", b"axb"));
        assert!(glob_match(b"user:*:name", b"user:42:name"));
        assert!(!glob_match(b"h[ab", b"ha"));
    }

    #[test]
    fn test_flush() {
        let engine = StorageEngine::new();

        engine.set(key("key1"), key("value1"));
        engine.set_with_ttl(key("key2"), key("value2"), Duration::from_secs(10));
        engine.flush();

        assert!(engine.is_empty());
        assert_eq!(engine.memory_used(), 0);
        assert_eq!(engine.volatile_len(), 0);
    }

    #[test]
    fn test_cleanup_expired() {
        let engine = StorageEngine::new();
        let now = now_ms();

        engine.set_with_expiry(key("key1"), key("value1"), Some(now - 10));
        engine.set_with_expiry(key("key2"), key("value2"), Some(now - 10));
        engine.set_with_expiry(key("key3"), key("value3"), Some(now + 60_000));
        engine.set(key("key4"), key("value4"));

        let stats = engine.cleanup_expired(now);
        assert_eq!(stats, SweepStats { scanned: 3, expired: 2 });
        assert_eq!(engine.len(), 2);
        assert_eq!(engine.stats().expired_keys, 2);
        assert_accounting(&engine);
    }

    #[test]
    fn test_concurrent_access() {
        let engine = Arc::new(StorageEngine::new());
        let mut handles = vec![];

        for i in 0..10 {
            let engine = Arc::clone(&engine);
            handles.push(thread::spawn(move || {
                for j in 0..100 {
                    let k = format!("key-{}-{}", i, j);
                    engine.set(Bytes::from(k.clone()), Bytes::from("value"));
                    engine.get(k.as_bytes());
                }
            }));
        }

        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(engine.len(), 1000);
        assert_accounting(&engine);
    }

    #[test]
    fn test_concurrent_gets_do_not_lose_counts() {
        let engine = Arc::new(StorageEngine::new());
        engine.set(key("hot"), key("v"));
        engine.get(b"hot");
        let before = engine.peek(b"hot").unwrap().access_count;

        let threads = 8;
        let reads_per_thread = 250;
        let handles: Vec<_> = (0..threads)
            .map(|_| {
                let engine = Arc::clone(&engine);
                thread::spawn(move || {
                    for _ in 0..reads_per_thread {
                        assert!(engine.get(b"hot").is_some());
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let after = engine.peek(b"hot").unwrap().access_count;
        assert_eq!(after, before + threads * reads_per_thread);
    }
}
