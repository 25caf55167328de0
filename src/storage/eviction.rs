//! Memory-Ceiling Eviction
//!
//! When the store's estimated memory passes the configured ceiling, the
//! [`Evictor`] removes keys until usage is back under it. Candidates are found
//! by sampling rather than by keeping a global ordering:
//!
//! 1. Draw `samples` random (key, record) pairs from the store
//! 2. Keep only the ones the policy's scope allows (volatile = has an expiry)
//! 3. Pick the best victim by the policy's criterion and evict it
//! 4. Repeat until under the ceiling, or until a pass finds no candidate
//!
//! Each eviction is its own critical section in the store; the loop as a whole
//! is not atomic and other connections keep writing while it runs.
//!
//! Settings live in atomics (and a lock for the policy) so `CONFIG SET` takes
//! effect on the next write without restarting anything.

use crate::storage::engine::{StorageEngine, StorageError};
use crate::storage::entry::{has_expired, now_ms, Entry};
use bytes::Bytes;
use parking_lot::{Mutex, RwLock};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};

/// Default number of keys examined per eviction pass.
pub const DEFAULT_SAMPLES: usize = 5;

/// Which keys a policy may evict.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvictionScope {
    AllKeys,
    /// Only keys with an expiry set
    Volatile,
}

/// How a policy ranks the eligible keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvictionCriterion {
    Random,
    /// Oldest last access first
    Lru,
    /// Fewest reads first
    Lfu,
    /// Nearest expiry first
    Ttl,
}

/// The `maxmemory-policy` setting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EvictionPolicy {
    /// Reject writes that would pass the ceiling
    #[default]
    NoEviction,
    AllKeysRandom,
    AllKeysLru,
    AllKeysLfu,
    VolatileRandom,
    VolatileLru,
    VolatileLfu,
    VolatileTtl,
}

impl EvictionPolicy {
    pub const ALL: [EvictionPolicy; 8] = [
        EvictionPolicy::NoEviction,
        EvictionPolicy::AllKeysRandom,
        EvictionPolicy::AllKeysLru,
        EvictionPolicy::AllKeysLfu,
        EvictionPolicy::VolatileRandom,
        EvictionPolicy::VolatileLru,
        EvictionPolicy::VolatileLfu,
        EvictionPolicy::VolatileTtl,
    ];

    /// Scope and criterion, or `None` for `noeviction`.
    pub fn rule(self) -> Option<(EvictionScope, EvictionCriterion)> {
        use EvictionCriterion::*;
        use EvictionScope::*;

        match self {
            EvictionPolicy::NoEviction => None,
            EvictionPolicy::AllKeysRandom => Some((AllKeys, Random)),
            EvictionPolicy::AllKeysLru => Some((AllKeys, Lru)),
            EvictionPolicy::AllKeysLfu => Some((AllKeys, Lfu)),
            EvictionPolicy::VolatileRandom => Some((Volatile, Random)),
            EvictionPolicy::VolatileLru => Some((Volatile, Lru)),
            EvictionPolicy::VolatileLfu => Some((Volatile, Lfu)),
            EvictionPolicy::VolatileTtl => Some((Volatile, Ttl)),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            EvictionPolicy::NoEviction => "noeviction",
            EvictionPolicy::AllKeysRandom => "allkeys-random",
            EvictionPolicy::AllKeysLru => "allkeys-lru",
            EvictionPolicy::AllKeysLfu => "allkeys-lfu",
            EvictionPolicy::VolatileRandom => "volatile-random",
            EvictionPolicy::VolatileLru => "volatile-lru",
            EvictionPolicy::VolatileLfu => "volatile-lfu",
            EvictionPolicy::VolatileTtl => "volatile-ttl",
        }
    }
}

impl fmt::Display for EvictionPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown eviction policy '{0}'")]
pub struct UnknownPolicy(pub String);

impl FromStr for EvictionPolicy {
    type Err = UnknownPolicy;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EvictionPolicy::ALL
            .into_iter()
            .find(|p| p.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| UnknownPolicy(s.to_string()))
    }
}

/// Initial eviction settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EvictionConfig {
    /// Memory ceiling in bytes (0 = unlimited)
    pub max_memory: u64,
    pub policy: EvictionPolicy,
    /// Keys sampled per pass
    pub samples: usize,
}

impl Default for EvictionConfig {
    fn default() -> Self {
        Self {
            max_memory: 0,
            policy: EvictionPolicy::NoEviction,
            samples: DEFAULT_SAMPLES,
        }
    }
}

/// Picks the victim among `candidates` for the given scope and criterion.
///
/// Ties on the criterion go to the smallest key, so a fixed sample always
/// yields the same victim. `Random` draws from `rng` among the eligible keys.
pub fn select_victim<'a, R: Rng + ?Sized>(
    candidates: &'a [(Bytes, Entry)],
    scope: EvictionScope,
    criterion: EvictionCriterion,
    rng: &mut R,
) -> Option<&'a Bytes> {
    let mut eligible: Vec<&(Bytes, Entry)> = candidates
        .iter()
        .filter(|(_, entry)| scope == EvictionScope::AllKeys || entry.is_volatile())
        .collect();

    if eligible.is_empty() {
        return None;
    }

    let victim = match criterion {
        EvictionCriterion::Random => {
            eligible.sort_by(|a, b| a.0.cmp(&b.0));
            eligible[rng.gen_range(0..eligible.len())]
        }
        EvictionCriterion::Lru => eligible
            .into_iter()
            .min_by(|a, b| (a.1.last_accessed, &a.0).cmp(&(b.1.last_accessed, &b.0)))?,
        EvictionCriterion::Lfu => eligible
            .into_iter()
            .min_by(|a, b| (a.1.access_count, &a.0).cmp(&(b.1.access_count, &b.0)))?,
        EvictionCriterion::Ttl => eligible.into_iter().min_by(|a, b| {
            let a_at = a.1.expires_at.unwrap_or(u64::MAX);
            let b_at = b.1.expires_at.unwrap_or(u64::MAX);
            (a_at, &a.0).cmp(&(b_at, &b.0))
        })?,
    };

    Some(&victim.0)
}

/// The eviction engine bound to one store.
pub struct Evictor {
    engine: Arc<StorageEngine>,
    max_memory: AtomicU64,
    samples: AtomicUsize,
    policy: RwLock<EvictionPolicy>,
    rng: Mutex<StdRng>,
}

impl fmt::Debug for Evictor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Evictor")
            .field("max_memory", &self.max_memory())
            .field("policy", &self.policy())
            .field("samples", &self.samples())
            .finish()
    }
}

impl Evictor {
    /// Creates an evictor seeded from the OS.
    pub fn new(engine: Arc<StorageEngine>, config: EvictionConfig) -> Self {
        Self::with_rng(engine, config, StdRng::from_entropy())
    }

    /// Creates an evictor drawing samples from `rng`, for reproducible runs.
    pub fn with_rng(engine: Arc<StorageEngine>, config: EvictionConfig, rng: StdRng) -> Self {
        Self {
            engine,
            max_memory: AtomicU64::new(config.max_memory),
            samples: AtomicUsize::new(config.samples.max(1)),
            policy: RwLock::new(config.policy),
            rng: Mutex::new(rng),
        }
    }

    pub fn max_memory(&self) -> u64 {
        self.max_memory.load(Ordering::Relaxed)
    }

    pub fn set_max_memory(&self, bytes: u64) {
        self.max_memory.store(bytes, Ordering::Relaxed);
    }

    pub fn policy(&self) -> EvictionPolicy {
        *self.policy.read()
    }

    pub fn set_policy(&self, policy: EvictionPolicy) {
        *self.policy.write() = policy;
    }

    pub fn samples(&self) -> usize {
        self.samples.load(Ordering::Relaxed)
    }

    /// Sets the sample size. Zero is raised to one.
    pub fn set_samples(&self, samples: usize) {
        self.samples.store(samples.max(1), Ordering::Relaxed);
    }

    /// Current settings as one value.
    pub fn config(&self) -> EvictionConfig {
        EvictionConfig {
            max_memory: self.max_memory(),
            policy: self.policy(),
            samples: self.samples(),
        }
    }

    fn out_of_memory(&self) -> StorageError {
        StorageError::OutOfMemory {
            used: self.engine.memory_used(),
            limit: self.max_memory(),
        }
    }

    /// Runs one sampling pass and evicts the chosen key.
    ///
    /// Returns the removed key, or `None` when the policy never evicts or the
    /// sample held no eligible key.
    pub fn evict_one(&self) -> Option<Bytes> {
        self.evict_sparing(&[])
    }

    /// One sampling pass that never picks a key in `spare`.
    ///
    /// Sampled keys that have already expired are reaped as expired instead,
    /// and a pass that reaps anything evicts nothing.
    fn evict_sparing(&self, spare: &[&Bytes]) -> Option<Bytes> {
        let (scope, criterion) = self.policy().rule()?;
        if scope == EvictionScope::Volatile && self.engine.volatile_len() == 0 {
            return None;
        }

        let now = now_ms();
        let mut rng = self.rng.lock();
        let mut candidates = self
            .engine
            .sample(self.samples() + spare.len(), &mut *rng);
        candidates.retain(|(key, _)| !spare.contains(&key));

        let mut reaped = None;
        candidates.retain(|(key, entry)| {
            if !has_expired(entry, now) {
                return true;
            }
            if self.engine.remove_if_expired(key) {
                reaped = Some(key.clone());
            }
            false
        });
        if reaped.is_some() {
            return reaped;
        }

        let victim = select_victim(&candidates, scope, criterion, &mut *rng)?.clone();
        drop(rng);

        // Another connection may have removed it since the sample; that pass
        // still made progress towards the ceiling.
        self.engine.evict(&victim);
        Some(victim)
    }

    /// Evicts until usage is at or below `target` bytes.
    ///
    /// Returns the number of keys removed. Fails with `OutOfMemory` when the
    /// policy is `noeviction` or a pass runs out of candidates first.
    pub fn free_memory(&self, target: u64) -> Result<u64, StorageError> {
        self.free_memory_sparing(target, &[])
    }

    fn free_memory_sparing(&self, target: u64, spare: &[&Bytes]) -> Result<u64, StorageError> {
        let mut evicted = 0u64;

        while self.engine.memory_used() > target {
            match self.evict_sparing(spare) {
                Some(key) => {
                    evicted += 1;
                    debug!(
                        key = ?key,
                        used_memory = self.engine.memory_used(),
                        target,
                        "evicted key"
                    );
                }
                None => {
                    warn!(
                        policy = %self.policy(),
                        used_memory = self.engine.memory_used(),
                        target,
                        evicted,
                        "no eviction candidate left"
                    );
                    return Err(self.out_of_memory());
                }
            }
        }

        if evicted > 0 {
            debug!(
                evicted,
                used_memory = self.engine.memory_used(),
                "eviction pass complete"
            );
        }
        Ok(evicted)
    }

    /// Brings usage back under the ceiling, if one is set.
    pub fn enforce(&self) -> Result<u64, StorageError> {
        match self.max_memory() {
            0 => Ok(0),
            limit => self.free_memory(limit),
        }
    }

    /// Admission check for a write to `keys` that changes usage by `growth`
    /// bytes.
    ///
    /// Writes that do not grow usage always pass. A growing write passes once
    /// usage plus growth fits under the ceiling, evicting first if the policy
    /// allows. The keys being written are never evicted. A write larger than
    /// the ceiling itself is rejected without evicting anything.
    pub fn make_room(&self, growth: i64, keys: &[&Bytes]) -> Result<(), StorageError> {
        let limit = self.max_memory();
        if limit == 0 || growth <= 0 {
            return Ok(());
        }

        let growth = growth as u64;
        if growth > limit {
            return Err(self.out_of_memory());
        }

        let target = limit - growth;
        if self.engine.memory_used() <= target {
            return Ok(());
        }

        if self.policy() == EvictionPolicy::NoEviction {
            return Err(self.out_of_memory());
        }
        self.free_memory_sparing(target, keys).map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Duration;

    fn key(s: &str) -> Bytes {
        Bytes::from(s.to_string())
    }

    fn evictor(engine: &Arc<StorageEngine>, policy: EvictionPolicy, max_memory: u64) -> Evictor {
        Evictor::with_rng(
            Arc::clone(engine),
            EvictionConfig {
                max_memory,
                policy,
                samples: 64,
            },
            StdRng::seed_from_u64(42),
        )
    }

    #[test]
    fn test_policy_names_roundtrip() {
        for policy in EvictionPolicy::ALL {
            assert_eq!(policy.as_str().parse::<EvictionPolicy>(), Ok(policy));
        }
        assert_eq!("ALLKEYS-LRU".parse(), Ok(EvictionPolicy::AllKeysLru));
        assert!("allkeys-ttl".parse::<EvictionPolicy>().is_err());
        assert_eq!(EvictionPolicy::default(), EvictionPolicy::NoEviction);
    }

    #[test]
    fn test_lru_spares_recently_read_key() {
        let engine = Arc::new(StorageEngine::new());
        for k in ["k1", "k2", "k3"] {
            engine.set(key(k), key("v"));
            thread::sleep(Duration::from_millis(2));
        }
        engine.get(b"k1");

        let evictor = evictor(&engine, EvictionPolicy::AllKeysLru, 0);
        assert_eq!(evictor.evict_one(), Some(key("k2")));
        assert_eq!(evictor.evict_one(), Some(key("k3")));
        assert!(engine.exists(b"k1"));
    }

    #[test]
    fn test_lfu_prefers_unread_key() {
        let engine = Arc::new(StorageEngine::new());
        engine.set(key("read"), key("v"));
        engine.set(key("unread"), key("v"));
        for _ in 0..3 {
            engine.get(b"read");
        }

        let evictor = evictor(&engine, EvictionPolicy::AllKeysLfu, 0);
        assert_eq!(evictor.evict_one(), Some(key("unread")));
    }

    #[test]
    fn test_volatile_scope_never_picks_persistent_keys() {
        let engine = Arc::new(StorageEngine::new());
        // Oldest and never read: the best candidate under any criterion
        engine.set(key("persistent"), key("v"));
        thread::sleep(Duration::from_millis(2));
        engine.set_with_ttl(key("volatile"), key("v"), Duration::from_secs(60));
        engine.get(b"volatile");

        for policy in [
            EvictionPolicy::VolatileLru,
            EvictionPolicy::VolatileLfu,
            EvictionPolicy::VolatileRandom,
            EvictionPolicy::VolatileTtl,
        ] {
            engine.set_with_ttl(key("volatile"), key("v"), Duration::from_secs(60));
            let evictor = evictor(&engine, policy, 0);
            assert_eq!(evictor.evict_one(), Some(key("volatile")), "{}", policy);
            assert_eq!(evictor.evict_one(), None, "{}", policy);
            assert!(engine.exists(b"persistent"));
        }
    }

    #[test]
    fn test_volatile_ttl_picks_nearest_expiry() {
        let engine = Arc::new(StorageEngine::new());
        engine.set_with_ttl(key("later"), key("v"), Duration::from_secs(600));
        engine.set_with_ttl(key("sooner"), key("v"), Duration::from_secs(60));

        let evictor = evictor(&engine, EvictionPolicy::VolatileTtl, 0);
        assert_eq!(evictor.evict_one(), Some(key("sooner")));
    }

    #[test]
    fn test_ties_break_on_key_order() {
        let entry = Entry::new(key("v"));
        let candidates = vec![
            (key("c"), entry.clone()),
            (key("a"), entry.clone()),
            (key("b"), entry),
        ];
        let mut rng = StdRng::seed_from_u64(1);

        for criterion in [EvictionCriterion::Lru, EvictionCriterion::Lfu] {
            let victim = select_victim(&candidates, EvictionScope::AllKeys, criterion, &mut rng);
            assert_eq!(victim, Some(&key("a")));
        }
    }

    #[test]
    fn test_random_is_reproducible_with_seed() {
        let candidates: Vec<_> = (0..10)
            .map(|i| (key(&format!("k{}", i)), Entry::new(key("v"))))
            .collect();
        let pick = |seed| {
            let mut rng = StdRng::seed_from_u64(seed);
            select_victim(&candidates, EvictionScope::AllKeys, EvictionCriterion::Random, &mut rng)
                .cloned()
        };
        assert!(pick(9).is_some());
        assert_eq!(pick(9), pick(9));
    }

    #[test]
    fn test_seeded_eviction_order_is_reproducible() {
        let run = || {
            let engine = Arc::new(StorageEngine::new());
            for i in 0..200 {
                engine.set(key(&format!("key:{:03}", i)), key("value"));
            }
            let evictor = Evictor::with_rng(
                Arc::clone(&engine),
                EvictionConfig {
                    max_memory: 0,
                    policy: EvictionPolicy::AllKeysRandom,
                    samples: 5,
                },
                StdRng::seed_from_u64(42),
            );
            (0..5).filter_map(|_| evictor.evict_one()).collect::<Vec<_>>()
        };

        let first = run();
        assert_eq!(first.len(), 5);
        assert_eq!(first, run());
    }

    #[test]
    fn test_sampled_expired_key_counts_as_expired() {
        let engine = Arc::new(StorageEngine::new());
        engine.set_with_expiry(key("stale"), key("v"), Some(now_ms() - 1_000));
        engine.set(key("live1"), key("v"));
        engine.set(key("live2"), key("v"));

        let evictor = evictor(&engine, EvictionPolicy::AllKeysLru, 0);
        assert_eq!(evictor.evict_one(), Some(key("stale")));
        let stats = engine.stats();
        assert_eq!(stats.expired_keys, 1);
        assert_eq!(stats.evicted_keys, 0);
        assert_eq!(engine.len(), 2);

        let evicted = evictor.evict_one();
        assert!(evicted == Some(key("live1")) || evicted == Some(key("live2")));
        let stats = engine.stats();
        assert_eq!(stats.expired_keys, 1);
        assert_eq!(stats.evicted_keys, 1);
    }

    #[test]
    fn test_free_memory_reaps_expired_before_evicting() {
        let engine = Arc::new(StorageEngine::new());
        engine.set_with_expiry(key("gone1"), key("v"), Some(now_ms() - 1_000));
        engine.set_with_expiry(key("gone2"), key("v"), Some(now_ms() - 1_000));
        engine.set(key("keep"), key("v"));
        let per_key = engine.memory_model().estimate(5, 1);

        let evictor = evictor(&engine, EvictionPolicy::VolatileLru, per_key);
        assert!(evictor.enforce().is_ok());
        assert_eq!(engine.memory_used(), engine.memory_model().estimate(4, 1));
        let stats = engine.stats();
        assert_eq!(stats.expired_keys, 2);
        assert_eq!(stats.evicted_keys, 0);
    }

    #[test]
    fn test_free_memory_reaches_target() {
        let engine = Arc::new(StorageEngine::new());
        for i in 0..50 {
            engine.set(key(&format!("key{:02}", i)), Bytes::from(vec![b'x'; 100]));
        }
        let per_key = engine.memory_model().estimate(5, 100);
        let target = per_key * 20;

        let evictor = evictor(&engine, EvictionPolicy::AllKeysRandom, target);
        assert_eq!(evictor.enforce(), Ok(30));
        assert!(engine.memory_used() <= target);
        assert_eq!(engine.len(), 20);
        assert_eq!(engine.stats().evicted_keys, 30);
    }

    #[test]
    fn test_noeviction_rejects_growing_write() {
        let engine = Arc::new(StorageEngine::new());
        engine.set(key("a"), key("1"));
        engine.set(key("b"), key("2"));
        let limit = engine.memory_used() - 1;

        let evictor = evictor(&engine, EvictionPolicy::NoEviction, limit);
        let before = engine.snapshot().len();
        let result = evictor.make_room(engine.estimate_growth(b"c", 1), &[]);

        assert!(matches!(result, Err(StorageError::OutOfMemory { .. })));
        assert_eq!(engine.snapshot().len(), before);
        assert!(!engine.exists(b"c"));

        // Shrinking writes still pass
        assert_eq!(evictor.make_room(engine.estimate_growth(b"a", 0), &[]), Ok(()));
    }

    #[test]
    fn test_make_room_evicts_for_growth() {
        let engine = Arc::new(StorageEngine::new());
        engine.set(key("a"), key("1"));
        engine.set(key("b"), key("2"));
        let limit = engine.memory_used();

        let evictor = evictor(&engine, EvictionPolicy::AllKeysLru, limit);
        let growth = engine.estimate_growth(b"c", 1);
        assert_eq!(evictor.make_room(growth, &[]), Ok(()));
        assert_eq!(engine.len(), 1);
        assert!(engine.memory_used() + growth as u64 <= limit);
    }

    #[test]
    fn test_exhausted_candidates_is_out_of_memory() {
        let engine = Arc::new(StorageEngine::new());
        engine.set(key("persistent"), Bytes::from(vec![b'x'; 64]));

        let evictor = evictor(&engine, EvictionPolicy::VolatileLru, 100);
        let result = evictor.make_room(50, &[]);
        assert!(matches!(
            result,
            Err(StorageError::OutOfMemory { limit: 100, .. })
        ));
        assert!(engine.exists(b"persistent"));
    }

    #[test]
    fn test_write_larger_than_ceiling_is_rejected() {
        let engine = Arc::new(StorageEngine::new());
        engine.set(key("a"), key("1"));

        let evictor = evictor(&engine, EvictionPolicy::AllKeysLru, 100);
        assert!(evictor.make_room(101, &[]).is_err());
        assert!(engine.exists(b"a"));
    }

    #[test]
    fn test_unlimited_memory_never_evicts() {
        let engine = Arc::new(StorageEngine::new());
        engine.set(key("a"), key("1"));

        let evictor = evictor(&engine, EvictionPolicy::AllKeysLru, 0);
        assert_eq!(evictor.make_room(1 << 40, &[]), Ok(()));
        assert_eq!(evictor.enforce(), Ok(0));
        assert!(engine.exists(b"a"));
    }

    #[test]
    fn test_runtime_reconfiguration() {
        let engine = Arc::new(StorageEngine::new());
        let evictor = Evictor::new(Arc::clone(&engine), EvictionConfig::default());

        evictor.set_policy(EvictionPolicy::VolatileTtl);
        evictor.set_max_memory(1024);
        evictor.set_samples(0);

        assert_eq!(
            evictor.config(),
            EvictionConfig {
                max_memory: 1024,
                policy: EvictionPolicy::VolatileTtl,
                samples: 1,
            }
        );
    }
}
