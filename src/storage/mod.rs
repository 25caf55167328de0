//! Storage
//!
//! The keyspace and everything that decides how long a key lives in it.
//!
//! ## Architecture
//!
//! ```text
//!          writes ──► Evictor::make_room ──► StorageEngine ◄── reads
//!                         (sampling)        64 × Mutex<HashMap>
//!                                           used_memory: AtomicU64
//!                                                 ▲
//!                                                 │
//!                                    ┌────────────┴────────────┐
//!                                    │      ExpirySweeper      │
//!                                    │  (Background Tokio Task) │
//!                                    └─────────────────────────┘
//! ```
//!
//! - `entry`: the stored record, the expiry check and the memory cost model
//! - `engine`: the sharded store with incremental memory accounting
//! - `eviction`: sampling-based eviction under a memory ceiling
//! - `expiry`: the background sweeper for keys nobody reads
//!
//! ## Example
//!
//! ```
//! use cinderkv::storage::{EvictionConfig, EvictionPolicy, Evictor, StorageEngine};
//! use bytes::Bytes;
//! use std::sync::Arc;
//!
//! let engine = Arc::new(StorageEngine::new());
//! let evictor = Evictor::new(
//!     Arc::clone(&engine),
//!     EvictionConfig {
//!         max_memory: 1024,
//!         policy: EvictionPolicy::AllKeysLru,
//!         ..Default::default()
//!     },
//! );
//!
//! let key = Bytes::from("session");
//! let growth = engine.estimate_growth(&key, 8);
//! evictor.make_room(growth, &[&key]).unwrap();
//! engine.set(key, Bytes::from("token123"));
//! assert!(engine.memory_used() <= 1024);
//! ```

pub mod engine;
pub mod entry;
pub mod eviction;
pub mod expiry;

pub use engine::{
    SetCondition, SetExpiry, SetOutcome, StorageEngine, StorageError, StorageStats, SweepStats,
};
pub use entry::{has_expired, now_ms, Entry, MemoryModel, NO_EXPIRY};
pub use eviction::{
    select_victim, EvictionConfig, EvictionCriterion, EvictionPolicy, EvictionScope, Evictor,
    UnknownPolicy, DEFAULT_SAMPLES,
};
pub use expiry::{ExpiryConfig, ExpirySweeper, DEFAULT_HZ};
