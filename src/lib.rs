//! # CinderKV - A Memory-Bounded In-Memory Key-Value Store
//!
//! CinderKV speaks the Redis wire protocol (RESP) and keeps every key in
//! memory under an optional byte ceiling. When a write would cross the
//! ceiling, a sampling eviction engine removes keys according to the
//! configured policy, or the write is refused with an `OOM` error.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                              CinderKV                                   │
//! │                                                                         │
//! │  ┌─────────────┐    ┌─────────────┐    ┌─────────────┐                  │
//! │  │ TCP Server  │───>│ Connection  │───>│  Command    │──────┐           │
//! │  │ (Listener)  │    │  Handler    │    │  Handler    │      │ admit     │
//! │  └─────────────┘    └─────────────┘    └──────┬──────┘      ▼           │
//! │                                               │      ┌─────────────┐    │
//! │  ┌─────────────┐                              │      │   Evictor   │    │
//! │  │ RespReader  │                              │      │  (sampling) │    │
//! │  │ RespWriter  │                              ▼      └──────┬──────┘    │
//! │  └─────────────┘    ┌──────────────────────────────────────────────┐   │
//! │                     │              StorageEngine                   │   │
//! │                     │  64 shards, atomic memory accounting         │   │
//! │                     └──────────────────────────────────────────────┘   │
//! │                                               ▲                         │
//! │                     ┌─────────────────────────┴───────────────────────┐ │
//! │                     │  ExpirySweeper (adaptive background task)       │ │
//! │                     └─────────────────────────────────────────────────┘ │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```ignore
//! use cinderkv::commands::CommandHandler;
//! use cinderkv::connection::{handle_connection, ConnectionStats};
//! use cinderkv::storage::{EvictionConfig, EvictionPolicy, Evictor, ExpiryConfig, ExpirySweeper, StorageEngine};
//! use std::sync::Arc;
//! use tokio::net::TcpListener;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let storage = Arc::new(StorageEngine::new());
//!     let evictor = Arc::new(Evictor::new(
//!         Arc::clone(&storage),
//!         EvictionConfig {
//!             max_memory: 64 * 1024 * 1024,
//!             policy: EvictionPolicy::AllKeysLru,
//!             samples: 5,
//!         },
//!     ));
//!     let _sweeper = ExpirySweeper::start(Arc::clone(&storage), ExpiryConfig::default());
//!     let stats = Arc::new(ConnectionStats::new());
//!     let handler = CommandHandler::new(storage, evictor, Arc::clone(&stats));
//!
//!     let listener = TcpListener::bind("127.0.0.1:6379").await?;
//!     loop {
//!         let (stream, addr) = listener.accept().await?;
//!         tokio::spawn(handle_connection(stream, addr, handler.clone(), Arc::clone(&stats)));
//!     }
//! }
//! ```
//!
//! ## Module Overview
//!
//! - [`protocol`]: RESP value type, incremental parser, async reader and writer
//! - [`storage`]: sharded keyspace, memory model, expiry sweeper, eviction
//! - [`commands`]: command dispatch and admission against the memory ceiling
//! - [`connection`]: per-client request loop and connection counters
//! - [`config`]: command-line flags and config file directives
//!
//! ## Memory Accounting
//!
//! Every stored record is charged `key + value + fixed overhead` bytes. The
//! total is updated atomically inside the shard lock that performs the
//! insert, overwrite or removal, so `used_memory` always equals the sum of
//! the live records.
//!
//! ## Expiry
//!
//! Expired keys are removed lazily when touched and actively by the
//! [`storage::ExpirySweeper`], whose interval shortens while many keys are
//! expiring and lengthens while none are.

pub mod commands;
pub mod config;
pub mod connection;
pub mod protocol;
pub mod storage;

pub use commands::{CommandError, CommandHandler};
pub use config::{ConfigError, ServerConfig};
pub use connection::{handle_connection, ConnectionStats};
pub use protocol::{ProtocolError, RespParser, RespReader, RespValue, RespWriter};
pub use storage::{
    EvictionConfig, EvictionPolicy, Evictor, ExpiryConfig, ExpirySweeper, StorageEngine,
    StorageError,
};

/// Default listening port (same as Redis)
pub const DEFAULT_PORT: u16 = 6379;

/// Default bind address
pub const DEFAULT_HOST: &str = "127.0.0.1";

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
