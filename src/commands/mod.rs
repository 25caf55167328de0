//! Command Layer
//!
//! Receives decoded requests, runs them against the storage engine and
//! returns reply values.
//!
//! ```text
//! Client Request
//!       │
//!       ▼
//! ┌─────────────────┐
//! │  RespReader     │  (protocol module)
//! └────────┬────────┘
//!          │
//!          ▼
//! ┌─────────────────┐      ┌─────────────────┐
//! │ CommandHandler  │─────>│    Evictor      │  make room before writes
//! └────────┬────────┘      └────────┬────────┘
//!          │                        │
//!          ▼                        ▼
//! ┌──────────────────────────────────────────┐
//! │              StorageEngine               │
//! └──────────────────────────────────────────┘
//! ```
//!
//! ## Supported Commands
//!
//! ### String Commands
//! - `SET` (with `EX`/`PX`/`EXAT`/`PXAT`/`KEEPTTL`, `NX`/`XX`, `GET`), `GET`
//! - `GETSET`, `GETDEL`, `SETNX`, `SETEX`, `PSETEX`
//! - `MSET`, `MGET`, `APPEND`, `STRLEN`
//! - `INCR`, `INCRBY`, `DECR`, `DECRBY`
//!
//! ### Key Commands
//! - `DEL`, `EXISTS`, `KEYS`, `TYPE`
//! - `EXPIRE`, `PEXPIRE`, `EXPIREAT`, `PEXPIREAT`
//! - `TTL`, `PTTL`, `PERSIST`
//!
//! ### Server Commands
//! - `PING`, `ECHO`, `INFO`, `DBSIZE`, `FLUSHDB`, `FLUSHALL`
//! - `CONFIG GET|SET` for `maxmemory`, `maxmemory-policy`, `maxmemory-samples`
//! - `COMMAND`, `TIME`, `QUIT`

pub mod handler;

pub use handler::{is_quit, CommandError, CommandHandler, CommandResult, COMMANDS};
