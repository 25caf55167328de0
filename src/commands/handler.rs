//! Command Execution
//!
//! Turns a decoded request (an array of bulk strings) into calls on the
//! [`StorageEngine`] and a reply value.
//!
//! ## Write admission
//!
//! Every command that can grow the keyspace first asks the [`Evictor`] to make
//! room for the bytes it is about to add. Under `noeviction`, or when eviction
//! runs out of candidates, the write is refused with the OOM error reply and
//! the keyspace is left exactly as it was. The connection stays open.
//!
//! ## Recency and frequency
//!
//! Only commands that read a value (GET, MGET, STRLEN) go through
//! [`StorageEngine::get`] and count as an access. Commands that merely inspect
//! a key (EXISTS, TTL, TYPE, KEYS) use `peek` and leave eviction metadata alone.

use crate::config::parse_memory;
use crate::connection::ConnectionStats;
use crate::protocol::RespValue;
use crate::storage::engine::{glob_match, parse_integer};
use crate::storage::{
    now_ms, EvictionPolicy, Evictor, SetCondition, SetExpiry, StorageEngine, StorageError,
};
use bytes::Bytes;
use std::ops::RangeInclusive;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use thiserror::Error;
use tracing::{debug, trace, warn};

/// A failed command. The display string is the error reply.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CommandError {
    #[error("ERR wrong number of arguments for '{0}' command")]
    WrongArity(String),

    #[error("ERR syntax error")]
    Syntax,

    #[error("ERR value is not an integer or out of range")]
    NotAnInteger,

    #[error("ERR invalid expire time in '{0}' command")]
    InvalidExpire(String),

    #[error("ERR unknown command '{0}'")]
    UnknownCommand(String),

    #[error("ERR Protocol error: expected a bulk string argument")]
    InvalidArgument,

    #[error("ERR {0}")]
    Other(String),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

pub type CommandResult = Result<RespValue, CommandError>;

/// Commands understood by [`CommandHandler`], as listed by COMMAND.
pub const COMMANDS: &[&str] = &[
    "SET", "GET", "GETSET", "GETDEL", "SETNX", "SETEX", "PSETEX", "MSET", "MGET", "APPEND",
    "STRLEN", "INCR", "INCRBY", "DECR", "DECRBY", "DEL", "EXISTS", "EXPIRE", "PEXPIRE",
    "EXPIREAT", "PEXPIREAT", "TTL", "PTTL", "PERSIST", "KEYS", "TYPE", "PING", "ECHO", "DBSIZE",
    "FLUSHDB", "FLUSHALL", "INFO", "CONFIG", "COMMAND", "TIME", "QUIT",
];

/// Settings exposed through CONFIG GET / CONFIG SET.
const CONFIG_PARAMS: &[&str] = &["maxmemory", "maxmemory-policy", "maxmemory-samples"];

/// Returns true if `request` is a QUIT command.
pub fn is_quit(request: &RespValue) -> bool {
    match request {
        RespValue::Array(items) => matches!(
            items.first(),
            Some(RespValue::BulkString(name)) if name.eq_ignore_ascii_case(b"QUIT")
        ),
        _ => false,
    }
}

fn arity(name: &str, args: &[Bytes], allowed: RangeInclusive<usize>) -> Result<(), CommandError> {
    if allowed.contains(&args.len()) {
        Ok(())
    } else {
        Err(CommandError::WrongArity(name.to_string()))
    }
}

fn parse_int(arg: &[u8]) -> Result<i64, CommandError> {
    std::str::from_utf8(arg)
        .ok()
        .and_then(|s| s.parse().ok())
        .ok_or(CommandError::NotAnInteger)
}

fn upper(arg: &[u8]) -> String {
    String::from_utf8_lossy(arg).to_ascii_uppercase()
}

fn bulk_or_null(value: Option<Bytes>) -> RespValue {
    value.map(RespValue::bulk_string).unwrap_or_else(RespValue::null)
}

/// Resolves a relative or absolute expiry argument to unix milliseconds.
///
/// `unit_ms` is 1000 for seconds and 1 for milliseconds.
fn expiry_at(amount: i64, unit_ms: i64, absolute: bool, now: u64) -> Option<i64> {
    let offset = amount.checked_mul(unit_ms)?;
    if absolute {
        Some(offset)
    } else {
        i64::try_from(now).ok()?.checked_add(offset)
    }
}

/// Formats a byte count like Redis' `*_human` INFO fields.
fn human_bytes(bytes: u64) -> String {
    const UNITS: [(&str, f64); 3] = [("G", 1073741824.0), ("M", 1048576.0), ("K", 1024.0)];
    UNITS
        .iter()
        .find(|(_, size)| bytes as f64 >= *size)
        .map(|(unit, size)| format!("{:.2}{}", bytes as f64 / size, unit))
        .unwrap_or_else(|| format!("{}B", bytes))
}

/// Executes commands against a shared store.
///
/// Cheap to clone; every connection gets its own copy.
#[derive(Clone)]
pub struct CommandHandler {
    storage: Arc<StorageEngine>,
    evictor: Arc<Evictor>,
    stats: Arc<ConnectionStats>,
    start_time: Instant,
}

impl CommandHandler {
    pub fn new(
        storage: Arc<StorageEngine>,
        evictor: Arc<Evictor>,
        stats: Arc<ConnectionStats>,
    ) -> Self {
        Self {
            storage,
            evictor,
            stats,
            start_time: Instant::now(),
        }
    }

    pub fn storage(&self) -> &Arc<StorageEngine> {
        &self.storage
    }

    pub fn evictor(&self) -> &Arc<Evictor> {
        &self.evictor
    }

    /// Executes a request and returns the reply. Failures become error replies.
    pub fn execute(&self, request: RespValue) -> RespValue {
        self.try_execute(request)
            .unwrap_or_else(|e| RespValue::error(e.to_string()))
    }

    /// Executes a request, keeping failures as [`CommandError`].
    pub fn try_execute(&self, request: RespValue) -> CommandResult {
        let items = match request {
            RespValue::Array(items) => items,
            _ => return Err(CommandError::InvalidArgument),
        };

        let args = items
            .into_iter()
            .map(|item| match item {
                RespValue::BulkString(b) => Ok(b),
                _ => Err(CommandError::InvalidArgument),
            })
            .collect::<Result<Vec<Bytes>, _>>()?;

        let Some((name, args)) = args.split_first() else {
            return Err(CommandError::Other("empty command".to_string()));
        };

        let name = upper(name);
        trace!(command = %name, argc = args.len(), "Executing command");
        self.dispatch(&name, args)
    }

    fn dispatch(&self, name: &str, args: &[Bytes]) -> CommandResult {
        match name {
            // Strings
            "SET" => self.cmd_set(args),
            "GET" => self.cmd_get(args),
            "GETSET" => self.cmd_getset(args),
            "GETDEL" => self.cmd_getdel(args),
            "SETNX" => self.cmd_setnx(args),
            "SETEX" => self.cmd_setex(args, "setex", 1000),
            "PSETEX" => self.cmd_setex(args, "psetex", 1),
            "MSET" => self.cmd_mset(args),
            "MGET" => self.cmd_mget(args),
            "APPEND" => self.cmd_append(args),
            "STRLEN" => self.cmd_strlen(args),
            "INCR" => self.cmd_incr(args, "incr", Some(1)),
            "DECR" => self.cmd_incr(args, "decr", Some(-1)),
            "INCRBY" => self.cmd_incr(args, "incrby", None),
            "DECRBY" => self.cmd_decrby(args),

            // Keys
            "DEL" => self.cmd_del(args),
            "EXISTS" => self.cmd_exists(args),
            "EXPIRE" => self.cmd_expire(args, "expire", 1000, false),
            "PEXPIRE" => self.cmd_expire(args, "pexpire", 1, false),
            "EXPIREAT" => self.cmd_expire(args, "expireat", 1000, true),
            "PEXPIREAT" => self.cmd_expire(args, "pexpireat", 1, true),
            "TTL" => self.cmd_ttl(args, "ttl", false),
            "PTTL" => self.cmd_ttl(args, "pttl", true),
            "PERSIST" => self.cmd_persist(args),
            "KEYS" => self.cmd_keys(args),
            "TYPE" => self.cmd_type(args),

            // Server
            "PING" => self.cmd_ping(args),
            "ECHO" => self.cmd_echo(args),
            "DBSIZE" => self.cmd_dbsize(args),
            "FLUSHDB" | "FLUSHALL" => self.cmd_flush(args, name),
            "INFO" => self.cmd_info(args),
            "CONFIG" => self.cmd_config(args),
            "COMMAND" => self.cmd_command(args),
            "TIME" => self.cmd_time(args),
            "QUIT" => Ok(RespValue::ok()),

            _ => Err(CommandError::UnknownCommand(name.to_lowercase())),
        }
    }

    // ========================================================================
    // Write admission
    // ========================================================================

    /// Makes room for writes that replace `key`'s value with one of
    /// `value_len` bytes.
    fn admit(&self, writes: &[(&Bytes, usize)]) -> Result<(), CommandError> {
        let growth: i64 = writes
            .iter()
            .map(|(key, len)| self.storage.estimate_growth(key, *len))
            .sum();
        let keys: Vec<&Bytes> = writes.iter().map(|(key, _)| *key).collect();

        self.evictor.make_room(growth, &keys).map_err(|e| {
            warn!(
                growth,
                used_memory = self.storage.memory_used(),
                max_memory = self.evictor.max_memory(),
                policy = %self.evictor.policy(),
                "Write rejected"
            );
            CommandError::from(e)
        })
    }

    /// Length of the live value at `key`, without counting an access.
    fn current_len(&self, key: &[u8]) -> usize {
        self.storage.peek(key).map(|e| e.value.len()).unwrap_or(0)
    }

    /// Whether a conditional write to `key` would currently apply.
    fn condition_holds(&self, key: &[u8], condition: SetCondition) -> bool {
        match condition {
            SetCondition::Always => true,
            SetCondition::IfAbsent => !self.storage.exists(key),
            SetCondition::IfPresent => self.storage.exists(key),
        }
    }

    // ========================================================================
    // String commands
    // ========================================================================

    /// SET key value [EX s | PX ms | EXAT s | PXAT ms | KEEPTTL] [NX | XX] [GET]
    fn cmd_set(&self, args: &[Bytes]) -> CommandResult {
        arity("set", args, 2..=usize::MAX)?;
        let (key, value) = (&args[0], &args[1]);

        let now = now_ms();
        let mut expiry = None;
        let mut condition = SetCondition::Always;
        let mut return_previous = false;

        let mut options = args[2..].iter();
        while let Some(option) = options.next() {
            match upper(option).as_str() {
                "NX" if condition == SetCondition::Always => condition = SetCondition::IfAbsent,
                "XX" if condition == SetCondition::Always => condition = SetCondition::IfPresent,
                "GET" => return_previous = true,
                "KEEPTTL" if expiry.is_none() => expiry = Some(SetExpiry::Keep),
                unit @ ("EX" | "PX" | "EXAT" | "PXAT") if expiry.is_none() => {
                    let amount = parse_int(options.next().ok_or(CommandError::Syntax)?)?;
                    let unit_ms = if unit.starts_with('E') { 1000 } else { 1 };
                    let at = match expiry_at(amount, unit_ms, unit.ends_with("AT"), now) {
                        Some(at) if amount > 0 && at > 0 => at as u64,
                        _ => return Err(CommandError::InvalidExpire("set".to_string())),
                    };
                    expiry = Some(SetExpiry::At(at));
                }
                _ => return Err(CommandError::Syntax),
            }
        }

        if self.condition_holds(key, condition) {
            self.admit(&[(key, value.len())])?;
        }
        let outcome = self.storage.set_with_options(
            key.clone(),
            value.clone(),
            expiry.unwrap_or(SetExpiry::Clear),
            condition,
        );

        Ok(if return_previous {
            bulk_or_null(outcome.previous)
        } else if outcome.applied {
            RespValue::ok()
        } else {
            RespValue::null()
        })
    }

    /// GET key
    fn cmd_get(&self, args: &[Bytes]) -> CommandResult {
        arity("get", args, 1..=1)?;
        Ok(bulk_or_null(self.storage.get(&args[0]).map(|e| e.value)))
    }

    /// GETSET key value
    fn cmd_getset(&self, args: &[Bytes]) -> CommandResult {
        arity("getset", args, 2..=2)?;
        self.admit(&[(&args[0], args[1].len())])?;
        let outcome = self.storage.set_with_options(
            args[0].clone(),
            args[1].clone(),
            SetExpiry::Clear,
            SetCondition::Always,
        );
        Ok(bulk_or_null(outcome.previous))
    }

    /// GETDEL key
    fn cmd_getdel(&self, args: &[Bytes]) -> CommandResult {
        arity("getdel", args, 1..=1)?;
        Ok(bulk_or_null(self.storage.take(&args[0])))
    }

    /// SETNX key value
    fn cmd_setnx(&self, args: &[Bytes]) -> CommandResult {
        arity("setnx", args, 2..=2)?;
        if self.condition_holds(&args[0], SetCondition::IfAbsent) {
            self.admit(&[(&args[0], args[1].len())])?;
        }
        let outcome = self.storage.set_with_options(
            args[0].clone(),
            args[1].clone(),
            SetExpiry::Clear,
            SetCondition::IfAbsent,
        );
        Ok(RespValue::integer(outcome.applied as i64))
    }

    /// SETEX key seconds value / PSETEX key milliseconds value
    fn cmd_setex(&self, args: &[Bytes], name: &str, unit_ms: i64) -> CommandResult {
        arity(name, args, 3..=3)?;
        let amount = parse_int(&args[1])?;
        let at = match expiry_at(amount, unit_ms, false, now_ms()) {
            Some(at) if amount > 0 => at as u64,
            _ => return Err(CommandError::InvalidExpire(name.to_string())),
        };

        self.admit(&[(&args[0], args[2].len())])?;
        self.storage
            .set_with_expiry(args[0].clone(), args[2].clone(), Some(at));
        Ok(RespValue::ok())
    }

    /// MSET key value [key value ...]
    fn cmd_mset(&self, args: &[Bytes]) -> CommandResult {
        if args.is_empty() || args.len() % 2 != 0 {
            return Err(CommandError::WrongArity("mset".to_string()));
        }

        let writes: Vec<(&Bytes, usize)> = args
            .chunks_exact(2)
            .map(|pair| (&pair[0], pair[1].len()))
            .collect();
        self.admit(&writes)?;

        for pair in args.chunks_exact(2) {
            self.storage.set(pair[0].clone(), pair[1].clone());
        }
        Ok(RespValue::ok())
    }

    /// MGET key [key ...]
    fn cmd_mget(&self, args: &[Bytes]) -> CommandResult {
        arity("mget", args, 1..=usize::MAX)?;
        Ok(RespValue::array(
            args.iter()
                .map(|key| bulk_or_null(self.storage.get(key).map(|e| e.value)))
                .collect(),
        ))
    }

    /// APPEND key value
    fn cmd_append(&self, args: &[Bytes]) -> CommandResult {
        arity("append", args, 2..=2)?;
        let (key, suffix) = (&args[0], &args[1]);

        self.admit(&[(key, self.current_len(key) + suffix.len())])?;
        let len = self.storage.append(key, suffix);
        Ok(RespValue::integer(len as i64))
    }

    /// STRLEN key
    fn cmd_strlen(&self, args: &[Bytes]) -> CommandResult {
        arity("strlen", args, 1..=1)?;
        let len = self
            .storage
            .get(&args[0])
            .map(|e| e.value.len())
            .unwrap_or(0);
        Ok(RespValue::integer(len as i64))
    }

    /// INCR / DECR / INCRBY key increment
    fn cmd_incr(&self, args: &[Bytes], name: &str, fixed: Option<i64>) -> CommandResult {
        match fixed {
            Some(_) => arity(name, args, 1..=1)?,
            None => arity(name, args, 2..=2)?,
        }
        let delta = match fixed {
            Some(delta) => delta,
            None => parse_int(&args[1])?,
        };
        self.incr_by(&args[0], delta)
    }

    /// DECRBY key decrement
    fn cmd_decrby(&self, args: &[Bytes]) -> CommandResult {
        arity("decrby", args, 2..=2)?;
        let delta = parse_int(&args[1])?
            .checked_neg()
            .ok_or(StorageError::Overflow)?;
        self.incr_by(&args[0], delta)
    }

    fn incr_by(&self, key: &Bytes, delta: i64) -> CommandResult {
        let current = match self.storage.peek(key) {
            Some(entry) => parse_integer(&entry.value)?,
            None => 0,
        };
        let result = current.checked_add(delta).ok_or(StorageError::Overflow)?;
        self.admit(&[(key, result.to_string().len())])?;
        Ok(RespValue::integer(self.storage.incr_by(key, delta)?))
    }

    // ========================================================================
    // Key commands
    // ========================================================================

    /// DEL key [key ...]
    fn cmd_del(&self, args: &[Bytes]) -> CommandResult {
        arity("del", args, 1..=usize::MAX)?;
        Ok(RespValue::integer(self.storage.delete_many(args) as i64))
    }

    /// EXISTS key [key ...]
    fn cmd_exists(&self, args: &[Bytes]) -> CommandResult {
        arity("exists", args, 1..=usize::MAX)?;
        Ok(RespValue::integer(self.storage.exists_many(args) as i64))
    }

    /// EXPIRE / PEXPIRE / EXPIREAT / PEXPIREAT key amount
    ///
    /// An expiry already in the past deletes the key.
    fn cmd_expire(&self, args: &[Bytes], name: &str, unit_ms: i64, absolute: bool) -> CommandResult {
        arity(name, args, 2..=2)?;
        let key = &args[0];
        let amount = parse_int(&args[1])?;

        let now = now_ms();
        let at = expiry_at(amount, unit_ms, absolute, now)
            .ok_or_else(|| CommandError::InvalidExpire(name.to_string()))?;

        let applied = if at <= now as i64 {
            self.storage.delete(key)
        } else {
            self.storage.set_expiry(key, Some(at as u64))
        };
        Ok(RespValue::integer(applied as i64))
    }

    /// TTL / PTTL key
    fn cmd_ttl(&self, args: &[Bytes], name: &str, millis: bool) -> CommandResult {
        arity(name, args, 1..=1)?;
        let ttl = if millis {
            self.storage.pttl(&args[0])
        } else {
            self.storage.ttl(&args[0])
        };
        Ok(RespValue::integer(ttl.unwrap_or(-2)))
    }

    /// PERSIST key
    fn cmd_persist(&self, args: &[Bytes]) -> CommandResult {
        arity("persist", args, 1..=1)?;
        Ok(RespValue::integer(self.storage.persist(&args[0]) as i64))
    }

    /// KEYS pattern
    fn cmd_keys(&self, args: &[Bytes]) -> CommandResult {
        arity("keys", args, 1..=1)?;
        let pattern = String::from_utf8_lossy(&args[0]);
        Ok(RespValue::array(
            self.storage
                .keys(&pattern)
                .into_iter()
                .map(RespValue::bulk_string)
                .collect(),
        ))
    }

    /// TYPE key
    fn cmd_type(&self, args: &[Bytes]) -> CommandResult {
        arity("type", args, 1..=1)?;
        Ok(RespValue::simple_string(if self.storage.exists(&args[0]) {
            "string"
        } else {
            "none"
        }))
    }

    // ========================================================================
    // Server commands
    // ========================================================================

    /// PING [message]
    fn cmd_ping(&self, args: &[Bytes]) -> CommandResult {
        arity("ping", args, 0..=1)?;
        Ok(match args.first() {
            Some(message) => RespValue::bulk_string(message.clone()),
            None => RespValue::pong(),
        })
    }

    /// ECHO message
    fn cmd_echo(&self, args: &[Bytes]) -> CommandResult {
        arity("echo", args, 1..=1)?;
        Ok(RespValue::bulk_string(args[0].clone()))
    }

    /// DBSIZE
    fn cmd_dbsize(&self, args: &[Bytes]) -> CommandResult {
        arity("dbsize", args, 0..=0)?;
        Ok(RespValue::integer(self.storage.len() as i64))
    }

    /// FLUSHDB / FLUSHALL [ASYNC | SYNC]
    fn cmd_flush(&self, args: &[Bytes], name: &str) -> CommandResult {
        arity(&name.to_lowercase(), args, 0..=1)?;
        if let Some(mode) = args.first() {
            if !matches!(upper(mode).as_str(), "ASYNC" | "SYNC") {
                return Err(CommandError::Syntax);
            }
        }
        self.storage.flush();
        debug!("Keyspace flushed");
        Ok(RespValue::ok())
    }

    /// INFO [section]
    fn cmd_info(&self, args: &[Bytes]) -> CommandResult {
        arity("info", args, 0..=1)?;
        let section = args
            .first()
            .map(|s| String::from_utf8_lossy(s).to_lowercase())
            .unwrap_or_else(|| "all".to_string());

        let sections: &[&str] = match section.as_str() {
            "all" | "default" | "everything" => &["server", "clients", "memory", "stats", "keyspace"],
            "server" => &["server"],
            "clients" => &["clients"],
            "memory" => &["memory"],
            "stats" => &["stats"],
            "keyspace" => &["keyspace"],
            _ => &[],
        };

        let info = sections
            .iter()
            .map(|name| self.info_section(name))
            .collect::<Vec<_>>()
            .join("\r\n");
        Ok(RespValue::bulk_string(Bytes::from(info)))
    }

    fn info_section(&self, name: &str) -> String {
        let stats = self.storage.stats();
        let uptime = self.start_time.elapsed().as_secs();

        let fields: Vec<(&str, String)> = match name {
            "server" => vec![
                ("cinderkv_version", crate::VERSION.to_string()),
                ("os", std::env::consts::OS.to_string()),
                ("arch_bits", (usize::BITS).to_string()),
                ("process_id", std::process::id().to_string()),
                ("uptime_in_seconds", uptime.to_string()),
                ("uptime_in_days", (uptime / 86_400).to_string()),
            ],
            "clients" => vec![(
                "connected_clients",
                self.stats.active_connections.load(Ordering::Relaxed).to_string(),
            )],
            "memory" => {
                let max_memory = self.evictor.max_memory();
                vec![
                    ("used_memory", stats.used_memory.to_string()),
                    ("used_memory_human", human_bytes(stats.used_memory)),
                    ("maxmemory", max_memory.to_string()),
                    ("maxmemory_human", human_bytes(max_memory)),
                    ("maxmemory_policy", self.evictor.policy().to_string()),
                    ("maxmemory_samples", self.evictor.samples().to_string()),
                    (
                        "memory_model_version",
                        self.storage.memory_model().version.to_string(),
                    ),
                ]
            }
            "stats" => vec![
                (
                    "total_connections_received",
                    self.stats.connections_accepted.load(Ordering::Relaxed).to_string(),
                ),
                (
                    "total_commands_processed",
                    self.stats.commands_processed.load(Ordering::Relaxed).to_string(),
                ),
                (
                    "total_net_input_bytes",
                    self.stats.bytes_read.load(Ordering::Relaxed).to_string(),
                ),
                (
                    "total_net_output_bytes",
                    self.stats.bytes_written.load(Ordering::Relaxed).to_string(),
                ),
                ("keyspace_hits", stats.keyspace_hits.to_string()),
                ("keyspace_misses", stats.keyspace_misses.to_string()),
                ("expired_keys", stats.expired_keys.to_string()),
                ("evicted_keys", stats.evicted_keys.to_string()),
            ],
            "keyspace" if stats.keys > 0 => vec![(
                "db0",
                format!("keys={},expires={}", stats.keys, stats.volatile_keys),
            )],
            _ => Vec::new(),
        };

        let mut title = name.to_string();
        title[..1].make_ascii_uppercase();

        let mut out = format!("# {}\r\n", title);
        for (key, value) in fields {
            out.push_str(&format!("{}:{}\r\n", key, value));
        }
        out
    }

    /// CONFIG GET pattern / CONFIG SET parameter value
    fn cmd_config(&self, args: &[Bytes]) -> CommandResult {
        arity("config", args, 1..=usize::MAX)?;

        match upper(&args[0]).as_str() {
            "GET" => {
                arity("config|get", &args[1..], 1..=1)?;
                let pattern = args[1].to_ascii_lowercase();
                let mut reply = Vec::new();
                for param in CONFIG_PARAMS {
                    if glob_match(&pattern, param.as_bytes()) {
                        reply.push(RespValue::bulk_string(Bytes::from_static(param.as_bytes())));
                        reply.push(RespValue::bulk_string(Bytes::from(self.config_value(param))));
                    }
                }
                Ok(RespValue::array(reply))
            }
            "SET" => {
                arity("config|set", &args[1..], 2..=2)?;
                let param = String::from_utf8_lossy(&args[1]).to_lowercase();
                let value = String::from_utf8_lossy(&args[2]);
                self.config_set(&param, &value)?;
                Ok(RespValue::ok())
            }
            other => Err(CommandError::Other(format!(
                "unknown subcommand '{}'",
                other.to_lowercase()
            ))),
        }
    }

    fn config_value(&self, param: &str) -> String {
        match param {
            "maxmemory" => self.evictor.max_memory().to_string(),
            "maxmemory-policy" => self.evictor.policy().to_string(),
            _ => self.evictor.samples().to_string(),
        }
    }

    fn config_set(&self, param: &str, value: &str) -> Result<(), CommandError> {
        let invalid = || {
            CommandError::Other(format!(
                "Invalid argument '{}' for CONFIG SET '{}'",
                value, param
            ))
        };

        match param {
            "maxmemory" => {
                let bytes = parse_memory(value).ok_or_else(invalid)?;
                self.evictor.set_max_memory(bytes);
                // A lower ceiling applies now, not on the next write
                if let Err(e) = self.evictor.enforce() {
                    warn!(error = %e, "Could not get under the new maxmemory");
                }
            }
            "maxmemory-policy" => {
                let policy: EvictionPolicy = value.parse().map_err(|_| invalid())?;
                self.evictor.set_policy(policy);
            }
            "maxmemory-samples" => match value.parse::<usize>() {
                Ok(n) if n > 0 => self.evictor.set_samples(n),
                _ => return Err(invalid()),
            },
            _ => {
                return Err(CommandError::Other(format!(
                    "Unknown option or number of arguments for CONFIG SET - '{}'",
                    param
                )))
            }
        }

        debug!(param, value, "Configuration changed");
        Ok(())
    }

    /// COMMAND [COUNT]
    fn cmd_command(&self, args: &[Bytes]) -> CommandResult {
        match args.first().map(|s| upper(s)) {
            None => Ok(RespValue::array(
                COMMANDS
                    .iter()
                    .map(|c| RespValue::bulk_string(Bytes::from_static(c.as_bytes())))
                    .collect(),
            )),
            Some(sub) if sub == "COUNT" => Ok(RespValue::integer(COMMANDS.len() as i64)),
            // DOCS, INFO and the rest: nothing to describe
            Some(_) => Ok(RespValue::array(Vec::new())),
        }
    }

    /// TIME
    fn cmd_time(&self, args: &[Bytes]) -> CommandResult {
        arity("time", args, 0..=0)?;
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or(Duration::ZERO);

        Ok(RespValue::array(vec![
            RespValue::bulk_string(Bytes::from(now.as_secs().to_string())),
            RespValue::bulk_string(Bytes::from(now.subsec_micros().to_string())),
        ]))
    }
}
