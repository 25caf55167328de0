//! Server Configuration
//!
//! Settings come from three layers, each overriding the last:
//!
//! 1. Built-in defaults
//! 2. A Redis-style config file (`--config <path>`)
//! 3. Command-line flags
//!
//! The config file holds one directive per line:
//!
//! ```text
//! # comments and blank lines are ignored
//! bind 0.0.0.0
//! port 6380
//! maxmemory 100mb
//! maxmemory-policy allkeys-lru
//! maxmemory-samples 10
//! hz 10
//! ```
//!
//! A bad line is logged and skipped so one typo does not keep the server
//! down. A file that cannot be read at all is an error.

use crate::storage::{
    EvictionConfig, EvictionPolicy, ExpiryConfig, UnknownPolicy, DEFAULT_HZ, DEFAULT_SAMPLES,
};
use crate::{DEFAULT_HOST, DEFAULT_PORT};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::warn;

/// Errors produced while building a [`ServerConfig`].
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config file {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("'{0}' requires a value")]
    MissingValue(String),

    #[error("invalid value '{value}' for '{name}'")]
    InvalidValue { name: String, value: String },

    #[error(transparent)]
    UnknownPolicy(#[from] UnknownPolicy),

    #[error("unknown directive '{0}'")]
    UnknownDirective(String),

    #[error("unknown argument '{0}'")]
    UnknownArgument(String),
}

/// Parses a memory amount: plain bytes, or a `kb`/`mb`/`gb` suffix
/// (1024-based, case-insensitive).
pub fn parse_memory(input: &str) -> Option<u64> {
    let lower = input.trim().to_ascii_lowercase();
    let (digits, multiplier) = [("kb", 1u64 << 10), ("mb", 1 << 20), ("gb", 1 << 30)]
        .into_iter()
        .find_map(|(suffix, unit)| lower.strip_suffix(suffix).map(|n| (n, unit)))
        .unwrap_or((lower.as_str(), 1));
    digits.parse::<u64>().ok()?.checked_mul(multiplier)
}

/// Everything the server needs to start.
#[derive(Debug, Clone, PartialEq)]
pub struct ServerConfig {
    pub bind: String,
    pub port: u16,
    /// Memory ceiling in bytes (0 = unlimited)
    pub max_memory: u64,
    pub eviction_policy: EvictionPolicy,
    pub max_memory_samples: usize,
    /// Active expiry frequency
    pub hz: u32,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            max_memory: 0,
            eviction_policy: EvictionPolicy::NoEviction,
            max_memory_samples: DEFAULT_SAMPLES,
            hz: DEFAULT_HZ,
        }
    }
}

fn invalid(name: &str, value: &str) -> ConfigError {
    ConfigError::InvalidValue {
        name: name.to_string(),
        value: value.to_string(),
    }
}

impl ServerConfig {
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }

    pub fn eviction(&self) -> EvictionConfig {
        EvictionConfig {
            max_memory: self.max_memory,
            policy: self.eviction_policy,
            samples: self.max_memory_samples,
        }
    }

    pub fn expiry(&self) -> ExpiryConfig {
        ExpiryConfig::from_hz(self.hz)
    }

    /// Applies one setting by its config-file name.
    pub fn set(&mut self, name: &str, value: &str) -> Result<(), ConfigError> {
        match name.to_ascii_lowercase().as_str() {
            "bind" => self.bind = value.to_string(),
            "port" => self.port = value.parse().map_err(|_| invalid(name, value))?,
            "maxmemory" => self.max_memory = parse_memory(value).ok_or_else(|| invalid(name, value))?,
            "maxmemory-policy" => self.eviction_policy = value.parse()?,
            "maxmemory-samples" => {
                self.max_memory_samples = match value.parse::<usize>() {
                    Ok(n) if n > 0 => n,
                    _ => return Err(invalid(name, value)),
                }
            }
            "hz" => {
                self.hz = match value.parse::<u32>() {
                    Ok(n) if n > 0 => n,
                    _ => return Err(invalid(name, value)),
                }
            }
            _ => return Err(ConfigError::UnknownDirective(name.to_string())),
        }
        Ok(())
    }

    /// Applies one config-file line. Blank lines and comments are no-ops.
    pub fn apply_line(&mut self, line: &str) -> Result<(), ConfigError> {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            return Ok(());
        }

        let mut words = line.split_whitespace();
        let Some(name) = words.next() else {
            return Ok(());
        };
        let value = words
            .next()
            .ok_or_else(|| ConfigError::MissingValue(name.to_string()))?;
        self.set(name, value)
    }

    /// Applies config-file contents, skipping bad lines.
    ///
    /// Returns the number of lines skipped.
    pub fn apply_str(&mut self, contents: &str) -> usize {
        let mut skipped = 0;
        for (number, line) in contents.lines().enumerate() {
            if let Err(e) = self.apply_line(line) {
                warn!(line = number + 1, error = %e, "Skipping config line");
                skipped += 1;
            }
        }
        skipped
    }

    /// Reads and applies a config file.
    pub fn load_file(&mut self, path: &Path) -> Result<usize, ConfigError> {
        let contents = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(self.apply_str(&contents))
    }
}

/// What the command line asked for.
#[derive(Debug, Clone, PartialEq)]
pub enum CliCommand {
    Run(ServerConfig),
    Help,
    Version,
}

/// Parses command-line arguments (without the program name).
///
/// `--config` is loaded first wherever it appears, so flags always win over
/// the file.
pub fn parse_args<I>(args: I) -> Result<CliCommand, ConfigError>
where
    I: IntoIterator<Item = String>,
{
    let args: Vec<String> = args.into_iter().collect();
    let mut flags = Vec::new();
    let mut config_path = None;

    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        let name = match arg.as_str() {
            "--help" => return Ok(CliCommand::Help),
            "--version" | "-v" => return Ok(CliCommand::Version),
            "--config" | "-c" => {
                let path = iter.next().ok_or_else(|| ConfigError::MissingValue(arg.clone()))?;
                config_path = Some(PathBuf::from(path));
                continue;
            }
            "--host" | "-h" => "bind",
            "--port" | "-p" => "port",
            "--maxmemory" => "maxmemory",
            "--maxmemory-policy" => "maxmemory-policy",
            "--maxmemory-samples" => "maxmemory-samples",
            "--hz" => "hz",
            other => return Err(ConfigError::UnknownArgument(other.to_string())),
        };
        let value = iter.next().ok_or_else(|| ConfigError::MissingValue(arg.clone()))?;
        flags.push((name, value.as_str()));
    }

    let mut config = ServerConfig::default();
    if let Some(path) = config_path {
        config.load_file(&path)?;
    }
    for (name, value) in flags {
        config.set(name, value)?;
    }
    Ok(CliCommand::Run(config))
}

pub const HELP: &str = r#"
CinderKV - An In-Memory Key-Value Server with Bounded Memory

USAGE:
    cinderkv [OPTIONS]

OPTIONS:
    -c, --config <PATH>              Redis-style config file
    -h, --host <HOST>                Host to bind to (default: 127.0.0.1)
    -p, --port <PORT>                Port to listen on (default: 6379)
        --maxmemory <BYTES>          Memory ceiling, e.g. 100mb (default: 0, unlimited)
        --maxmemory-policy <POLICY>  noeviction, allkeys-lru, allkeys-lfu,
                                     allkeys-random, volatile-lru, volatile-lfu,
                                     volatile-random, volatile-ttl
        --maxmemory-samples <N>      Keys sampled per eviction (default: 5)
        --hz <N>                     Active expiry frequency (default: 10)
    -v, --version                    Print version information
        --help                       Print this help message

Flags override values from the config file. Set RUST_LOG to change log
verbosity (default: info).
"#;
