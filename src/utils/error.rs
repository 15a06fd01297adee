//! Error types for shardcache

use std::fmt;
use std::io;

use thiserror::Error;

/// Result alias for cache operations
pub type Result<T> = std::result::Result<T, CacheError>;

/// Top-level cache error
#[derive(Error, Debug)]
pub enum CacheError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Connection error: {0}")]
    Connection(#[from] ConnectionError),

    #[error("Pool error: {0}")]
    Pool(#[from] PoolError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] SerializationError),

    /// Operation attempted after the manager released its connections
    #[error("Cache handle is closed")]
    Closed,

    /// One or more shards failed during a flush fan-out.
    ///
    /// Every shard is attempted before this is reported; the healthy
    /// shards have already been flushed.
    #[error("Flush failed on {} shard(s): {}", .failures.len(), format_failures(.failures))]
    FlushFailed { failures: Vec<ShardFailure> },
}

/// Configuration-related errors
///
/// Never fatal at startup: the composition root logs a warning and falls
/// back to the default endpoint.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("No 'host' or 'shardHost' configured")]
    MissingEndpoint,

    #[error("Invalid endpoint '{0}': expected host:port")]
    InvalidEndpoint(String),

    #[error("Invalid value '{value}' for '{key}'")]
    InvalidValue { key: String, value: String },

    #[error("Failed to read configuration: {0}")]
    Io(#[from] io::Error),
}

/// Connection-related errors
#[derive(Error, Debug)]
pub enum ConnectionError {
    #[error("Failed to connect to {host}:{port}: {source}")]
    ConnectFailed {
        host: String,
        port: u16,
        source: io::Error,
    },

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// The backend replied with an error (`-ERR ...`)
    #[error("Backend error: {0}")]
    Command(String),

    #[error("Unexpected response: {0}")]
    UnexpectedResponse(String),
}

/// Pool-related errors
#[derive(Error, Debug)]
pub enum PoolError {
    /// No connection available: the borrow wait timed out, or blocking is
    /// disabled and the pool is at capacity.
    #[error("Connection pool exhausted")]
    Exhausted,
}

/// Serializer boundary errors, surfaced to the caller, never treated as
/// a cache miss.
#[derive(Error, Debug)]
pub enum SerializationError {
    #[error("Failed to serialize value: {0}")]
    Encode(#[source] serde_json::Error),

    #[error("Failed to deserialize cached bytes: {0}")]
    Decode(#[source] serde_json::Error),
}

/// A single shard's failure during a flush fan-out
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShardFailure {
    /// `host:port` label of the failed shard
    pub shard: String,
    pub error: String,
}

impl fmt::Display for ShardFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.shard, self.error)
    }
}

fn format_failures(failures: &[ShardFailure]) -> String {
    failures
        .iter()
        .map(ShardFailure::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}
