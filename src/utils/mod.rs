//! Utility modules

pub mod error;
pub mod resp;

pub use error::{
    CacheError, ConfigError, ConnectionError, PoolError, Result, SerializationError, ShardFailure,
};
pub use resp::{RespDecoder, RespEncoder, RespValue};
