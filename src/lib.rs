//! shardcache - grouped cache client for Redis/Valkey-protocol backends
//!
//! Values are stored under two-level keys (group + key) so that a whole
//! group can be invalidated at once. The backend is either a single node
//! or a consistent-hash sharded cluster; callers never see the difference.

pub mod cache;
pub mod client;
pub mod cluster;
pub mod config;
pub mod pool;
pub mod utils;

pub use cache::{CacheManager, CachePool, FlushEvent};
pub use client::{BackendConnection, BackendFactory, Connection, ConnectionFactory};
pub use cluster::{Endpoint, Topology};
pub use config::CacheConfig;
pub use pool::{ConnectionPool, PoolConfig, PooledConnection};
pub use utils::{CacheError, Result};
