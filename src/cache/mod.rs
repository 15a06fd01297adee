//! Grouped cache over the pooled backend
//!
//! `CachePool` is the composition root: built once from configuration, it
//! owns the pools and the shard routing. `CacheManager` is the per-use-site
//! handle: it borrows its connections eagerly on `acquire` and returns them
//! when closed or dropped.

pub mod codec;

use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::warn;

use crate::client::{BackendFactory, Connection, ConnectionFactory};
use crate::cluster::{Endpoint, HashRing, Topology};
use crate::config::CacheConfig;
use crate::pool::{ConnectionPool, PoolConfig, PooledConnection};
use crate::utils::{CacheError, ConfigError, ConnectionError, Result, ShardFailure};

/// Delimiter between group and key in the stored namespaced key
///
/// Reserved: callers must not embed it in group or key values, otherwise
/// group-flush pattern matching becomes ambiguous.
pub const GROUP_SEPARATOR: &str = "::";

/// Build the backend lookup key `group + "::" + key`
pub fn namespaced_key(group: &str, key: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(group.len() + GROUP_SEPARATOR.len() + key.len());
    out.extend_from_slice(group.as_bytes());
    out.extend_from_slice(GROUP_SEPARATOR.as_bytes());
    out.extend_from_slice(key.as_bytes());
    out
}

/// Glob pattern matching every key of a group
pub fn group_pattern(group: &str) -> Vec<u8> {
    let mut out = namespaced_key(group, "");
    out.push(b'*');
    out
}

/// A bulk-invalidation request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FlushEvent {
    /// Clear the whole database on every shard. Unscoped and destructive:
    /// entries of other applications sharing the backend go with it.
    All,
    /// Best-effort removal of every key in one group
    Group(String),
}

struct Shard<F: ConnectionFactory> {
    endpoint: Endpoint,
    pool: ConnectionPool<F>,
}

enum PoolMode<F: ConnectionFactory> {
    Single(Shard<F>),
    Sharded(Vec<Shard<F>>, Arc<HashRing>),
    /// Unpooled fallback: a fresh connection per manager
    Direct(Endpoint, F),
}

/// Topology-aware pool handle, the entry point of the crate
pub struct CachePool<F: ConnectionFactory> {
    mode: PoolMode<F>,
}

impl CachePool<BackendFactory> {
    /// Build from parsed configuration
    ///
    /// Missing or malformed endpoint configuration is never fatal: it logs
    /// a warning and falls back to an unpooled connection to the default
    /// endpoint (`127.0.0.1:6379`).
    pub fn from_config(config: &CacheConfig) -> Self {
        match Topology::from_config(config.host.as_deref(), config.shard_host.as_deref()) {
            Ok(Topology::Sharded(endpoints)) => {
                let shards = endpoints
                    .into_iter()
                    .map(|endpoint| {
                        let factory = BackendFactory::new(endpoint.clone(), config.timeout);
                        (endpoint, factory)
                    })
                    .collect();
                Self::sharded(shards, config.pool.clone())
            }
            Ok(Topology::Single(endpoint)) => {
                let factory = BackendFactory::new(endpoint.clone(), config.timeout);
                Self::single(endpoint, factory, config.pool.clone())
            }
            Err(e) => {
                let endpoint = Endpoint::default_local();
                warn!("{}; falling back to unpooled connection to {}", e, endpoint);
                let factory = BackendFactory::new(endpoint.clone(), config.timeout);
                Self::direct(endpoint, factory)
            }
        }
    }

    /// Build from a configuration file
    ///
    /// An unreadable or unparseable file gets the same fallback treatment
    /// as a missing endpoint.
    pub fn from_config_file(path: &std::path::Path) -> Self {
        match CacheConfig::from_file(path) {
            Ok(config) => Self::from_config(&config),
            Err(e) => {
                warn!("failed to load cache configuration: {}", e);
                Self::from_config(&CacheConfig::default())
            }
        }
    }
}

impl<F: ConnectionFactory> CachePool<F> {
    /// Pool over a single backend node
    pub fn single(endpoint: Endpoint, factory: F, pool_config: PoolConfig) -> Self {
        Self {
            mode: PoolMode::Single(Shard {
                endpoint,
                pool: ConnectionPool::new(factory, pool_config),
            }),
        }
    }

    /// Pool over an ordered list of shards, one connection pool each
    pub fn sharded(shards: Vec<(Endpoint, F)>, pool_config: PoolConfig) -> Self {
        let endpoints: Vec<Endpoint> = shards.iter().map(|(e, _)| e.clone()).collect();
        let ring = Arc::new(HashRing::build(&endpoints));
        let shards = shards
            .into_iter()
            .map(|(endpoint, factory)| Shard {
                endpoint,
                pool: ConnectionPool::new(factory, pool_config.clone()),
            })
            .collect();

        Self {
            mode: PoolMode::Sharded(shards, ring),
        }
    }

    /// Unpooled: every acquire opens a fresh connection
    pub fn direct(endpoint: Endpoint, factory: F) -> Self {
        Self {
            mode: PoolMode::Direct(endpoint, factory),
        }
    }

    pub fn is_sharded(&self) -> bool {
        matches!(self.mode, PoolMode::Sharded(..))
    }

    /// Acquire a cache manager, borrowing its connections eagerly
    ///
    /// Sharded mode borrows one connection per shard so that flush fan-out
    /// and routing need no further pool traffic.
    pub fn acquire(&self) -> Result<CacheManager<F>> {
        let handle = match &self.mode {
            PoolMode::Single(shard) => Handle::Single(shard.endpoint.clone(), shard.pool.borrow()?),
            PoolMode::Direct(endpoint, factory) => {
                Handle::Direct(endpoint.clone(), factory.create()?)
            }
            PoolMode::Sharded(shards, ring) => {
                // routing indexes into the shard list; an empty one can
                // only come from a hand-built pool, never from_config
                if shards.is_empty() {
                    return Err(ConfigError::MissingEndpoint.into());
                }
                let mut conns = Vec::with_capacity(shards.len());
                for shard in shards {
                    conns.push((shard.endpoint.clone(), shard.pool.borrow()?));
                }
                Handle::Sharded(conns, Arc::clone(ring))
            }
        };

        Ok(CacheManager {
            handle: Some(handle),
        })
    }
}

enum Handle<F: ConnectionFactory> {
    Single(Endpoint, PooledConnection<F>),
    Direct(Endpoint, F::Conn),
    Sharded(Vec<(Endpoint, PooledConnection<F>)>, Arc<HashRing>),
}

impl<F: ConnectionFactory> Handle<F> {
    /// Route a namespaced key to the connection owning it
    fn route(&mut self, nskey: &[u8]) -> &mut F::Conn {
        match self {
            Handle::Single(_, conn) => &mut *conn,
            Handle::Direct(_, conn) => conn,
            Handle::Sharded(conns, ring) => {
                // the ring is built over the same non-empty shard list
                let idx = ring.locate(nskey).unwrap_or(0);
                &mut *conns[idx].1
            }
        }
    }
}

/// Per-use-site cache handle
///
/// Owns exactly one live connection handle for its lifetime: a single
/// pooled connection, an unpooled one, or one connection per shard.
/// Connections go back to their pools on `close` or drop; operations after
/// `close` fail with `CacheError::Closed`.
pub struct CacheManager<F: ConnectionFactory> {
    handle: Option<Handle<F>>,
}

impl<F: ConnectionFactory> CacheManager<F> {
    fn handle_mut(&mut self) -> Result<&mut Handle<F>> {
        self.handle.as_mut().ok_or(CacheError::Closed)
    }

    /// Look up a value; `Ok(None)` when no entry exists
    ///
    /// Stored bytes that cannot be deserialized are an error, not a miss.
    pub fn get<T: DeserializeOwned>(&mut self, group: &str, key: &str) -> Result<Option<T>> {
        let nskey = namespaced_key(group, key);
        match self.handle_mut()?.route(&nskey).get(&nskey)? {
            Some(bytes) => Ok(Some(codec::unserialize(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Store a value, overwriting any existing entry. No TTL is set.
    pub fn put<T: Serialize>(&mut self, group: &str, key: &str, value: &T) -> Result<()> {
        let bytes = codec::serialize(value)?;
        let nskey = namespaced_key(group, key);
        self.handle_mut()?.route(&nskey).set(&nskey, &bytes)?;
        Ok(())
    }

    /// Remove a single entry; an absent key is a no-op
    pub fn delete(&mut self, group: &str, key: &str) -> Result<()> {
        let nskey = namespaced_key(group, key);
        self.handle_mut()?
            .route(&nskey)
            .del(std::slice::from_ref(&nskey))?;
        Ok(())
    }

    /// Apply a bulk invalidation, fanning out over every shard
    ///
    /// Every shard is attempted even when one fails; per-shard failures are
    /// collected and reported together as `CacheError::FlushFailed`.
    ///
    /// Group flush is a two-step list-then-delete: keys created between the
    /// two steps, or on other shards mid-fanout, may survive. Best-effort
    /// by design.
    pub fn flush(&mut self, event: FlushEvent) -> Result<()> {
        let handle = self.handle_mut()?;
        let mut failures = Vec::new();

        match handle {
            Handle::Single(endpoint, conn) => {
                apply_flush(&event, &mut **conn, endpoint, &mut failures)
            }
            Handle::Direct(endpoint, conn) => apply_flush(&event, conn, endpoint, &mut failures),
            Handle::Sharded(conns, _) => {
                for (endpoint, conn) in conns.iter_mut() {
                    apply_flush(&event, &mut **conn, endpoint, &mut failures);
                }
            }
        }

        if failures.is_empty() {
            Ok(())
        } else {
            Err(CacheError::FlushFailed { failures })
        }
    }

    /// Return all connections to their pools
    ///
    /// Dropping the manager does the same; `close` exists so the release
    /// point is explicit and later operations fail loudly.
    pub fn close(&mut self) {
        self.handle = None;
    }

    pub fn is_closed(&self) -> bool {
        self.handle.is_none()
    }
}

fn apply_flush<C: Connection>(
    event: &FlushEvent,
    conn: &mut C,
    endpoint: &Endpoint,
    failures: &mut Vec<ShardFailure>,
) {
    let result = match event {
        FlushEvent::All => conn.flush_db(),
        FlushEvent::Group(group) => flush_group(conn, group),
    };

    if let Err(e) = result {
        failures.push(ShardFailure {
            shard: endpoint.to_string(),
            error: e.to_string(),
        });
    }
}

/// List the group's keys, then delete them in one batch. Not atomic.
fn flush_group<C: Connection>(conn: &mut C, group: &str) -> std::result::Result<(), ConnectionError> {
    let matched = conn.keys(&group_pattern(group))?;
    if matched.is_empty() {
        return Ok(());
    }
    conn.del(&matched)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::collections::HashMap;

    use parking_lot::Mutex;

    use crate::utils::{PoolError, SerializationError};

    /// One in-memory "node", shared by every connection opened against it
    #[derive(Clone, Default)]
    struct MemoryStore {
        entries: Arc<Mutex<HashMap<Vec<u8>, Vec<u8>>>>,
    }

    impl MemoryStore {
        fn len(&self) -> usize {
            self.entries.lock().len()
        }

        fn insert_raw(&self, key: Vec<u8>, value: Vec<u8>) {
            self.entries.lock().insert(key, value);
        }
    }

    struct MemoryConnection {
        store: MemoryStore,
        fail_flush: bool,
    }

    impl Connection for MemoryConnection {
        fn get(&mut self, key: &[u8]) -> std::result::Result<Option<Vec<u8>>, ConnectionError> {
            Ok(self.store.entries.lock().get(key).cloned())
        }

        fn set(&mut self, key: &[u8], value: &[u8]) -> std::result::Result<(), ConnectionError> {
            self.store.insert_raw(key.to_vec(), value.to_vec());
            Ok(())
        }

        fn del(&mut self, keys: &[Vec<u8>]) -> std::result::Result<i64, ConnectionError> {
            let mut entries = self.store.entries.lock();
            let mut removed = 0;
            for key in keys {
                if entries.remove(key).is_some() {
                    removed += 1;
                }
            }
            Ok(removed)
        }

        fn keys(&mut self, pattern: &[u8]) -> std::result::Result<Vec<Vec<u8>>, ConnectionError> {
            let prefix = pattern.strip_suffix(b"*").unwrap_or(pattern);
            Ok(self
                .store
                .entries
                .lock()
                .keys()
                .filter(|k| k.starts_with(prefix))
                .cloned()
                .collect())
        }

        fn flush_db(&mut self) -> std::result::Result<(), ConnectionError> {
            if self.fail_flush {
                return Err(ConnectionError::Command("simulated failure".to_string()));
            }
            self.store.entries.lock().clear();
            Ok(())
        }

        fn ping(&mut self) -> bool {
            true
        }
    }

    #[derive(Clone, Default)]
    struct MemoryFactory {
        store: MemoryStore,
        fail_flush: bool,
    }

    impl ConnectionFactory for MemoryFactory {
        type Conn = MemoryConnection;

        fn create(&self) -> std::result::Result<MemoryConnection, ConnectionError> {
            Ok(MemoryConnection {
                store: self.store.clone(),
                fail_flush: self.fail_flush,
            })
        }
    }

    fn single_pool() -> (CachePool<MemoryFactory>, MemoryStore) {
        let factory = MemoryFactory::default();
        let store = factory.store.clone();
        let pool = CachePool::single(Endpoint::new("node-a", 1), factory, PoolConfig::default());
        (pool, store)
    }

    fn two_shard_pool() -> (CachePool<MemoryFactory>, MemoryStore, MemoryStore) {
        let factory_a = MemoryFactory::default();
        let factory_b = MemoryFactory::default();
        let (store_a, store_b) = (factory_a.store.clone(), factory_b.store.clone());
        let pool = CachePool::sharded(
            vec![
                (Endpoint::new("node-a", 1), factory_a),
                (Endpoint::new("node-b", 2), factory_b),
            ],
            PoolConfig::default(),
        );
        (pool, store_a, store_b)
    }

    #[test]
    fn test_namespaced_key_layout() {
        assert_eq!(namespaced_key("users", "1"), b"users::1".to_vec());
        assert_eq!(group_pattern("users"), b"users::*".to_vec());
    }

    #[test]
    fn test_put_then_get_roundtrip() {
        let (pool, _) = single_pool();
        let mut cache = pool.acquire().unwrap();

        cache.put("users", "1", &"alice".to_string()).unwrap();
        let value: Option<String> = cache.get("users", "1").unwrap();
        assert_eq!(value, Some("alice".to_string()));
    }

    #[test]
    fn test_get_absent_returns_none() {
        let (pool, _) = single_pool();
        let mut cache = pool.acquire().unwrap();

        let value: Option<String> = cache.get("users", "missing").unwrap();
        assert_eq!(value, None);
    }

    #[test]
    fn test_put_overwrites() {
        let (pool, _) = single_pool();
        let mut cache = pool.acquire().unwrap();

        cache.put("users", "1", &"alice".to_string()).unwrap();
        cache.put("users", "1", &"bob".to_string()).unwrap();
        let value: Option<String> = cache.get("users", "1").unwrap();
        assert_eq!(value, Some("bob".to_string()));
    }

    #[test]
    fn test_delete_absent_is_noop() {
        let (pool, _) = single_pool();
        let mut cache = pool.acquire().unwrap();

        cache.delete("users", "missing").unwrap();
    }

    #[test]
    fn test_delete_removes_entry() {
        let (pool, _) = single_pool();
        let mut cache = pool.acquire().unwrap();

        cache.put("users", "1", &1u32).unwrap();
        cache.delete("users", "1").unwrap();
        let value: Option<u32> = cache.get("users", "1").unwrap();
        assert_eq!(value, None);
    }

    #[test]
    fn test_group_flush_spares_other_groups() {
        let (pool, _) = single_pool();
        let mut cache = pool.acquire().unwrap();

        cache.put("users", "1", &"alice".to_string()).unwrap();
        cache.put("users", "2", &"bob".to_string()).unwrap();
        cache.put("sessions", "1", &"s-1".to_string()).unwrap();

        cache.flush(FlushEvent::Group("users".to_string())).unwrap();

        assert_eq!(cache.get::<String>("users", "1").unwrap(), None);
        assert_eq!(cache.get::<String>("users", "2").unwrap(), None);
        assert_eq!(
            cache.get::<String>("sessions", "1").unwrap(),
            Some("s-1".to_string())
        );
    }

    #[test]
    fn test_group_flush_of_empty_group_is_noop() {
        let (pool, store) = single_pool();
        let mut cache = pool.acquire().unwrap();

        cache.put("users", "1", &1u32).unwrap();
        cache
            .flush(FlushEvent::Group("nonexistent".to_string()))
            .unwrap();
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_flush_all_clears_every_group() {
        let (pool, store) = single_pool();
        let mut cache = pool.acquire().unwrap();

        cache.put("users", "1", &1u32).unwrap();
        cache.put("sessions", "1", &2u32).unwrap();

        cache.flush(FlushEvent::All).unwrap();
        assert_eq!(store.len(), 0);
    }

    #[test]
    fn test_serialization_error_is_not_a_miss() {
        let (pool, store) = single_pool();
        let mut cache = pool.acquire().unwrap();

        // foreign-format bytes under a cache key
        store.insert_raw(namespaced_key("users", "1"), b"{corrupt".to_vec());

        let result: Result<Option<String>> = cache.get("users", "1");
        assert!(matches!(
            result,
            Err(CacheError::Serialization(SerializationError::Decode(_)))
        ));
    }

    #[test]
    fn test_operations_after_close_fail() {
        let (pool, _) = single_pool();
        let mut cache = pool.acquire().unwrap();

        cache.put("users", "1", &1u32).unwrap();
        cache.close();
        assert!(cache.is_closed());

        assert!(matches!(
            cache.get::<u32>("users", "1"),
            Err(CacheError::Closed)
        ));
        assert!(matches!(
            cache.put("users", "2", &2u32),
            Err(CacheError::Closed)
        ));
        assert!(matches!(
            cache.flush(FlushEvent::All),
            Err(CacheError::Closed)
        ));
    }

    #[test]
    fn test_close_returns_connection_to_pool() {
        let factory = MemoryFactory::default();
        let config = PoolConfig {
            max_total: 1,
            block_when_exhausted: false,
            ..PoolConfig::default()
        };
        let pool = CachePool::single(Endpoint::new("node-a", 1), factory, config);

        let mut first = pool.acquire().unwrap();
        assert!(matches!(
            pool.acquire(),
            Err(CacheError::Pool(PoolError::Exhausted))
        ));

        first.close();
        assert!(pool.acquire().is_ok());
    }

    #[test]
    fn test_acquire_on_empty_shard_list_fails() {
        let pool: CachePool<MemoryFactory> = CachePool::sharded(Vec::new(), PoolConfig::default());
        assert!(matches!(
            pool.acquire(),
            Err(CacheError::Config(ConfigError::MissingEndpoint))
        ));
    }

    #[test]
    fn test_sharded_roundtrip_and_routing() {
        let (pool, store_a, store_b) = two_shard_pool();
        let mut cache = pool.acquire().unwrap();
        assert!(pool.is_sharded());

        for i in 0..20 {
            let key = i.to_string();
            cache.put("users", &key, &i).unwrap();
        }
        for i in 0..20 {
            let key = i.to_string();
            assert_eq!(cache.get::<i32>("users", &key).unwrap(), Some(i));
        }

        // keys actually spread over both nodes
        assert!(store_a.len() > 0);
        assert!(store_b.len() > 0);
        assert_eq!(store_a.len() + store_b.len(), 20);
    }

    #[test]
    fn test_sharded_group_flush_scenario() {
        let (pool, store_a, store_b) = two_shard_pool();
        let mut cache = pool.acquire().unwrap();

        cache.put("users", "1", &"x".to_string()).unwrap();
        cache.put("users", "2", &"y".to_string()).unwrap();
        cache.put("sessions", "1", &"keep".to_string()).unwrap();

        assert_eq!(
            cache.get::<String>("users", "1").unwrap(),
            Some("x".to_string())
        );
        assert_eq!(
            cache.get::<String>("users", "2").unwrap(),
            Some("y".to_string())
        );

        cache.flush(FlushEvent::Group("users".to_string())).unwrap();

        assert_eq!(cache.get::<String>("users", "1").unwrap(), None);
        assert_eq!(cache.get::<String>("users", "2").unwrap(), None);
        assert_eq!(
            cache.get::<String>("sessions", "1").unwrap(),
            Some("keep".to_string())
        );
        assert_eq!(store_a.len() + store_b.len(), 1);
    }

    #[test]
    fn test_flush_all_fans_out_to_all_shards() {
        let (pool, store_a, store_b) = two_shard_pool();
        let mut cache = pool.acquire().unwrap();

        for i in 0..20 {
            cache.put("users", &i.to_string(), &i).unwrap();
        }
        cache.flush(FlushEvent::All).unwrap();
        assert_eq!(store_a.len(), 0);
        assert_eq!(store_b.len(), 0);
    }

    #[test]
    fn test_partial_fanout_failure_reports_failed_shard() {
        let factory_a = MemoryFactory::default();
        let factory_b = MemoryFactory {
            fail_flush: true,
            ..MemoryFactory::default()
        };
        let store_a = factory_a.store.clone();
        let pool = CachePool::sharded(
            vec![
                (Endpoint::new("node-a", 1), factory_a),
                (Endpoint::new("node-b", 2), factory_b),
            ],
            PoolConfig::default(),
        );
        let mut cache = pool.acquire().unwrap();

        cache.put("users", "1", &1u32).unwrap();
        cache.put("users", "2", &2u32).unwrap();

        match cache.flush(FlushEvent::All) {
            Err(CacheError::FlushFailed { failures }) => {
                assert_eq!(failures.len(), 1);
                assert_eq!(failures[0].shard, "node-b:2");
                assert!(failures[0].error.contains("simulated failure"));
            }
            other => panic!("expected FlushFailed, got {:?}", other.map(|_| ())),
        }

        // the healthy shard was still flushed
        assert_eq!(store_a.len(), 0);
    }
}
