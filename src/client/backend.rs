//! Typed backend operations
//!
//! `Connection` is the seam between the cache layer and the wire protocol.
//! The production implementation (`BackendConnection`) speaks RESP over a
//! `RawConnection`; tests substitute in-memory implementations.

use std::time::Duration;

use crate::cluster::Endpoint;
use crate::utils::{ConnectionError, RespEncoder, RespValue};

use super::raw_connection::RawConnection;

/// Operations the cache layer needs from one backend node
///
/// Implementations are exclusively owned by their borrower; no method
/// needs to be re-entrant.
pub trait Connection {
    /// Fetch the value stored under `key`, if any
    fn get(&mut self, key: &[u8]) -> Result<Option<Vec<u8>>, ConnectionError>;

    /// Store `value` under `key`, overwriting any existing entry
    fn set(&mut self, key: &[u8], value: &[u8]) -> Result<(), ConnectionError>;

    /// Delete the given keys, returning how many existed
    ///
    /// Absent keys are counted as zero, never reported as an error.
    fn del(&mut self, keys: &[Vec<u8>]) -> Result<i64, ConnectionError>;

    /// List all keys matching a glob pattern
    fn keys(&mut self, pattern: &[u8]) -> Result<Vec<Vec<u8>>, ConnectionError>;

    /// Clear the entire database on this node
    fn flush_db(&mut self) -> Result<(), ConnectionError>;

    /// Liveness probe; any failure reads as "dead"
    fn ping(&mut self) -> bool;
}

/// Opens and validates connections for the pool
pub trait ConnectionFactory: Send + Sync + 'static {
    type Conn: Connection + Send + 'static;

    /// Open a fresh connection
    fn create(&self) -> Result<Self::Conn, ConnectionError>;

    /// Probe a connection before handing it out or recycling it
    fn validate(&self, conn: &mut Self::Conn) -> bool {
        conn.ping()
    }
}

/// RESP-speaking connection to one backend node
pub struct BackendConnection {
    conn: RawConnection,
    encoder: RespEncoder,
}

impl BackendConnection {
    pub fn new(conn: RawConnection) -> Self {
        Self {
            conn,
            encoder: RespEncoder::with_capacity(256),
        }
    }

    fn execute(&mut self, args: &[&[u8]]) -> Result<RespValue, ConnectionError> {
        self.encoder.clear();
        self.encoder.encode_command(args);
        Ok(self.conn.execute(&self.encoder)?)
    }
}

impl Connection for BackendConnection {
    fn get(&mut self, key: &[u8]) -> Result<Option<Vec<u8>>, ConnectionError> {
        match self.execute(&[b"GET", key])? {
            RespValue::BulkString(data) => Ok(Some(data)),
            RespValue::Null => Ok(None),
            RespValue::Error(e) => Err(ConnectionError::Command(e)),
            other => Err(ConnectionError::UnexpectedResponse(format!(
                "GET: {:?}",
                other
            ))),
        }
    }

    fn set(&mut self, key: &[u8], value: &[u8]) -> Result<(), ConnectionError> {
        match self.execute(&[b"SET", key, value])? {
            RespValue::SimpleString(s) if s == "OK" => Ok(()),
            RespValue::Error(e) => Err(ConnectionError::Command(e)),
            other => Err(ConnectionError::UnexpectedResponse(format!(
                "SET: {:?}",
                other
            ))),
        }
    }

    fn del(&mut self, keys: &[Vec<u8>]) -> Result<i64, ConnectionError> {
        if keys.is_empty() {
            return Ok(0);
        }

        let mut args: Vec<&[u8]> = Vec::with_capacity(keys.len() + 1);
        args.push(b"DEL");
        for key in keys {
            args.push(key);
        }

        match self.execute(&args)? {
            RespValue::Integer(n) => Ok(n),
            RespValue::Error(e) => Err(ConnectionError::Command(e)),
            other => Err(ConnectionError::UnexpectedResponse(format!(
                "DEL: {:?}",
                other
            ))),
        }
    }

    fn keys(&mut self, pattern: &[u8]) -> Result<Vec<Vec<u8>>, ConnectionError> {
        match self.execute(&[b"KEYS", pattern])? {
            RespValue::Array(elements) => {
                let mut keys = Vec::with_capacity(elements.len());
                for element in elements {
                    match element {
                        RespValue::BulkString(key) => keys.push(key),
                        other => {
                            return Err(ConnectionError::UnexpectedResponse(format!(
                                "KEYS element: {:?}",
                                other
                            )))
                        }
                    }
                }
                Ok(keys)
            }
            RespValue::Null => Ok(Vec::new()),
            RespValue::Error(e) => Err(ConnectionError::Command(e)),
            other => Err(ConnectionError::UnexpectedResponse(format!(
                "KEYS: {:?}",
                other
            ))),
        }
    }

    fn flush_db(&mut self) -> Result<(), ConnectionError> {
        match self.execute(&[b"FLUSHDB"])? {
            RespValue::SimpleString(_) => Ok(()),
            RespValue::Error(e) => Err(ConnectionError::Command(e)),
            other => Err(ConnectionError::UnexpectedResponse(format!(
                "FLUSHDB: {:?}",
                other
            ))),
        }
    }

    fn ping(&mut self) -> bool {
        match self.execute(&[b"PING"]) {
            Ok(RespValue::SimpleString(s)) => s == "PONG",
            _ => false,
        }
    }
}

/// Production factory: opens `BackendConnection`s to one endpoint
#[derive(Debug, Clone)]
pub struct BackendFactory {
    endpoint: Endpoint,
    timeout: Duration,
}

impl BackendFactory {
    pub fn new(endpoint: Endpoint, timeout: Duration) -> Self {
        Self { endpoint, timeout }
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }
}

impl ConnectionFactory for BackendFactory {
    type Conn = BackendConnection;

    fn create(&self) -> Result<BackendConnection, ConnectionError> {
        let conn = RawConnection::connect(&self.endpoint, self.timeout)?;
        Ok(BackendConnection::new(conn))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Requires a running Redis/Valkey server, ignored by default

    #[test]
    #[ignore]
    fn test_set_get_del_roundtrip() {
        let factory = BackendFactory::new(Endpoint::new("127.0.0.1", 6379), Duration::from_secs(5));
        let mut conn = factory.create().expect("Failed to connect");

        conn.set(b"shardcache-test::k", b"v").unwrap();
        assert_eq!(conn.get(b"shardcache-test::k").unwrap(), Some(b"v".to_vec()));
        assert_eq!(conn.del(&[b"shardcache-test::k".to_vec()]).unwrap(), 1);
        assert_eq!(conn.get(b"shardcache-test::k").unwrap(), None);
    }
}
