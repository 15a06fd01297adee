//! Endpoint resolution
//!
//! The topology is resolved once from configuration and never mutated
//! afterward. A sharded specification (`shardHost`, comma-separated) takes
//! precedence over a single `host`.

use std::fmt;

use crate::utils::ConfigError;

/// Default backend port
pub const DEFAULT_PORT: u16 = 6379;

/// One backend node address
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
}

impl Endpoint {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// Parse a `host:port` pair
    pub fn parse(spec: &str) -> Result<Self, ConfigError> {
        let invalid = || ConfigError::InvalidEndpoint(spec.to_string());

        let (host, port) = spec.rsplit_once(':').ok_or_else(invalid)?;
        if host.is_empty() {
            return Err(invalid());
        }
        let port: u16 = port.parse().map_err(|_| invalid())?;

        Ok(Self::new(host, port))
    }

    /// The documented fallback when no endpoint is configured
    pub fn default_local() -> Self {
        Self::new("127.0.0.1", DEFAULT_PORT)
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Resolved backend topology, immutable for the process run
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Topology {
    Single(Endpoint),
    Sharded(Vec<Endpoint>),
}

impl Topology {
    /// Resolve the topology from the recognized configuration options
    ///
    /// `shard_host` wins when both are present. Neither present is
    /// `ConfigError::MissingEndpoint`; the composition root recovers by
    /// falling back to an unpooled default connection.
    pub fn from_config(
        host: Option<&str>,
        shard_host: Option<&str>,
    ) -> Result<Self, ConfigError> {
        if let Some(spec) = shard_host {
            let endpoints = spec
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(Endpoint::parse)
                .collect::<Result<Vec<_>, _>>()?;

            if endpoints.is_empty() {
                return Err(ConfigError::MissingEndpoint);
            }
            return Ok(Topology::Sharded(endpoints));
        }

        match host {
            Some(spec) => Ok(Topology::Single(Endpoint::parse(spec)?)),
            None => Err(ConfigError::MissingEndpoint),
        }
    }

    pub fn endpoints(&self) -> &[Endpoint] {
        match self {
            Topology::Single(endpoint) => std::slice::from_ref(endpoint),
            Topology::Sharded(endpoints) => endpoints,
        }
    }

    pub fn is_sharded(&self) -> bool {
        matches!(self, Topology::Sharded(_))
    }
}
