//! Backend topology and shard routing

pub mod ring;
pub mod topology;

pub use ring::HashRing;
pub use topology::{Endpoint, Topology, DEFAULT_PORT};
