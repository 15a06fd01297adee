//! Consistent hashing over the ordered shard list
//!
//! Each shard is represented by a fixed number of virtual nodes on a
//! 64-bit ring, so the same namespaced key always lands on the same shard
//! for a fixed topology. Topology changes (and therefore rebalancing) are
//! out of scope; the ring is built once and never mutated.

use std::collections::BTreeMap;
use std::hash::Hasher;

use twox_hash::XxHash64;

use super::Endpoint;

/// Virtual nodes per shard. More vnodes even out the key distribution.
pub const DEFAULT_VNODES_PER_SHARD: usize = 160;

const RING_SEED: u64 = 0;

/// Consistent-hash ring mapping keys to shard indices
#[derive(Debug, Clone)]
pub struct HashRing {
    /// Ring position to index into the ordered shard list
    vnodes: BTreeMap<u64, usize>,
    shard_count: usize,
}

impl HashRing {
    /// Build a ring over the ordered shard endpoints
    pub fn build(endpoints: &[Endpoint]) -> Self {
        Self::with_vnodes(endpoints, DEFAULT_VNODES_PER_SHARD)
    }

    /// Build a ring with a custom vnode count
    pub fn with_vnodes(endpoints: &[Endpoint], vnodes_per_shard: usize) -> Self {
        let mut vnodes = BTreeMap::new();

        for (idx, endpoint) in endpoints.iter().enumerate() {
            for i in 0..vnodes_per_shard {
                let vnode_key = format!("{}:{}", endpoint, i);
                vnodes.insert(Self::hash(vnode_key.as_bytes()), idx);
            }
        }

        Self {
            vnodes,
            shard_count: endpoints.len(),
        }
    }

    pub fn shard_count(&self) -> usize {
        self.shard_count
    }

    /// Locate the shard owning `key`: first vnode clockwise from the
    /// key's hash, wrapping around the ring.
    pub fn locate(&self, key: &[u8]) -> Option<usize> {
        if self.vnodes.is_empty() {
            return None;
        }

        let hash = Self::hash(key);
        self.vnodes
            .range(hash..)
            .next()
            .or_else(|| self.vnodes.iter().next())
            .map(|(_, &idx)| idx)
    }

    fn hash(data: &[u8]) -> u64 {
        let mut hasher = XxHash64::with_seed(RING_SEED);
        hasher.write(data);
        hasher.finish()
    }
}
