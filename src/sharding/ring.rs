//! Consistent hash ring

use std::collections::BTreeMap;
use xxhash_rust::xxh3::xxh3_64;

const DEFAULT_VIRTUAL_NODES: usize = 160;

/// Consistent hash ring with virtual nodes.
///
/// Positions come from xxh3, which is stable across processes and releases, so a key
/// keeps its placement between restarts as long as the node list is unchanged.
#[derive(Debug, Clone)]
pub struct ConsistentHashRing {
    /// Virtual nodes (hash -> node_id)
    ring: BTreeMap<u64, String>,
    /// Number of virtual nodes per physical node
    virtual_nodes: usize,
}

impl ConsistentHashRing {
    /// Build a ring over `nodes`
    pub fn new<S: AsRef<str>>(nodes: &[S]) -> Self {
        Self::with_virtual_nodes(nodes, DEFAULT_VIRTUAL_NODES)
    }

    pub fn with_virtual_nodes<S: AsRef<str>>(nodes: &[S], virtual_nodes: usize) -> Self {
        let mut ring = Self {
            ring: BTreeMap::new(),
            virtual_nodes: virtual_nodes.max(1),
        };
        for node in nodes {
            ring.add_node(node.as_ref());
        }
        ring
    }

    pub fn add_node(&mut self, node_id: &str) {
        for i in 0..self.virtual_nodes {
            let hash = Self::hash_key(&format!("{}-{}", node_id, i));
            // On a position collision the lexically smaller node wins, so the outcome
            // does not depend on insertion order.
            match self.ring.get(&hash) {
                Some(existing) if existing.as_str() <= node_id => {}
                _ => {
                    self.ring.insert(hash, node_id.to_string());
                }
            }
        }
    }

    pub fn remove_node(&mut self, node_id: &str) {
        self.ring.retain(|_, nid| nid != node_id);
    }

    /// Node owning `key`: the first virtual node at or after the key's hash, wrapping
    /// around to the start of the ring. `None` only when the ring is empty.
    pub fn locate(&self, key: &str) -> Option<&str> {
        let hash = Self::hash_key(key);
        self.ring
            .range(hash..)
            .next()
            .or_else(|| self.ring.iter().next())
            .map(|(_, node_id)| node_id.as_str())
    }

    /// Distinct physical nodes on the ring, sorted
    pub fn nodes(&self) -> Vec<&str> {
        let mut nodes: Vec<&str> = self.ring.values().map(String::as_str).collect();
        nodes.sort_unstable();
        nodes.dedup();
        nodes
    }

    pub fn is_empty(&self) -> bool {
        self.ring.is_empty()
    }

    fn hash_key(key: &str) -> u64 {
        xxh3_64(key.as_bytes())
    }
}
