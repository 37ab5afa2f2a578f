//! Routing-key to shard resolution

use super::{ConsistentHashRing, RoutingKey, ShardId};
use crate::model::Sample;

/// Deterministic mapping from routing key to shard node.
///
/// Built once from the full node address list; there is no runtime mutation API.
/// Adding or removing nodes is a restart-time operation.
#[derive(Debug, Clone)]
pub struct ShardRouter {
    ring: ConsistentHashRing,
    nodes: Vec<ShardId>,
}

impl ShardRouter {
    /// Create a router over `nodes` (node addresses, in configuration order)
    pub fn new<S: AsRef<str>>(nodes: &[S]) -> Self {
        Self {
            ring: ConsistentHashRing::new(nodes),
            nodes: nodes.iter().map(|n| n.as_ref().to_string()).collect(),
        }
    }

    /// Locate the node owning `key`. `None` only if the ring is empty.
    pub fn locate(&self, key: &str) -> Option<&str> {
        self.ring.locate(key)
    }

    /// Locate the node owning `sample`'s series
    pub fn route(&self, sample: &Sample) -> Option<&str> {
        self.locate(RoutingKey::for_sample(sample).as_str())
    }

    /// Configured node addresses, in configuration order
    pub fn nodes(&self) -> &[ShardId] {
        &self.nodes
    }

    pub fn is_empty(&self) -> bool {
        self.ring.is_empty()
    }
}
