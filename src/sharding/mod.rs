//! Shard routing
//!
//! Maps a sample's routing key to the shard node that owns it. The ring is built once
//! from the configured node list and is immutable for the process lifetime.

mod ring;
mod router;

pub use ring::ConsistentHashRing;
pub use router::ShardRouter;

use crate::model::Sample;
use std::fmt;

/// Shard node identifier (the configured node address)
pub type ShardId = String;

/// Value hashed to choose a sample's destination shard.
///
/// The key is the series key: measurement followed by the sorted tag set, so every
/// sample of one series lands on the same shard.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RoutingKey(String);

impl RoutingKey {
    pub fn for_sample(sample: &Sample) -> Self {
        Self(sample.series_key())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for RoutingKey {
    fn from(key: &str) -> Self {
        Self(key.to_string())
    }
}

impl fmt::Display for RoutingKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
