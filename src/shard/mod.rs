//! Shard node clients
//!
//! Every cluster member is reached through a [`ShardClient`]. Clients are long-lived,
//! one per node, and shared across concurrent requests.

mod http;
mod memory;

pub use http::HttpShardClient;
pub use memory::MemoryShard;

use crate::model::{ConsistencyLevel, Precision};
use crate::query::result::QueryResponse;
use crate::Result;
use async_trait::async_trait;

/// Query sent to one shard
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WireQuery {
    /// InfluxQL text
    pub command: String,
    pub database: String,
    /// Precision of integer timestamps in the response
    pub epoch: Precision,
}

impl WireQuery {
    pub fn new(command: impl Into<String>, database: impl Into<String>, epoch: Precision) -> Self {
        Self {
            command: command.into(),
            database: database.into(),
            epoch,
        }
    }
}

/// Encoded points bound for one shard
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteBatch {
    pub database: String,
    pub precision: Precision,
    pub consistency: ConsistencyLevel,
    /// Line protocol, one point per entry, timestamps in `precision`
    pub lines: Vec<String>,
}

impl WriteBatch {
    pub fn new(database: impl Into<String>, precision: Precision, consistency: ConsistencyLevel) -> Self {
        Self {
            database: database.into(),
            precision,
            consistency,
            lines: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// Newline-separated request body
    pub fn body(&self) -> String {
        self.lines.join("\n")
    }
}

/// Wire contract of one storage node
#[async_trait]
pub trait ShardClient: Send + Sync {
    /// Configured node address; also the node's identity on the ring
    fn addr(&self) -> &str;

    /// Run a query. The response carries one result per submitted statement.
    async fn query(&self, query: &WireQuery) -> Result<QueryResponse>;

    /// Write a batch. There is no partial success: the whole batch lands or fails.
    async fn write(&self, batch: &WriteBatch) -> Result<()>;
}
