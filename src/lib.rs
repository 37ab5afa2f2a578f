//! # fluxgate
//!
//! A sharding and query-federation proxy for InfluxDB 1.x compatible time-series nodes.
//!
//! Clients talk to fluxgate as if it were a single node. Writes are split by series and
//! forwarded to the node that owns each series on a consistent hash ring; reads fan out
//! to every node and the partial answers are merged back into one result.
//!
//! ## Architecture
//!
//! - **Sharding**: [`sharding::ShardRouter`] maps a series key to its owning node
//! - **Write path**: [`cluster::WriteSharder`] batches samples per node and dispatches
//!   them concurrently
//! - **Read path**: [`cluster::QueryFederator`] parses InfluxQL, discovers schemas via
//!   [`query::SchemaCatalog`], runs sub-queries on every node and merges, aggregates and
//!   chunks the output; [`query::ResultCoalescer`] folds the chunks back together
//! - **HTTP**: [`api`] exposes `/query`, `/write`, `/ping` and `/health`

pub mod api;
pub mod cluster;
pub mod config;
pub mod model;
pub mod query;
pub mod shard;
pub mod sharding;
pub mod telemetry;

mod error;

pub use error::{Error, Result, ShardFailure};

/// Re-exports for convenience
pub mod prelude {
    pub use crate::cluster::{Cluster, ExecutionOptions, Proxy, QueryFederator, WriteSharder};
    pub use crate::config::ProxyConfig;
    pub use crate::model::{ConsistencyLevel, FieldValue, Precision, Sample};
    pub use crate::query::{parse_query, ResultCoalescer, StatementResult};
    pub use crate::shard::{HttpShardClient, MemoryShard, ShardClient};
    pub use crate::sharding::{RoutingKey, ShardRouter};
    pub use crate::{Error, Result};
}
