//! Cluster wiring
//!
//! A [`Cluster`] owns one long-lived client per shard node plus the hash ring over
//! their addresses. Membership is fixed for the process lifetime; changing it is a
//! restart.

pub mod query_router;
pub(crate) mod telemetry;
pub mod write_router;

pub use query_router::{ExecutionOptions, QueryFederator};
pub use write_router::WriteSharder;

use crate::config::{ProxyConfig, UpstreamsConfig};
use crate::shard::{HttpShardClient, ShardClient};
use crate::sharding::{RoutingKey, ShardRouter};
use crate::{Error, Result};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Shard clients keyed by address, plus the router over those addresses
pub struct Cluster {
    clients: HashMap<String, Arc<dyn ShardClient>>,
    router: ShardRouter,
}

impl Cluster {
    /// Build from explicit clients. Client order is the ring's node order.
    pub fn new(clients: Vec<Arc<dyn ShardClient>>) -> Result<Self> {
        let mut by_addr = HashMap::with_capacity(clients.len());
        let mut addrs = Vec::with_capacity(clients.len());
        for client in clients {
            let addr = client.addr().to_string();
            if by_addr.insert(addr.clone(), client).is_some() {
                return Err(Error::Config(format!("duplicate shard address '{}'", addr)));
            }
            addrs.push(addr);
        }
        Ok(Self {
            router: ShardRouter::new(&addrs),
            clients: by_addr,
        })
    }

    /// Build HTTP clients for every configured upstream
    pub fn from_config(upstreams: &UpstreamsConfig, timeout: Duration) -> Result<Self> {
        let clients = upstreams
            .addrs
            .iter()
            .map(|addr| {
                HttpShardClient::new(addr.clone(), timeout).map(|c| Arc::new(c) as Arc<dyn ShardClient>)
            })
            .collect::<Result<Vec<_>>>()?;
        info!(nodes = clients.len(), "Cluster configured");
        Self::new(clients)
    }

    pub fn router(&self) -> &ShardRouter {
        &self.router
    }

    pub fn client(&self, addr: &str) -> Option<&Arc<dyn ShardClient>> {
        self.clients.get(addr)
    }

    /// Clients in ring node order
    pub fn clients(&self) -> impl Iterator<Item = &Arc<dyn ShardClient>> {
        self.router.nodes().iter().filter_map(|addr| self.clients.get(addr))
    }

    /// Client owning `key`. `Ok(None)` when the ring is empty; an error when the ring
    /// names a node without a client, which is a configuration fault.
    pub fn locate(&self, key: &RoutingKey) -> Result<Option<&Arc<dyn ShardClient>>> {
        let Some(addr) = self.router.locate(key.as_str()) else {
            return Ok(None);
        };
        self.clients
            .get(addr)
            .map(Some)
            .ok_or_else(|| Error::Routing(format!("no client for shard '{}'", addr)))
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }
}

/// Everything the HTTP layer needs, shared behind `Arc`s
#[derive(Clone)]
pub struct Proxy {
    pub cluster: Arc<Cluster>,
    pub federator: Arc<QueryFederator>,
    pub writer: Arc<WriteSharder>,
}

impl Proxy {
    pub fn new(cluster: Arc<Cluster>, config: &ProxyConfig) -> Self {
        Self {
            federator: Arc::new(QueryFederator::new(cluster.clone(), config.query.clone())),
            writer: Arc::new(WriteSharder::new(cluster.clone(), &config.write)),
            cluster,
        }
    }

    /// HTTP clients for every configured upstream
    pub fn from_config(config: &ProxyConfig) -> Result<Self> {
        let cluster = Cluster::from_config(&config.upstreams, config.query.timeout())?;
        Ok(Self::new(Arc::new(cluster), config))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shard::MemoryShard;

    #[test]
    fn rejects_duplicate_addresses() {
        let clients: Vec<Arc<dyn ShardClient>> = vec![
            Arc::new(MemoryShard::new("a")),
            Arc::new(MemoryShard::new("a")),
        ];
        assert!(matches!(Cluster::new(clients), Err(Error::Config(_))));
    }

    #[test]
    fn locates_clients_in_node_order() {
        let clients: Vec<Arc<dyn ShardClient>> = vec![
            Arc::new(MemoryShard::new("b")),
            Arc::new(MemoryShard::new("a")),
        ];
        let cluster = Cluster::new(clients).unwrap();

        let addrs: Vec<&str> = cluster.clients().map(|c| c.addr()).collect();
        assert_eq!(addrs, vec!["b", "a"]);

        let owner = cluster.locate(&RoutingKey::from("cpu,host=a")).unwrap().unwrap();
        assert_eq!(Some(owner.addr()), cluster.router().locate("cpu,host=a"));
    }

    #[test]
    fn empty_cluster_locates_nothing() {
        let cluster = Cluster::new(Vec::new()).unwrap();
        assert!(cluster.is_empty());
        assert!(cluster.locate(&RoutingKey::from("cpu")).unwrap().is_none());
    }
}
