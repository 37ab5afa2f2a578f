//! Write sharding
//!
//! Splits an incoming batch by series, encodes one batch per owning shard and
//! dispatches all shard batches concurrently. A failing shard never suppresses
//! delivery to the others.

use super::telemetry;
use super::Cluster;
use crate::config::WriteConfig;
use crate::model::{line_protocol, ConsistencyLevel, Precision, Sample};
use crate::shard::WriteBatch;
use crate::sharding::RoutingKey;
use crate::{Error, Result, ShardFailure};
use futures::future::join_all;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

pub struct WriteSharder {
    cluster: Arc<Cluster>,
    timeout: Duration,
}

impl WriteSharder {
    pub fn new(cluster: Arc<Cluster>, config: &WriteConfig) -> Self {
        Self {
            cluster,
            timeout: config.timeout(),
        }
    }

    /// Group `samples` into one batch per destination shard, keyed by shard address.
    ///
    /// Samples whose key resolves to no node, or that cannot be encoded, are dropped
    /// with a warning. A node on the ring without a client is a routing error.
    pub fn partition(
        &self,
        database: &str,
        consistency: ConsistencyLevel,
        precision: Precision,
        samples: &[Sample],
    ) -> Result<BTreeMap<String, WriteBatch>> {
        let mut batches: BTreeMap<String, WriteBatch> = BTreeMap::new();
        let mut unroutable = 0;
        let mut unencodable = 0;

        for sample in samples {
            let Some(client) = self.cluster.locate(&RoutingKey::for_sample(sample))? else {
                unroutable += 1;
                continue;
            };
            let line = match line_protocol::encode(sample, precision) {
                Ok(line) => line,
                Err(e) => {
                    warn!(measurement = %sample.measurement(), error = %e, "Skipping sample");
                    unencodable += 1;
                    continue;
                }
            };
            batches
                .entry(client.addr().to_string())
                .or_insert_with(|| WriteBatch::new(database, precision, consistency))
                .lines
                .push(line);
        }

        if unroutable > 0 {
            warn!(count = unroutable, "Dropping samples with no destination shard");
        }
        telemetry::record_dropped("unroutable", unroutable);
        telemetry::record_dropped("unencodable", unencodable);
        Ok(batches)
    }

    /// Shard and dispatch `samples`.
    ///
    /// Returns [`Error::PartialWrite`] listing every shard that rejected its batch;
    /// batches for the other shards are delivered regardless.
    pub async fn write(
        &self,
        database: &str,
        consistency: ConsistencyLevel,
        precision: Precision,
        samples: &[Sample],
    ) -> Result<()> {
        let batches = self.partition(database, consistency, precision, samples)?;
        debug!(
            database = %database,
            samples = samples.len(),
            shards = batches.len(),
            "Dispatching write"
        );

        let dispatches = batches.into_iter().map(|(addr, batch)| async move {
            let outcome = self.dispatch(&addr, &batch).await;
            telemetry::record_batch(&addr, if outcome.is_ok() { "ok" } else { "error" }, batch.len());
            outcome.map_err(|e| {
                warn!(shard = %addr, points = batch.len(), error = %e, "Shard write failed");
                ShardFailure {
                    shard: addr,
                    error: e.to_string(),
                }
            })
        });

        let failures: Vec<ShardFailure> = join_all(dispatches)
            .await
            .into_iter()
            .filter_map(|r| r.err())
            .collect();
        if failures.is_empty() {
            Ok(())
        } else {
            Err(Error::PartialWrite { failures })
        }
    }

    async fn dispatch(&self, addr: &str, batch: &WriteBatch) -> Result<()> {
        let client = self
            .cluster
            .client(addr)
            .ok_or_else(|| Error::Routing(format!("no client for shard '{}'", addr)))?;
        tokio::time::timeout(self.timeout, client.write(batch))
            .await
            .map_err(|_| Error::Timeout)?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shard::{MemoryShard, ShardClient};

    fn cluster() -> (Arc<Cluster>, Vec<Arc<MemoryShard>>) {
        let shards: Vec<Arc<MemoryShard>> = (0..3)
            .map(|i| Arc::new(MemoryShard::new(format!("shard-{}", i))))
            .collect();
        let clients = shards.iter().map(|s| s.clone() as Arc<dyn ShardClient>).collect();
        (Arc::new(Cluster::new(clients).unwrap()), shards)
    }

    fn samples(n: usize) -> Vec<Sample> {
        (0..n)
            .map(|i| {
                Sample::builder("cpu")
                    .tag("host", format!("host-{}", i))
                    .field("value", i as f64)
                    .timestamp(i as i64 * 1_000_000_000)
                    .build()
            })
            .collect()
    }

    #[test]
    fn partitions_by_series_owner() {
        let (cluster, _) = cluster();
        let sharder = WriteSharder::new(cluster.clone(), &WriteConfig::default());
        let input = samples(50);

        let batches = sharder
            .partition("db", ConsistencyLevel::One, Precision::Second, &input)
            .unwrap();
        assert_eq!(batches.values().map(WriteBatch::len).sum::<usize>(), 50);
        for sample in &input {
            let owner = cluster.router().route(sample).unwrap();
            let line = line_protocol::encode(sample, Precision::Second).unwrap();
            assert!(batches[owner].lines.contains(&line));
        }
        for batch in batches.values() {
            assert_eq!(batch.precision, Precision::Second);
            assert_eq!(batch.database, "db");
        }
    }

    #[test]
    fn skips_unencodable_samples() {
        let (cluster, _) = cluster();
        let sharder = WriteSharder::new(cluster, &WriteConfig::default());
        let input = vec![Sample::builder("cpu").tag("host", "a").timestamp(1).build()];

        let batches = sharder
            .partition("db", ConsistencyLevel::One, Precision::Nanosecond, &input)
            .unwrap();
        assert!(batches.is_empty());
    }

    #[test]
    fn empty_cluster_drops_everything() {
        let sharder = WriteSharder::new(Arc::new(Cluster::new(Vec::new()).unwrap()), &WriteConfig::default());
        let batches = sharder
            .partition("db", ConsistencyLevel::One, Precision::Nanosecond, &samples(3))
            .unwrap();
        assert!(batches.is_empty());
    }

    #[tokio::test]
    async fn failing_shard_does_not_block_others() {
        let (cluster, shards) = cluster();
        let sharder = WriteSharder::new(cluster, &WriteConfig::default());
        shards[1].fail_writes(true);

        let input = samples(60);
        let err = sharder
            .write("db", ConsistencyLevel::One, Precision::Nanosecond, &input)
            .await
            .unwrap_err();

        assert_eq!(err.failed_shards(), vec!["shard-1"]);
        let delivered: usize = shards.iter().map(|s| s.samples("db").len()).sum();
        assert!(delivered > 0);
        assert_eq!(delivered + input_on(&shards[1], &input), 60);
        for shard in &shards {
            assert_eq!(shard.call_count("write"), 1);
        }
    }

    fn input_on(shard: &MemoryShard, input: &[Sample]) -> usize {
        let router = crate::sharding::ShardRouter::new(&["shard-0", "shard-1", "shard-2"]);
        input
            .iter()
            .filter(|s| router.route(s) == Some(shard.addr()))
            .count()
    }
}
