//! Integration tests for lazy schema discovery through the federator

use fluxgate::cluster::{Cluster, ExecutionOptions, QueryFederator};
use fluxgate::config::QueryConfig;
use fluxgate::model::Sample;
use fluxgate::query::{parse_query, ResultCoalescer};
use fluxgate::shard::{MemoryShard, ShardClient};
use std::sync::Arc;

fn setup() -> (Arc<QueryFederator>, Vec<Arc<MemoryShard>>) {
    let shards: Vec<Arc<MemoryShard>> = (0..2)
        .map(|i| Arc::new(MemoryShard::new(format!("s{}", i))))
        .collect();
    let clients = shards.iter().map(|s| s.clone() as Arc<dyn ShardClient>).collect();
    let cluster = Arc::new(Cluster::new(clients).unwrap());
    (Arc::new(QueryFederator::new(cluster, QueryConfig::default())), shards)
}

async fn run(federator: &Arc<QueryFederator>, db: &str, text: &str) {
    let rx = federator.execute(parse_query(text).unwrap(), ExecutionOptions::new(db));
    let results = ResultCoalescer::new().collect(rx).await;
    assert!(results.iter().all(|r| !r.is_error()), "{:?}", results);
}

#[tokio::test]
async fn test_schema_discovered_once_per_shard_and_database() {
    let (federator, shards) = setup();
    shards[0].insert(
        "db",
        vec![Sample::builder("cpu").tag("host", "a").field("v", 1.0).timestamp(0).build()],
    );

    for _ in 0..5 {
        run(&federator, "db", "SELECT * FROM cpu").await;
    }
    for shard in &shards {
        assert_eq!(shard.call_count("show_field_keys"), 1);
        assert_eq!(shard.call_count("show_tag_keys"), 1);
        assert_eq!(shard.call_count("select"), 5);
    }
    assert!(federator.catalog().is_cached("s0", "db"));

    run(&federator, "other", "SELECT * FROM cpu").await;
    assert_eq!(shards[0].call_count("show_field_keys"), 2);
}

#[tokio::test]
async fn test_invalidate_picks_up_new_fields() {
    let (federator, shards) = setup();
    shards[0].insert(
        "db",
        vec![Sample::builder("cpu").tag("host", "a").field("v", 1.0).timestamp(0).build()],
    );
    run(&federator, "db", "SELECT * FROM cpu").await;

    shards[1].insert(
        "db",
        vec![Sample::builder("cpu").tag("host", "b").field("w", 2i64).timestamp(0).build()],
    );
    federator.catalog().invalidate("db");

    let rx = federator.execute(parse_query("SELECT * FROM cpu").unwrap(), ExecutionOptions::new("db"));
    let results = ResultCoalescer::new().collect(rx).await;
    assert_eq!(results[0].series[0].columns, vec!["time", "v", "w"]);
    assert_eq!(shards[1].call_count("show_field_keys"), 2);
}

#[tokio::test]
async fn test_discovery_failure_is_retried() {
    let (federator, shards) = setup();
    shards[0].insert(
        "db",
        vec![Sample::builder("cpu").tag("host", "a").field("v", 1.0).timestamp(0).build()],
    );
    shards[1].fail_queries("SHOW FIELD KEYS");

    let rx = federator.execute(parse_query("SELECT * FROM cpu").unwrap(), ExecutionOptions::new("db"));
    let results = ResultCoalescer::new().collect(rx).await;
    assert!(results[0].is_error());
    assert!(!federator.catalog().is_cached("s1", "db"));

    shards[1].heal();
    run(&federator, "db", "SELECT * FROM cpu").await;
    assert!(federator.catalog().is_cached("s1", "db"));
}
