//! End-to-end tests over HTTP
//!
//! Each shard is a `MemoryShard` served by a tiny axum app that speaks the InfluxDB 1.x
//! `/query` and `/write` endpoints; the proxy reaches them through `HttpShardClient`.

use axum::body::Bytes;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use flate2::write::GzEncoder;
use flate2::Compression;
use fluxgate::api::build_http_router;
use fluxgate::cluster::Proxy;
use fluxgate::config::ProxyConfig;
use fluxgate::model::{ConsistencyLevel, Precision};
use fluxgate::shard::{MemoryShard, ShardClient, WireQuery, WriteBatch};
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::io::Write;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;

async fn serve(router: Router) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    addr
}

async fn shard_query(
    State(shard): State<Arc<MemoryShard>>,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    let epoch = Precision::parse(params.get("epoch").map(String::as_str).unwrap_or("")).unwrap();
    let wire = WireQuery::new(
        params.get("q").cloned().unwrap_or_default(),
        params.get("db").cloned().unwrap_or_default(),
        epoch,
    );
    match shard.query(&wire).await {
        Ok(response) => Json(response).into_response(),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, Json(json!({"error": e.to_string()}))).into_response(),
    }
}

#[derive(Deserialize)]
struct ShardWriteParams {
    db: String,
    precision: String,
    consistency: String,
}

async fn shard_write(
    State(shard): State<Arc<MemoryShard>>,
    Query(params): Query<ShardWriteParams>,
    body: Bytes,
) -> Response {
    let mut batch = WriteBatch::new(
        params.db,
        Precision::parse(&params.precision).unwrap(),
        ConsistencyLevel::parse(&params.consistency).unwrap(),
    );
    batch.lines = String::from_utf8(body.to_vec())
        .unwrap()
        .lines()
        .map(str::to_string)
        .collect();
    match shard.write(&batch).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, Json(json!({"error": e.to_string()}))).into_response(),
    }
}

struct Harness {
    proxy_url: String,
    shards: Vec<Arc<MemoryShard>>,
    client: reqwest::Client,
}

async fn harness(nodes: usize) -> Harness {
    let mut shards = Vec::new();
    let mut addrs = Vec::new();
    for i in 0..nodes {
        let shard = Arc::new(MemoryShard::new(format!("mem-{}", i)));
        let app = Router::new()
            .route("/query", get(shard_query))
            .route("/write", post(shard_write))
            .with_state(shard.clone());
        addrs.push(format!("http://{}", serve(app).await));
        shards.push(shard);
    }

    let mut config = ProxyConfig::default();
    config.upstreams.addrs = addrs;
    config.validate().unwrap();
    let proxy = Proxy::from_config(&config).unwrap();
    let proxy_addr = serve(build_http_router(proxy)).await;

    Harness {
        proxy_url: format!("http://{}", proxy_addr),
        shards,
        client: reqwest::Client::new(),
    }
}

impl Harness {
    async fn write(&self, body: &str, params: &[(&str, &str)]) -> reqwest::Response {
        self.client
            .post(format!("{}/write", self.proxy_url))
            .query(params)
            .body(body.to_string())
            .send()
            .await
            .unwrap()
    }

    async fn query(&self, params: &[(&str, &str)]) -> (StatusCode, Value) {
        let response = self
            .client
            .get(format!("{}/query", self.proxy_url))
            .query(params)
            .send()
            .await
            .unwrap();
        let status = StatusCode::from_u16(response.status().as_u16()).unwrap();
        (status, response.json().await.unwrap())
    }
}

#[tokio::test]
async fn test_write_then_query_round_trip() {
    let h = harness(2).await;

    let body = "cpu,host=a value=1 1000000000\n\
                cpu,host=b value=2 2000000000\n\
                cpu,host=a value=3 3000000000\n\
                cpu,host=b value=4.5 4000000000";
    let response = h.write(body, &[("db", "telegraf")]).await;
    assert_eq!(response.status().as_u16(), 204);
    let stored: usize = h.shards.iter().map(|s| s.samples("telegraf").len()).sum();
    assert_eq!(stored, 4);

    let (status, json) = h
        .query(&[("db", "telegraf"), ("q", "SELECT value FROM cpu"), ("epoch", "s")])
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        json,
        json!({"results": [{
            "statement_id": 0,
            "series": [{
                "name": "cpu",
                "columns": ["time", "value"],
                "values": [[1, 1], [2, 2], [3, 3], [4, 4.5]]
            }]
        }]})
    );

    let (_, json) = h
        .query(&[("db", "telegraf"), ("q", "SELECT max(value) FROM cpu GROUP BY host")])
        .await;
    let series = json["results"][0]["series"].as_array().unwrap();
    assert_eq!(series.len(), 2);
    assert_eq!(series[0]["tags"], json!({"host": "a"}));
    assert_eq!(series[0]["values"], json!([["1970-01-01T00:00:00Z", 3]]));
    assert_eq!(series[1]["values"], json!([["1970-01-01T00:00:00Z", 4.5]]));
}

#[tokio::test]
async fn test_gzip_write_and_precision() {
    let h = harness(2).await;

    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(b"mem,host=a free=10i 7\nmem,host=b free=20i 8").unwrap();
    let compressed = encoder.finish().unwrap();

    let response = h
        .client
        .post(format!("{}/write", h.proxy_url))
        .query(&[("db", "db"), ("precision", "s")])
        .header("Content-Encoding", "gzip")
        .body(compressed)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 204);

    let (_, json) = h
        .query(&[("db", "db"), ("q", "SELECT free FROM mem GROUP BY host"), ("epoch", "ms")])
        .await;
    let series = json["results"][0]["series"].as_array().unwrap();
    assert_eq!(series[0]["values"], json!([[7000, 10]]));
    assert_eq!(series[1]["values"], json!([[8000, 20]]));
}

#[tokio::test]
async fn test_bad_requests_are_rejected() {
    let h = harness(1).await;

    let (status, json) = h.query(&[("db", "db"), ("q", "SELEC value FROM cpu")]).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(json["error"].as_str().unwrap().contains("error parsing query"));

    let (status, _) = h.query(&[("q", "SELECT value FROM cpu")]).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = h.query(&[("db", "db"), ("q", "SHOW MEASUREMENTS"), ("epoch", "fortnight")]).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let response = h.write("cpu value=1", &[]).await;
    assert_eq!(response.status().as_u16(), 400);

    let response = h.write("not line protocol", &[("db", "db")]).await;
    assert_eq!(response.status().as_u16(), 400);

    let response = h.write("", &[("db", "db")]).await;
    assert_eq!(response.status().as_u16(), 204);

    let response = h.write("cpu value=1", &[("db", "db"), ("consistency", "most")]).await;
    assert_eq!(response.status().as_u16(), 400);
}

#[tokio::test]
async fn test_shard_write_failure_is_500() {
    let h = harness(2).await;
    for shard in &h.shards {
        shard.fail_writes(true);
    }

    let response = h.write("cpu,host=a value=1 1", &[("db", "db")]).await;
    assert_eq!(response.status().as_u16(), 500);
    let body: Value = response.json().await.unwrap();
    assert!(body["error"].as_str().unwrap().contains("write failed on 1 shard(s)"));
}

#[tokio::test]
async fn test_statement_errors_stay_in_their_result() {
    let h = harness(2).await;
    h.write("cpu,host=a value=1 1", &[("db", "db")]).await;

    let (status, json) = h
        .query(&[("db", "db"), ("q", "SHOW DATABASES; SHOW MEASUREMENTS")])
        .await;
    assert_eq!(status, StatusCode::OK);
    let results = json["results"].as_array().unwrap();
    assert_eq!(results.len(), 2);
    assert!(results[0]["error"].is_string());
    assert_eq!(results[1]["series"][0]["values"], json!([["cpu"]]));
}

#[tokio::test]
async fn test_ping_and_health() {
    let h = harness(1).await;

    let response = h.client.get(format!("{}/ping", h.proxy_url)).send().await.unwrap();
    assert_eq!(response.status().as_u16(), 204);
    assert!(response.headers().contains_key("x-influxdb-version"));

    let response = h.client.head(format!("{}/ping", h.proxy_url)).send().await.unwrap();
    assert_eq!(response.status().as_u16(), 204);

    let response = h.client.get(format!("{}/health", h.proxy_url)).send().await.unwrap();
    assert_eq!(response.text().await.unwrap(), "OK");
}
