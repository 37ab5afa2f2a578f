//! Per-endpoint request metrics for the proxy's HTTP surface.
//!
//! Requests are labeled by endpoint, target database and status class so a
//! slow or failing database shows up without per-URL cardinality.

use axum::extract::Query;
use axum::http::header::CONTENT_LENGTH;
use axum::http::{Request, Uri};
use axum::middleware::Next;
use axum::response::Response;
use opentelemetry::global;
use opentelemetry::metrics::{Counter, Histogram};
use opentelemetry::KeyValue;
use serde::Deserialize;
use std::sync::OnceLock;
use std::time::Instant;
use tracing::{info_span, warn, Instrument};

/// The proxy endpoint a request targets
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Endpoint {
    Query,
    Write,
    Ping,
    Health,
    Other,
}

impl Endpoint {
    fn classify(path: &str) -> Self {
        match path.trim_end_matches('/') {
            "/query" => Endpoint::Query,
            "/write" => Endpoint::Write,
            "/ping" => Endpoint::Ping,
            "/health" => Endpoint::Health,
            _ => Endpoint::Other,
        }
    }

    fn as_str(self) -> &'static str {
        match self {
            Endpoint::Query => "query",
            Endpoint::Write => "write",
            Endpoint::Ping => "ping",
            Endpoint::Health => "health",
            Endpoint::Other => "other",
        }
    }
}

struct ProxyInstruments {
    requests: Counter<u64>,
    duration_seconds: Histogram<f64>,
    write_bytes: Counter<u64>,
}

fn instruments() -> &'static ProxyInstruments {
    static INSTRUMENTS: OnceLock<ProxyInstruments> = OnceLock::new();
    INSTRUMENTS.get_or_init(|| {
        let meter = global::meter("fluxgate.http");
        ProxyInstruments {
            requests: meter
                .u64_counter("fluxgate.http.requests")
                .with_description("Requests handled per endpoint, database and status class")
                .init(),
            duration_seconds: meter
                .f64_histogram("fluxgate.http.duration")
                .with_description("Time from request receipt to response headers")
                .with_unit("s")
                .init(),
            write_bytes: meter
                .u64_counter("fluxgate.http.write.bytes")
                .with_description("Line protocol bytes received, as declared by Content-Length")
                .with_unit("By")
                .init(),
        }
    })
}

#[derive(Deserialize)]
struct DbParam {
    db: Option<String>,
}

/// `db` from the query string; form bodies are not inspected.
fn target_database(uri: &Uri) -> String {
    Query::<DbParam>::try_from_uri(uri)
        .ok()
        .and_then(|Query(param)| param.db)
        .unwrap_or_default()
}

fn status_class(status: u16) -> &'static str {
    match status {
        100..=199 => "1xx",
        200..=299 => "2xx",
        300..=399 => "3xx",
        400..=499 => "4xx",
        _ => "5xx",
    }
}

/// Labels every request with its endpoint, database and status class.
pub async fn http_observability_middleware(req: Request<axum::body::Body>, next: Next) -> Response {
    let start = Instant::now();
    let endpoint = Endpoint::classify(req.uri().path());
    let database = target_database(req.uri());
    let declared_bytes = req
        .headers()
        .get(CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<u64>().ok());

    let span = info_span!(
        "http.request",
        endpoint = endpoint.as_str(),
        db = %database,
        method = %req.method(),
    );
    let response = next.run(req).instrument(span).await;
    let status = response.status().as_u16();
    let elapsed = start.elapsed();

    let attrs = [
        KeyValue::new("endpoint", endpoint.as_str()),
        KeyValue::new("db", database.clone()),
        KeyValue::new("status_class", status_class(status)),
    ];
    let instruments = instruments();
    instruments.requests.add(1, &attrs);
    instruments.duration_seconds.record(elapsed.as_secs_f64(), &attrs);
    if let (Endpoint::Write, Some(bytes)) = (endpoint, declared_bytes) {
        instruments.write_bytes.add(bytes, &attrs[..2]);
    }

    if status >= 500 {
        warn!(
            endpoint = endpoint.as_str(),
            db = %database,
            status,
            elapsed_ms = elapsed.as_millis() as u64,
            "request failed"
        );
    }

    response
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoints_are_classified_by_path() {
        assert_eq!(Endpoint::classify("/query"), Endpoint::Query);
        assert_eq!(Endpoint::classify("/write/"), Endpoint::Write);
        assert_eq!(Endpoint::classify("/ping"), Endpoint::Ping);
        assert_eq!(Endpoint::classify("/health"), Endpoint::Health);
        assert_eq!(Endpoint::classify("/debug/vars"), Endpoint::Other);
        assert_eq!(Endpoint::classify("/queryx"), Endpoint::Other);
    }

    #[test]
    fn database_comes_from_the_query_string() {
        let uri: Uri = "/write?db=telegraf&precision=s".parse().unwrap();
        assert_eq!(target_database(&uri), "telegraf");

        let uri: Uri = "/query?q=SHOW%20DATABASES&db=my%20db".parse().unwrap();
        assert_eq!(target_database(&uri), "my db");

        let uri: Uri = "/ping".parse().unwrap();
        assert_eq!(target_database(&uri), "");
    }

    #[test]
    fn statuses_collapse_to_classes() {
        assert_eq!(status_class(204), "2xx");
        assert_eq!(status_class(400), "4xx");
        assert_eq!(status_class(503), "5xx");
    }
}
