//! InfluxDB 1.x compatible HTTP surface
//!
//! - `/query`: federated InfluxQL reads
//! - `/write`: line protocol writes, sharded by series
//! - `/ping` and `/health`: liveness

pub mod query;
mod telemetry;
pub mod write;

use crate::cluster::Proxy;
use axum::http::{HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use axum::Router;

const VERSION_HEADER: &str = "X-Influxdb-Version";

/// Build the HTTP API router
pub fn build_http_router(proxy: Proxy) -> Router {
    use axum::middleware;
    use axum::routing::get;

    Router::new()
        .route("/health", get(health_check))
        .route("/ping", get(ping))
        .route("/query", get(query::query_get).post(query::query_post))
        .route("/write", get(write::write).post(write::write))
        .with_state(proxy)
        .layer(middleware::from_fn(telemetry::http_observability_middleware))
}

async fn health_check() -> &'static str {
    "OK"
}

async fn ping() -> Response {
    let mut response = StatusCode::NO_CONTENT.into_response();
    response.headers_mut().insert(
        VERSION_HEADER,
        HeaderValue::from_static(concat!("fluxgate-", env!("CARGO_PKG_VERSION"))),
    );
    response
}

/// `{"error": ...}` body with `status`
pub(crate) fn error_response(status: StatusCode, message: impl ToString) -> Response {
    (
        status,
        Json(serde_json::json!({ "error": message.to_string() })),
    )
        .into_response()
}
