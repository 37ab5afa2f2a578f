//! `/query` endpoint
//!
//! Parses the InfluxQL text, runs it through the federator and coalesces the chunk
//! stream into one InfluxDB 1.x JSON body.

use super::error_response;
use crate::cluster::{ExecutionOptions, Proxy};
use crate::model::Precision;
use crate::query::{parse_query, QueryResponse, ResultCoalescer, StatementResult};
use axum::extract::{Form, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::{SecondsFormat, TimeZone, Utc};
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

#[derive(Debug, Default, Clone, Deserialize)]
pub struct QueryParams {
    pub q: Option<String>,
    pub db: Option<String>,
    pub epoch: Option<String>,
    pub chunk_size: Option<usize>,
}

impl QueryParams {
    /// Fill parameters missing from `self` with those from `other`
    fn or(self, other: QueryParams) -> QueryParams {
        QueryParams {
            q: self.q.or(other.q),
            db: self.db.or(other.db),
            epoch: self.epoch.or(other.epoch),
            chunk_size: self.chunk_size.or(other.chunk_size),
        }
    }
}

pub async fn query_get(State(proxy): State<Proxy>, Query(params): Query<QueryParams>) -> Response {
    execute(proxy, params).await
}

/// POST accepts parameters in the URL, a form body, or both
pub async fn query_post(
    State(proxy): State<Proxy>,
    Query(params): Query<QueryParams>,
    form: Option<Form<QueryParams>>,
) -> Response {
    let params = match form {
        Some(Form(body)) => params.or(body),
        None => params,
    };
    execute(proxy, params).await
}

async fn execute(proxy: Proxy, params: QueryParams) -> Response {
    let Some(text) = params.q.filter(|q| !q.trim().is_empty()) else {
        return error_response(StatusCode::BAD_REQUEST, "missing required parameter \"q\"");
    };
    let Some(database) = params.db.filter(|db| !db.is_empty()) else {
        return error_response(StatusCode::BAD_REQUEST, "database name required");
    };
    let epoch = match parse_epoch(params.epoch.as_deref()) {
        Ok(epoch) => epoch,
        Err(e) => return error_response(StatusCode::BAD_REQUEST, e),
    };
    let query = match parse_query(&text) {
        Ok(query) => query,
        Err(e) => return error_response(StatusCode::BAD_REQUEST, e),
    };

    debug!(db = %database, statements = query.statements.len(), "Executing query");
    let options = ExecutionOptions::new(database).with_chunk_size(params.chunk_size.unwrap_or(0));
    let rx = proxy.federator.execute(query, options);
    let mut results = ResultCoalescer::new().collect(rx).await;
    for result in &mut results {
        render_times(result, epoch);
    }

    (
        StatusCode::OK,
        Json(QueryResponse {
            results,
            error: None,
        }),
    )
        .into_response()
}

/// Integer time precision requested by `epoch`; absent or empty keeps RFC3339 strings
fn parse_epoch(raw: Option<&str>) -> crate::Result<Option<Precision>> {
    raw.map(str::trim)
        .filter(|epoch| !epoch.is_empty())
        .map(Precision::parse)
        .transpose()
}

/// Rewrite nanosecond `time` columns as integers in `epoch`, or RFC3339 strings
pub fn render_times(result: &mut StatementResult, epoch: Option<Precision>) {
    for row in &mut result.series {
        if row.columns.first().map(String::as_str) != Some("time") {
            continue;
        }
        for values in &mut row.values {
            let Some(nanos) = values.first().and_then(Value::as_i64) else {
                continue;
            };
            values[0] = match epoch {
                Some(precision) => Value::from(precision.from_nanos(nanos)),
                None => Value::from(
                    Utc.timestamp_nanos(nanos)
                        .to_rfc3339_opts(SecondsFormat::AutoSi, true),
                ),
            };
        }
    }
}
