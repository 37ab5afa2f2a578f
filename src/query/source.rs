//! Leaf source backed by one shard
//!
//! Turns runtime read options into an InfluxQL sub-query, runs it on the shard and
//! decodes the tabular answer into per-series cursors.

use super::ast::{Dimension, Field, SelectStatement};
use super::catalog::SchemaCatalog;
use super::exec::{FieldDimensions, IteratorOptions, Point, SampleSource, SeriesCursor};
use super::result::{QueryResponse, Row};
use super::telemetry;
use crate::model::Precision;
use crate::shard::{ShardClient, WireQuery};
use crate::{Error, Result};
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use tracing::debug;

/// The part of a read that runs on one shard
#[derive(Debug, Clone, PartialEq)]
pub struct SubQuery {
    pub statement: SelectStatement,
    /// Rows carry one value per auxiliary field rather than a single value
    pub aux: bool,
}

impl SubQuery {
    /// Project `options` into a statement. The condition is cloned unchanged and
    /// limits are carried through as given.
    pub fn from_options(options: &IteratorOptions) -> Result<Self> {
        let aux = !options.aux.is_empty();
        let fields = if aux {
            options.aux.iter().cloned().map(Field::new).collect()
        } else {
            let expr = options
                .expr
                .clone()
                .ok_or_else(|| Error::Internal("read options carry no expression".to_string()))?;
            vec![Field::new(expr)]
        };

        let statement = SelectStatement {
            fields,
            sources: options.sources.clone(),
            condition: options.condition.clone(),
            dimensions: options
                .dimensions
                .iter()
                .cloned()
                .map(Dimension::Tag)
                .collect(),
            fill: options.fill,
            ascending: options.ascending,
            limit: options.limit,
            offset: options.offset,
            slimit: options.slimit,
            soffset: options.soffset,
        };
        Ok(Self { statement, aux })
    }

    pub fn to_wire(&self, database: &str, epoch: Precision) -> WireQuery {
        WireQuery::new(self.statement.to_string(), database, epoch)
    }
}

/// [`SampleSource`] for one shard and one database
pub struct RemoteSampleSource {
    shard: Arc<dyn ShardClient>,
    database: String,
    catalog: Arc<SchemaCatalog>,
    precision: Precision,
}

impl RemoteSampleSource {
    pub fn new(shard: Arc<dyn ShardClient>, database: impl Into<String>, catalog: Arc<SchemaCatalog>) -> Self {
        Self {
            shard,
            database: database.into(),
            catalog,
            precision: Precision::Second,
        }
    }

    /// Timestamp precision requested from the shard
    pub fn with_precision(mut self, precision: Precision) -> Self {
        self.precision = precision;
        self
    }

    pub fn shard_addr(&self) -> &str {
        self.shard.addr()
    }

    fn sub_query_error(&self, message: impl Into<String>) -> Error {
        Error::SubQuery {
            shard: self.shard.addr().to_string(),
            message: message.into(),
        }
    }
}

#[async_trait]
impl SampleSource for RemoteSampleSource {
    async fn schema(&self, sources: &[String]) -> Result<FieldDimensions> {
        self.catalog
            .fields_and_dimensions(self.shard.as_ref(), &self.database, sources)
            .await
    }

    async fn open(&self, options: &IteratorOptions) -> Result<Vec<SeriesCursor>> {
        let sub_query = SubQuery::from_options(options)?;
        let wire = sub_query.to_wire(&self.database, self.precision);
        debug!(shard = %self.shard.addr(), q = %wire.command, "Dispatching sub-query");

        let response = match self.shard.query(&wire).await {
            Ok(response) => response,
            Err(e) => {
                telemetry::record_sub_query(self.shard.addr(), "error");
                return Err(self.sub_query_error(e.to_string()));
            }
        };

        let decoded = decode_response(response, sub_query.aux, self.precision)
            .map_err(|message| self.sub_query_error(message));
        telemetry::record_sub_query(
            self.shard.addr(),
            if decoded.is_ok() { "ok" } else { "error" },
        );
        decoded
    }
}

/// Decode a single-statement response into one cursor per series.
///
/// The first column is the timestamp in `precision`. With `aux` every further column
/// is one auxiliary value; otherwise the second column is the only value and rows
/// where it is null are skipped.
pub fn decode_response(
    response: QueryResponse,
    aux: bool,
    precision: Precision,
) -> std::result::Result<Vec<SeriesCursor>, String> {
    if let Some(error) = response.error {
        return Err(error);
    }
    let mut results = response.results;
    if results.len() != 1 {
        return Err(format!("expected 1 result, got {}", results.len()));
    }
    let result = results.remove(0);
    if let Some(error) = result.error {
        return Err(error);
    }

    Ok(result
        .series
        .into_iter()
        .map(|row| decode_row(row, aux, precision))
        .collect())
}

fn decode_row(row: Row, aux: bool, precision: Precision) -> SeriesCursor {
    let mut points = Vec::with_capacity(row.values.len());
    for values in &row.values {
        let time = values.first().map(decode_time).unwrap_or_default();
        let time = precision.to_nanos(time);
        if aux {
            let fields = values.iter().skip(1).map(decode_number).collect();
            points.push(Point::with_aux(row.name.clone(), row.tags.clone(), time, fields));
        } else if let Some(value) = values.get(1).and_then(decode_number) {
            points.push(Point::new(row.name.clone(), row.tags.clone(), time, value));
        }
    }
    SeriesCursor::new(row.name, row.tags, points)
}

fn decode_time(value: &Value) -> i64 {
    value
        .as_i64()
        .or_else(|| value.as_f64().map(|v| v as i64))
        .unwrap_or_default()
}

/// Best-effort numeric view of a cell. Null stays null; anything unreadable is zero.
fn decode_number(value: &Value) -> Option<f64> {
    match value {
        Value::Null => None,
        Value::Number(n) => Some(n.as_f64().unwrap_or_default()),
        Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        Value::String(s) => Some(s.parse().unwrap_or_default()),
        _ => Some(0.0),
    }
}
