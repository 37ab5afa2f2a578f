//! Per-shard schema cache
//!
//! Field types and tag keys are discovered lazily, once per (shard, database), with
//! `SHOW FIELD KEYS` and `SHOW TAG KEYS`. Concurrent first callers share a single
//! discovery. A failed discovery is not cached, so the next caller retries it.

use super::exec::FieldDimensions;
use super::result::{Row, StatementResult};
use super::telemetry;
use crate::model::{DataType, Precision};
use crate::shard::{ShardClient, WireQuery};
use crate::{Error, Result};
use parking_lot::Mutex;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::{debug, info};

/// Fields and dimensions of one measurement
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MeasurementSchema {
    pub fields: BTreeMap<String, DataType>,
    pub dimensions: BTreeSet<String>,
}

/// Discovered schema of one database on one shard
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DatabaseSchema {
    pub measurements: BTreeMap<String, MeasurementSchema>,
}

impl DatabaseSchema {
    /// Union of the named measurements' fields and dimensions. Unknown names add nothing.
    pub fn fields_and_dimensions(&self, measurements: &[String]) -> FieldDimensions {
        let mut out = FieldDimensions::default();
        for name in measurements {
            if let Some(m) = self.measurements.get(name) {
                out.union(FieldDimensions {
                    fields: m.fields.clone(),
                    dimensions: m.dimensions.clone(),
                });
            }
        }
        out
    }
}

type CacheKey = (String, String);

/// Process-wide schema cache shared by every remote source
#[derive(Default)]
pub struct SchemaCatalog {
    entries: Mutex<HashMap<CacheKey, Arc<OnceCell<Arc<DatabaseSchema>>>>>,
}

impl SchemaCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Field types and dimension names for `measurements` in `database` on `shard`
    pub async fn fields_and_dimensions(
        &self,
        shard: &dyn ShardClient,
        database: &str,
        measurements: &[String],
    ) -> Result<FieldDimensions> {
        let schema = self.database_schema(shard, database).await?;
        Ok(schema.fields_and_dimensions(measurements))
    }

    /// Cached schema, discovering it on first use
    pub async fn database_schema(
        &self,
        shard: &dyn ShardClient,
        database: &str,
    ) -> Result<Arc<DatabaseSchema>> {
        let cell = {
            let mut entries = self.entries.lock();
            entries
                .entry((shard.addr().to_string(), database.to_string()))
                .or_default()
                .clone()
        };

        let schema = cell
            .get_or_try_init(|| async {
                let result = discover(shard, database).await;
                telemetry::record_schema_discovery(if result.is_ok() { "ok" } else { "error" });
                result.map(Arc::new)
            })
            .await?;
        Ok(schema.clone())
    }

    /// Drop every cached entry for `database`; the next read rediscovers it
    pub fn invalidate(&self, database: &str) {
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|(_, db), _| db != database);
        info!(
            database = %database,
            dropped = before - entries.len(),
            "Invalidated schema cache"
        );
    }

    /// True when discovery for (shard, database) has completed successfully
    pub fn is_cached(&self, shard: &str, database: &str) -> bool {
        self.entries
            .lock()
            .get(&(shard.to_string(), database.to_string()))
            .map(|cell| cell.initialized())
            .unwrap_or(false)
    }
}

async fn discover(shard: &dyn ShardClient, database: &str) -> Result<DatabaseSchema> {
    debug!(shard = %shard.addr(), database = %database, "Discovering schema");

    let field_query = WireQuery::new("SHOW FIELD KEYS", database, Precision::Nanosecond);
    let tag_query = WireQuery::new("SHOW TAG KEYS", database, Precision::Nanosecond);
    let (fields, tags) = tokio::try_join!(
        discovery_call(shard, &field_query),
        discovery_call(shard, &tag_query)
    )?;

    let mut schema = DatabaseSchema::default();
    for row in &fields {
        let entry = schema.measurements.entry(row.name.clone()).or_default();
        for value in &row.values {
            let (Some(key), Some(raw_type)) = (string_at(value, 0), string_at(value, 1)) else {
                continue;
            };
            match DataType::from_wire(raw_type) {
                Some(data_type) => {
                    entry.fields.insert(key.to_string(), data_type);
                }
                None => debug!(field = %key, field_type = %raw_type, "Dropping field of unknown type"),
            }
        }
    }
    for row in &tags {
        let entry = schema.measurements.entry(row.name.clone()).or_default();
        entry.dimensions.extend(
            row.values
                .iter()
                .filter_map(|v| string_at(v, 0))
                .map(str::to_string),
        );
    }

    debug!(
        shard = %shard.addr(),
        database = %database,
        measurements = schema.measurements.len(),
        "Schema discovered"
    );
    Ok(schema)
}

async fn discovery_call(shard: &dyn ShardClient, query: &WireQuery) -> Result<Vec<Row>> {
    let failed = |message: String| Error::SchemaDiscovery {
        shard: shard.addr().to_string(),
        message,
    };

    let response = shard.query(query).await.map_err(|e| failed(e.to_string()))?;
    if let Some(error) = response.error {
        return Err(failed(error));
    }
    let mut results = response.results;
    if results.len() != 1 {
        return Err(failed(format!(
            "expected 1 result for '{}', got {}",
            query.command,
            results.len()
        )));
    }
    let StatementResult { series, error, .. } = results.remove(0);
    match error {
        Some(error) => Err(failed(error)),
        None => Ok(series),
    }
}

fn string_at(row: &[serde_json::Value], idx: usize) -> Option<&str> {
    row.get(idx).and_then(|v| v.as_str())
}
