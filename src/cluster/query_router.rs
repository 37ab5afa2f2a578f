//! Federated query execution
//!
//! Every statement fans out to all shards, because a series may live on any of them.
//! Shard output is merged in series/time order, aggregated at the proxy and streamed
//! back as result chunks over a bounded channel.

use super::Cluster;
use crate::config::QueryConfig;
use crate::model::{Precision, Tags};
use crate::query::ast::{Expr, SelectStatement, Statement};
use crate::query::catalog::SchemaCatalog;
use crate::query::exec::{
    merge_sorted, rewrite_fields, Aggregate, CallReducer, Emitter, IteratorOptions, SampleSource,
    SeriesRows, SortedMerge, SourceSet,
};
use crate::query::result::{Row, StatementResult};
use crate::query::source::RemoteSampleSource;
use crate::query::telemetry::{self, StatementMetrics};
use crate::query::Query;
use crate::shard::{ShardClient, WireQuery};
use crate::{Error, Result};
use dashmap::DashMap;
use futures::future::try_join_all;
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;
use tokio::task::JoinError;
use tracing::{debug, info, warn};

/// Per-request execution settings
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecutionOptions {
    pub database: String,
    /// Rows per result chunk; zero falls back to the configured default
    pub chunk_size: usize,
}

impl ExecutionOptions {
    pub fn new(database: impl Into<String>) -> Self {
        Self {
            database: database.into(),
            chunk_size: 0,
        }
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size;
        self
    }
}

/// Runs parsed statements across every shard of a [`Cluster`]
pub struct QueryFederator {
    cluster: Arc<Cluster>,
    catalog: Arc<SchemaCatalog>,
    /// One source set per database, built on first use
    sources: DashMap<String, Arc<SourceSet>>,
    config: QueryConfig,
}

impl QueryFederator {
    pub fn new(cluster: Arc<Cluster>, config: QueryConfig) -> Self {
        Self {
            cluster,
            catalog: Arc::new(SchemaCatalog::new()),
            sources: DashMap::new(),
            config,
        }
    }

    pub fn catalog(&self) -> &Arc<SchemaCatalog> {
        &self.catalog
    }

    /// Execute `query` statement by statement.
    ///
    /// Chunks for one statement are sent contiguously, in statement order, as soon as
    /// they are produced. A failing statement yields a single error chunk and execution
    /// moves on to the next one; each statement runs on its own task so a panic is
    /// confined to it. Dropping the receiver cancels the statement in flight.
    pub fn execute(self: &Arc<Self>, query: Query, options: ExecutionOptions) -> mpsc::Receiver<StatementResult> {
        let (tx, rx) = mpsc::channel(self.config.channel_capacity.max(1));
        let this = self.clone();

        tokio::spawn(async move {
            for (id, statement) in query.statements.into_iter().enumerate() {
                let start = Instant::now();
                let kind = statement_kind(&statement);
                let sink = ChunkSink::new(tx.clone(), id);
                let task = tokio::spawn(this.clone().run_statement(statement, options.clone(), sink));
                let abort = task.abort_handle();

                let joined = tokio::select! {
                    _ = tx.closed() => {
                        abort.abort();
                        debug!(statement_id = id, "Query receiver dropped, cancelling");
                        return;
                    }
                    joined = task => joined,
                };

                let (rows, outcome) = match joined.unwrap_or_else(|e| Err(join_error(e))) {
                    Ok(rows) => (rows, Ok(())),
                    Err(Error::Cancelled) => {
                        debug!(statement_id = id, "Query receiver dropped mid-statement");
                        return;
                    }
                    Err(e) => {
                        warn!(statement_id = id, kind, error = %e, "Statement failed");
                        (0, Err(e))
                    }
                };
                telemetry::record_statement(StatementMetrics {
                    kind,
                    outcome: if outcome.is_ok() { "ok" } else { "error" },
                    duration_seconds: start.elapsed().as_secs_f64(),
                    rows_returned: rows as u64,
                });

                if let Err(e) = outcome {
                    if tx.send(StatementResult::error(id, &e)).await.is_err() {
                        return;
                    }
                }
            }
        });

        rx
    }

    /// One statement under the query timeout. Returns the number of rows sent.
    async fn run_statement(
        self: Arc<Self>,
        statement: Statement,
        options: ExecutionOptions,
        mut sink: ChunkSink,
    ) -> Result<usize> {
        let work = async {
            match &statement {
                Statement::Select(select) => self.select(select, &options, &mut sink).await,
                Statement::ShowDatabases => Err(Error::UnsupportedStatement(statement.to_string())),
                Statement::ShowMeasurements
                | Statement::ShowFieldKeys { .. }
                | Statement::ShowTagKeys { .. } => match self.show(&statement, &options.database).await {
                    Ok(rows) => sink.send_all(rows).await,
                    Err(e) => Err(e),
                },
            }
        };
        tokio::time::timeout(self.config.timeout(), work)
            .await
            .unwrap_or(Err(Error::Timeout))?;
        sink.finish().await
    }

    fn source_set(&self, database: &str) -> Arc<SourceSet> {
        if let Some(set) = self.sources.get(database) {
            return set.clone();
        }
        self.sources
            .entry(database.to_string())
            .or_insert_with(|| {
                let members = self
                    .cluster
                    .clients()
                    .map(|client| {
                        Arc::new(RemoteSampleSource::new(client.clone(), database, self.catalog.clone()))
                            as Arc<dyn SampleSource>
                    })
                    .collect();
                info!(database = %database, shards = self.cluster.len(), "Built shard source set");
                Arc::new(SourceSet::new(members))
            })
            .clone()
    }

    async fn select(&self, stmt: &SelectStatement, options: &ExecutionOptions, sink: &mut ChunkSink) -> Result<()> {
        let set = self.source_set(&options.database);
        let schema = set.schema(&stmt.sources).await?;
        let stmt = rewrite_fields(stmt, &schema);
        if stmt.fields.is_empty() {
            return Ok(());
        }
        validate(&stmt)?;

        let chunk_size = if options.chunk_size == 0 {
            self.config.default_chunk_size
        } else {
            options.chunk_size
        };
        let emitter = Emitter::new(stmt.column_names())
            .with_limit(stmt.limit, stmt.offset)
            .with_series_limit(stmt.slimit, stmt.soffset)
            .with_chunk_size(chunk_size);

        if stmt.has_calls() {
            let series = self.select_calls(&set, &stmt).await?;
            sink.send_all(emitter.emit(series)).await
        } else {
            let points = self.select_raw(&set, &stmt).await?;
            sink.send_all(emitter.emit(SeriesRows::group(points))).await
        }
    }

    /// Raw projections ride as auxiliary fields; shards apply `limit + offset` and the
    /// merged stream is trimmed afterwards.
    async fn select_raw(&self, set: &SourceSet, stmt: &SelectStatement) -> Result<SortedMerge> {
        let options = IteratorOptions {
            aux: stmt.fields.iter().map(|f| f.expr.clone()).collect(),
            ascending: stmt.ascending,
            limit: if stmt.limit == 0 { 0 } else { stmt.limit + stmt.offset },
            ..base_options(stmt)
        };
        let cursors = set.open(&options).await?;
        Ok(merge_sorted(cursors, stmt.ascending))
    }

    /// One raw read per call, reduced here and joined on (series, window)
    async fn select_calls(&self, set: &SourceSet, stmt: &SelectStatement) -> Result<Vec<SeriesRows>> {
        let calls = stmt
            .fields
            .iter()
            .map(|field| match &field.expr {
                Expr::Call { name, args } => {
                    let aggregate = Aggregate::from_name(name)
                        .ok_or_else(|| Error::UnsupportedStatement(format!("function {}()", name)))?;
                    Ok((aggregate, args[0].clone()))
                }
                other => Err(Error::UnsupportedStatement(other.to_string())),
            })
            .collect::<Result<Vec<_>>>()?;

        let range = stmt.time_range();
        let reads = calls.iter().map(|(aggregate, arg)| async move {
            let options = IteratorOptions {
                expr: Some(arg.clone()),
                ..base_options(stmt)
            };
            let cursors = set.open(&options).await?;
            let reducer = CallReducer::new(*aggregate, stmt.interval(), stmt.fill)
                .with_range(range)
                .with_max_buckets(self.config.max_buckets);
            reducer.reduce(merge_sorted(cursors, true))
        });
        let reduced = try_join_all(reads).await?;

        let width = calls.len();
        let mut joined: BTreeMap<(String, Tags), BTreeMap<i64, Vec<Option<f64>>>> = BTreeMap::new();
        for (column, per_series) in reduced.into_iter().enumerate() {
            for series in per_series {
                let rows = joined.entry((series.name, series.tags)).or_default();
                for (time, value) in series.values {
                    rows.entry(time).or_insert_with(|| vec![None; width])[column] = value;
                }
            }
        }

        Ok(joined
            .into_iter()
            .map(|((name, tags), rows)| {
                let mut rows: Vec<_> = rows.into_iter().collect();
                if !stmt.ascending {
                    rows.reverse();
                }
                SeriesRows { name, tags, rows }
            })
            .collect())
    }

    /// Metadata statements go to every shard; rows are merged by series name with
    /// duplicate values dropped.
    async fn show(&self, statement: &Statement, database: &str) -> Result<Vec<Row>> {
        let wire = WireQuery::new(statement.to_string(), database, Precision::Second);
        let calls = self.cluster.clients().map(|client| {
            let wire = &wire;
            async move {
                let shard_error = |message: String| Error::SubQuery {
                    shard: client.addr().to_string(),
                    message,
                };
                let response = client.query(wire).await.map_err(|e| shard_error(e.to_string()))?;
                if let Some(e) = response.error {
                    return Err(shard_error(e));
                }
                let result = response.results.into_iter().next().unwrap_or_default();
                match result.error {
                    Some(e) => Err(shard_error(e)),
                    None => Ok(result.series),
                }
            }
        });
        let per_shard = try_join_all(calls).await?;

        let mut merged: BTreeMap<String, (Row, HashSet<String>)> = BTreeMap::new();
        for row in per_shard.into_iter().flatten() {
            let (target, seen) = merged.entry(row.name.clone()).or_insert_with(|| {
                (
                    Row {
                        name: row.name.clone(),
                        columns: row.columns.clone(),
                        ..Default::default()
                    },
                    HashSet::new(),
                )
            });
            for values in row.values {
                let key = serde_json::to_string(&values)?;
                if seen.insert(key) {
                    target.values.push(values);
                }
            }
        }

        Ok(merged
            .into_values()
            .map(|(mut row, _)| {
                row.values.sort_by_key(|v| serde_json::to_string(v).unwrap_or_default());
                row
            })
            .collect())
    }
}

fn statement_kind(statement: &Statement) -> &'static str {
    match statement {
        Statement::Select(_) => "select",
        Statement::ShowDatabases => "show_databases",
        Statement::ShowMeasurements => "show_measurements",
        Statement::ShowFieldKeys { .. } => "show_field_keys",
        Statement::ShowTagKeys { .. } => "show_tag_keys",
    }
}

/// Read options shared by raw and call reads. Leaves never see a time dimension.
fn base_options(stmt: &SelectStatement) -> IteratorOptions {
    IteratorOptions {
        sources: stmt.sources.clone(),
        condition: stmt.condition.clone(),
        dimensions: stmt.tag_dimensions(),
        ascending: true,
        ..Default::default()
    }
}

fn validate(stmt: &SelectStatement) -> Result<()> {
    if stmt.has_calls() {
        for field in &stmt.fields {
            match &field.expr {
                Expr::Call { name, args } => {
                    if Aggregate::from_name(name).is_none() {
                        return Err(Error::UnsupportedStatement(format!("function {}()", name)));
                    }
                    if args.len() != 1 || args[0].var_ref_name().is_none() {
                        return Err(Error::UnsupportedStatement(format!(
                            "{}() expects a single field argument",
                            name
                        )));
                    }
                }
                other => {
                    return Err(Error::UnsupportedStatement(format!(
                        "mixing aggregate and raw fields: {}",
                        other
                    )))
                }
            }
        }
        return Ok(());
    }

    if stmt.interval().is_some() {
        return Err(Error::UnsupportedStatement(
            "GROUP BY time() requires an aggregate function".to_string(),
        ));
    }
    for field in &stmt.fields {
        if field.expr.var_ref_name().is_none() {
            return Err(Error::UnsupportedStatement(field.expr.to_string()));
        }
    }
    Ok(())
}

/// Forwards one statement's rows to the caller as they are produced
struct ChunkSink {
    tx: mpsc::Sender<StatementResult>,
    statement_id: usize,
    chunks: usize,
    rows: usize,
}

impl ChunkSink {
    fn new(tx: mpsc::Sender<StatementResult>, statement_id: usize) -> Self {
        Self {
            tx,
            statement_id,
            chunks: 0,
            rows: 0,
        }
    }

    async fn send(&mut self, row: Row) -> Result<()> {
        self.rows += row.values.len();
        self.tx
            .send(StatementResult::with_series(self.statement_id, vec![row]))
            .await
            .map_err(|_| Error::Cancelled)?;
        self.chunks += 1;
        Ok(())
    }

    async fn send_all(&mut self, rows: impl IntoIterator<Item = Row>) -> Result<()> {
        for row in rows {
            self.send(row).await?;
        }
        Ok(())
    }

    /// An empty result still yields one chunk. Returns the rows sent.
    async fn finish(self) -> Result<usize> {
        if self.chunks == 0 {
            self.tx
                .send(StatementResult::empty(self.statement_id))
                .await
                .map_err(|_| Error::Cancelled)?;
        }
        Ok(self.rows)
    }
}

fn join_error(e: JoinError) -> Error {
    if !e.is_panic() {
        return Error::Cancelled;
    }
    let payload = e.into_panic();
    let message = payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string());
    Error::Internal(format!("statement panicked: {}", message))
}
