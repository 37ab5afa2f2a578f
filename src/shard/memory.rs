//! In-process shard node
//!
//! Stores written points per database and answers SHOW statements and raw SELECTs
//! the way an InfluxDB 1.x node would. Used for tests and local runs without a
//! real cluster.

use super::{ShardClient, WireQuery, WriteBatch};
use crate::model::{line_protocol, FieldValue, Precision, Sample, Tags};
use crate::query::ast::{BinaryOp, Dimension, Expr, SelectStatement, Statement};
use crate::query::parser::parse_query;
use crate::query::result::{QueryResponse, Row, StatementResult};
use crate::{Error, Result};
use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::RwLock;
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};

type SeriesStore = BTreeMap<(String, i64), Sample>;

pub struct MemoryShard {
    addr: String,
    databases: RwLock<HashMap<String, SeriesStore>>,
    calls: DashMap<&'static str, usize>,
    fail_queries: RwLock<Option<String>>,
    fail_writes: AtomicBool,
}

impl MemoryShard {
    pub fn new(addr: impl Into<String>) -> Self {
        Self {
            addr: addr.into(),
            databases: RwLock::new(HashMap::new()),
            calls: DashMap::new(),
            fail_queries: RwLock::new(None),
            fail_writes: AtomicBool::new(false),
        }
    }

    /// Number of statements of `kind` served so far: `select`, `show_databases`,
    /// `show_measurements`, `show_field_keys`, `show_tag_keys` or `write`
    pub fn call_count(&self, kind: &str) -> usize {
        self.calls.get(kind).map(|c| *c).unwrap_or(0)
    }

    /// Fail every query whose text contains `pattern`; an empty pattern fails all
    pub fn fail_queries(&self, pattern: impl Into<String>) {
        *self.fail_queries.write() = Some(pattern.into());
    }

    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Clear injected failures
    pub fn heal(&self) {
        *self.fail_queries.write() = None;
        self.fail_writes.store(false, Ordering::SeqCst);
    }

    /// Stored points for `database`, ordered by series key then time
    pub fn samples(&self, database: &str) -> Vec<Sample> {
        self.databases
            .read()
            .get(database)
            .map(|store| store.values().cloned().collect())
            .unwrap_or_default()
    }

    pub fn insert(&self, database: &str, samples: impl IntoIterator<Item = Sample>) {
        let mut databases = self.databases.write();
        let store = databases.entry(database.to_string()).or_default();
        for sample in samples {
            let key = (sample.series_key(), sample.timestamp());
            let merged = match store.remove(&key) {
                Some(existing) => {
                    let mut fields = existing.fields().clone();
                    fields.extend(sample.fields().clone());
                    Sample::new(sample.measurement(), sample.tags().clone(), fields, sample.timestamp())
                }
                None => sample,
            };
            store.insert(key, merged);
        }
    }

    fn count(&self, kind: &'static str) {
        *self.calls.entry(kind).or_insert(0) += 1;
    }

    fn execute(&self, stmt: &Statement, database: &str, epoch: Precision) -> Result<Vec<Row>> {
        let databases = self.databases.read();
        let empty = SeriesStore::new();
        let store = databases.get(database).unwrap_or(&empty);

        match stmt {
            Statement::ShowDatabases => {
                self.count("show_databases");
                let mut names: Vec<&String> = databases.keys().collect();
                names.sort();
                Ok(vec![Row {
                    name: "databases".to_string(),
                    columns: vec!["name".to_string()],
                    values: names.into_iter().map(|n| vec![Value::from(n.as_str())]).collect(),
                    ..Default::default()
                }])
            }
            Statement::ShowMeasurements => {
                self.count("show_measurements");
                let names: BTreeSet<&str> = store.values().map(Sample::measurement).collect();
                if names.is_empty() {
                    return Ok(Vec::new());
                }
                Ok(vec![Row {
                    name: "measurements".to_string(),
                    columns: vec!["name".to_string()],
                    values: names.into_iter().map(|n| vec![Value::from(n)]).collect(),
                    ..Default::default()
                }])
            }
            Statement::ShowFieldKeys { sources } => {
                self.count("show_field_keys");
                let mut keys: BTreeMap<&str, BTreeMap<&str, &'static str>> = BTreeMap::new();
                for sample in store.values().filter(|s| in_sources(s, sources)) {
                    let entry = keys.entry(sample.measurement()).or_default();
                    for (name, value) in sample.fields() {
                        entry.entry(name.as_str()).or_insert(value.data_type().as_str());
                    }
                }
                Ok(keys
                    .into_iter()
                    .map(|(measurement, fields)| Row {
                        name: measurement.to_string(),
                        columns: vec!["fieldKey".to_string(), "fieldType".to_string()],
                        values: fields
                            .into_iter()
                            .map(|(k, t)| vec![Value::from(k), Value::from(t)])
                            .collect(),
                        ..Default::default()
                    })
                    .collect())
            }
            Statement::ShowTagKeys { sources } => {
                self.count("show_tag_keys");
                let mut keys: BTreeMap<&str, BTreeSet<&str>> = BTreeMap::new();
                for sample in store.values().filter(|s| in_sources(s, sources)) {
                    keys.entry(sample.measurement())
                        .or_default()
                        .extend(sample.tags().keys().map(String::as_str));
                }
                Ok(keys
                    .into_iter()
                    .filter(|(_, tags)| !tags.is_empty())
                    .map(|(measurement, tags)| Row {
                        name: measurement.to_string(),
                        columns: vec!["tagKey".to_string()],
                        values: tags.into_iter().map(|k| vec![Value::from(k)]).collect(),
                        ..Default::default()
                    })
                    .collect())
            }
            Statement::Select(select) => {
                self.count("select");
                select_raw(select, store, epoch)
            }
        }
    }
}

fn in_sources(sample: &Sample, sources: &[String]) -> bool {
    sources.is_empty() || sources.iter().any(|s| s == sample.measurement())
}

fn select_raw(stmt: &SelectStatement, store: &SeriesStore, epoch: Precision) -> Result<Vec<Row>> {
    if stmt.has_calls() {
        return Err(Error::UnsupportedStatement(
            "aggregate functions are not evaluated by the in-memory shard".to_string(),
        ));
    }
    let dims = stmt.tag_dimensions();
    let group_all = stmt.dimensions.iter().any(|d| matches!(d, Dimension::Wildcard));
    let now = chrono::Utc::now().timestamp_nanos_opt().unwrap_or(i64::MAX);

    let mut groups: BTreeMap<(String, Tags), Vec<&Sample>> = BTreeMap::new();
    for sample in store.values() {
        if !stmt.sources.iter().any(|s| s == sample.measurement()) {
            continue;
        }
        if let Some(cond) = &stmt.condition {
            if eval(cond, sample, now) != Scalar::Bool(true) {
                continue;
            }
        }
        let tags: Tags = sample
            .tags()
            .iter()
            .filter(|(k, _)| group_all || dims.contains(k))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        groups
            .entry((sample.measurement().to_string(), tags))
            .or_default()
            .push(sample);
    }

    let slimit = if stmt.slimit == 0 { usize::MAX } else { stmt.slimit };
    let limit = if stmt.limit == 0 { usize::MAX } else { stmt.limit };
    let mut rows = Vec::new();
    for ((name, tags), mut samples) in groups.into_iter().skip(stmt.soffset).take(slimit) {
        let fields = projected_fields(stmt, &samples);
        samples.sort_by_key(|s| s.timestamp());
        if !stmt.ascending {
            samples.reverse();
        }

        let values: Vec<Vec<Value>> = samples
            .into_iter()
            .filter(|s| fields.iter().any(|f| s.fields().contains_key(f)))
            .skip(stmt.offset)
            .take(limit)
            .map(|s| {
                let mut row = vec![Value::from(epoch.from_nanos(s.timestamp()))];
                row.extend(fields.iter().map(|f| {
                    s.fields().get(f).map(FieldValue::to_json).unwrap_or(Value::Null)
                }));
                row
            })
            .collect();
        if values.is_empty() {
            continue;
        }

        let mut columns = vec!["time".to_string()];
        columns.extend(stmt.fields.iter().flat_map(|f| match &f.expr {
            Expr::Wildcard => fields.clone(),
            _ => vec![f.name()],
        }));
        rows.push(Row {
            name,
            tags,
            columns,
            values,
            partial: false,
        });
    }
    Ok(rows)
}

fn projected_fields(stmt: &SelectStatement, samples: &[&Sample]) -> Vec<String> {
    let mut out = Vec::new();
    for field in &stmt.fields {
        match &field.expr {
            Expr::VarRef { name, .. } => out.push(name.clone()),
            Expr::Wildcard => {
                let all: BTreeSet<&String> = samples.iter().flat_map(|s| s.fields().keys()).collect();
                out.extend(all.into_iter().cloned());
            }
            _ => {}
        }
    }
    out
}

#[derive(Debug, Clone, PartialEq)]
enum Scalar {
    Int(i64),
    Float(f64),
    Str(String),
    Bool(bool),
    Null,
}

impl Scalar {
    fn as_f64(&self) -> Option<f64> {
        match self {
            Scalar::Int(v) => Some(*v as f64),
            Scalar::Float(v) => Some(*v),
            _ => None,
        }
    }
}

fn eval(expr: &Expr, sample: &Sample, now: i64) -> Scalar {
    match expr {
        Expr::VarRef { name, .. } if name == "time" => Scalar::Int(sample.timestamp()),
        Expr::VarRef { name, .. } => match sample.fields().get(name) {
            Some(FieldValue::Float(v)) => Scalar::Float(*v),
            Some(FieldValue::Integer(v)) => Scalar::Int(*v),
            Some(FieldValue::String(v)) => Scalar::Str(v.clone()),
            Some(FieldValue::Boolean(v)) => Scalar::Bool(*v),
            None => sample
                .tags()
                .get(name)
                .map(|v| Scalar::Str(v.clone()))
                .unwrap_or(Scalar::Null),
        },
        Expr::Call { name, .. } if name == "now" => Scalar::Int(now),
        Expr::Number(v) => Scalar::Float(*v),
        Expr::Integer(v) | Expr::Duration(v) => Scalar::Int(*v),
        Expr::String(s) => Scalar::Str(s.clone()),
        Expr::Boolean(b) => Scalar::Bool(*b),
        Expr::Paren(inner) => eval(inner, sample, now),
        Expr::Binary { op, lhs, rhs } => {
            let mut l = eval(lhs, sample, now);
            let mut r = eval(rhs, sample, now);
            // time compared against a string literal reads the literal as RFC3339
            if is_time(lhs) {
                r = time_literal(r);
            }
            if is_time(rhs) {
                l = time_literal(l);
            }
            binary(*op, l, r)
        }
        _ => Scalar::Null,
    }
}

fn is_time(expr: &Expr) -> bool {
    matches!(expr, Expr::VarRef { name, .. } if name == "time")
}

fn time_literal(value: Scalar) -> Scalar {
    match value {
        Scalar::Str(s) => chrono::DateTime::parse_from_rfc3339(&s)
            .ok()
            .and_then(|t| t.timestamp_nanos_opt())
            .map(Scalar::Int)
            .unwrap_or(Scalar::Null),
        other => other,
    }
}

fn binary(op: BinaryOp, l: Scalar, r: Scalar) -> Scalar {
    use std::cmp::Ordering as Cmp;

    match op {
        BinaryOp::And => return Scalar::Bool(l == Scalar::Bool(true) && r == Scalar::Bool(true)),
        BinaryOp::Or => return Scalar::Bool(l == Scalar::Bool(true) || r == Scalar::Bool(true)),
        BinaryOp::Add | BinaryOp::Sub | BinaryOp::Mul | BinaryOp::Div => {
            return match (&l, &r) {
                (Scalar::Int(a), Scalar::Int(b)) => match op {
                    BinaryOp::Add => Scalar::Int(a.saturating_add(*b)),
                    BinaryOp::Sub => Scalar::Int(a.saturating_sub(*b)),
                    BinaryOp::Mul => Scalar::Int(a.saturating_mul(*b)),
                    _ if *b != 0 => Scalar::Int(a / b),
                    _ => Scalar::Null,
                },
                _ => match (l.as_f64(), r.as_f64()) {
                    (Some(a), Some(b)) => Scalar::Float(match op {
                        BinaryOp::Add => a + b,
                        BinaryOp::Sub => a - b,
                        BinaryOp::Mul => a * b,
                        _ => a / b,
                    }),
                    _ => Scalar::Null,
                },
            };
        }
        _ => {}
    }

    let ordering = match (&l, &r) {
        (Scalar::Int(a), Scalar::Int(b)) => Some(a.cmp(b)),
        (Scalar::Str(a), Scalar::Str(b)) => Some(a.cmp(b)),
        (Scalar::Bool(a), Scalar::Bool(b)) => Some(a.cmp(b)),
        _ => match (l.as_f64(), r.as_f64()) {
            (Some(a), Some(b)) => a.partial_cmp(&b),
            _ => None,
        },
    };
    let Some(ordering) = ordering else {
        return Scalar::Bool(false);
    };
    Scalar::Bool(match op {
        BinaryOp::Eq => ordering == Cmp::Equal,
        BinaryOp::Neq => ordering != Cmp::Equal,
        BinaryOp::Lt => ordering == Cmp::Less,
        BinaryOp::Lte => ordering != Cmp::Greater,
        BinaryOp::Gt => ordering == Cmp::Greater,
        BinaryOp::Gte => ordering != Cmp::Less,
        _ => false,
    })
}

#[async_trait]
impl ShardClient for MemoryShard {
    fn addr(&self) -> &str {
        &self.addr
    }

    async fn query(&self, query: &WireQuery) -> Result<QueryResponse> {
        if let Some(pattern) = self.fail_queries.read().as_deref() {
            if query.command.contains(pattern) {
                return Err(Error::ShardRejected {
                    shard: self.addr.clone(),
                    message: "injected query failure".to_string(),
                });
            }
        }

        let parsed = match parse_query(&query.command) {
            Ok(parsed) => parsed,
            Err(e) => {
                return Ok(QueryResponse {
                    results: Vec::new(),
                    error: Some(e.to_string()),
                })
            }
        };

        let results = parsed
            .statements
            .iter()
            .enumerate()
            .map(|(id, stmt)| match self.execute(stmt, &query.database, query.epoch) {
                Ok(series) => StatementResult::with_series(id, series),
                Err(e) => StatementResult::error(id, e),
            })
            .collect();
        Ok(QueryResponse {
            results,
            error: None,
        })
    }

    async fn write(&self, batch: &WriteBatch) -> Result<()> {
        self.count("write");
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(Error::ShardRejected {
                shard: self.addr.clone(),
                message: "injected write failure".to_string(),
            });
        }

        let now = chrono::Utc::now().timestamp_nanos_opt().unwrap_or_default();
        let (samples, err) = line_protocol::parse(&batch.body(), batch.precision, now);
        if let Some(err) = err {
            return Err(Error::ShardRejected {
                shard: self.addr.clone(),
                message: err.to_string(),
            });
        }
        self.insert(&batch.database, samples);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ConsistencyLevel;
    use serde_json::json;

    fn shard() -> MemoryShard {
        let shard = MemoryShard::new("mem-1");
        shard.insert(
            "db",
            vec![
                Sample::builder("cpu").tag("host", "a").field("value", 1.0).timestamp(1_000_000_000).build(),
                Sample::builder("cpu").tag("host", "b").field("value", 2.0).timestamp(2_000_000_000).build(),
                Sample::builder("cpu").tag("host", "a").field("value", 3.0).field("idle", 7i64).timestamp(3_000_000_000).build(),
                Sample::builder("mem").tag("host", "a").field("free", 10i64).timestamp(1_000_000_000).build(),
            ],
        );
        shard
    }

    async fn query(shard: &MemoryShard, q: &str, epoch: Precision) -> StatementResult {
        let resp = shard.query(&WireQuery::new(q, "db", epoch)).await.unwrap();
        resp.results.into_iter().next().unwrap()
    }

    #[tokio::test]
    async fn show_field_and_tag_keys() {
        let shard = shard();
        let fields = query(&shard, "SHOW FIELD KEYS", Precision::Nanosecond).await;
        assert_eq!(fields.series.len(), 2);
        assert_eq!(fields.series[0].name, "cpu");
        assert_eq!(
            fields.series[0].values,
            vec![vec![json!("idle"), json!("integer")], vec![json!("value"), json!("float")]]
        );

        let tags = query(&shard, "SHOW TAG KEYS FROM mem", Precision::Nanosecond).await;
        assert_eq!(tags.series.len(), 1);
        assert_eq!(tags.series[0].values, vec![vec![json!("host")]]);

        assert_eq!(shard.call_count("show_field_keys"), 1);
        assert_eq!(shard.call_count("show_tag_keys"), 1);
    }

    #[tokio::test]
    async fn raw_select_with_condition_and_grouping() {
        let shard = shard();
        let result = query(
            &shard,
            "SELECT value FROM cpu WHERE time >= 2000000000 GROUP BY host",
            Precision::Second,
        )
        .await;

        assert_eq!(result.series.len(), 2);
        assert_eq!(result.series[0].tags.get("host").map(String::as_str), Some("a"));
        assert_eq!(result.series[0].values, vec![vec![json!(3), json!(3.0)]]);
        assert_eq!(result.series[1].values, vec![vec![json!(2), json!(2.0)]]);
    }

    #[tokio::test]
    async fn raw_select_orders_and_limits() {
        let shard = shard();
        let result = query(
            &shard,
            "SELECT value, idle FROM cpu WHERE host = 'a' ORDER BY time DESC LIMIT 1",
            Precision::Nanosecond,
        )
        .await;

        assert_eq!(result.series.len(), 1);
        assert!(result.series[0].tags.is_empty());
        assert_eq!(result.series[0].columns, vec!["time", "value", "idle"]);
        assert_eq!(
            result.series[0].values,
            vec![vec![json!(3_000_000_000i64), json!(3.0), json!(7)]]
        );
    }

    #[tokio::test]
    async fn rfc3339_time_literals() {
        let shard = shard();
        let result = query(
            &shard,
            "SELECT value FROM cpu WHERE time > '1970-01-01T00:00:01Z'",
            Precision::Second,
        )
        .await;
        assert_eq!(result.series[0].values.len(), 2);
    }

    #[tokio::test]
    async fn aggregates_are_statement_errors() {
        let shard = shard();
        let result = query(&shard, "SELECT mean(value) FROM cpu", Precision::Second).await;
        assert!(result.is_error());
    }

    #[tokio::test]
    async fn writes_parse_and_merge_fields() {
        let shard = MemoryShard::new("mem-2");
        let mut batch = WriteBatch::new("db", Precision::Second, ConsistencyLevel::One);
        batch.lines.push("cpu,host=a value=1 5".to_string());
        batch.lines.push("cpu,host=a idle=2i 5".to_string());
        shard.write(&batch).await.unwrap();

        let samples = shard.samples("db");
        assert_eq!(samples.len(), 1);
        assert_eq!(samples[0].timestamp(), 5_000_000_000);
        assert_eq!(samples[0].fields().len(), 2);
        assert_eq!(shard.call_count("write"), 1);
    }

    #[tokio::test]
    async fn injected_failures() {
        let shard = shard();
        shard.fail_queries("mem");
        assert!(shard
            .query(&WireQuery::new("SELECT free FROM mem", "db", Precision::Second))
            .await
            .is_err());
        assert!(shard
            .query(&WireQuery::new("SELECT value FROM cpu", "db", Precision::Second))
            .await
            .is_ok());

        shard.fail_writes(true);
        let batch = WriteBatch::new("db", Precision::Second, ConsistencyLevel::One);
        assert!(shard.write(&batch).await.is_err());

        shard.heal();
        assert!(shard.write(&batch).await.is_ok());
    }
}
