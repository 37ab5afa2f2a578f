//! Read-path telemetry instruments and recording helpers.

use opentelemetry::global;
use opentelemetry::metrics::{Counter, Histogram};
use opentelemetry::KeyValue;
use std::sync::OnceLock;

struct QueryInstruments {
    statements: Counter<u64>,
    statement_duration_seconds: Histogram<f64>,
    rows_returned: Histogram<u64>,
    sub_queries: Counter<u64>,
    schema_discoveries: Counter<u64>,
}

fn instruments() -> &'static QueryInstruments {
    static INSTRUMENTS: OnceLock<QueryInstruments> = OnceLock::new();
    INSTRUMENTS.get_or_init(|| {
        let meter = global::meter("fluxgate.query");
        QueryInstruments {
            statements: meter
                .u64_counter("fluxgate.query.statements")
                .with_description("Federated statements by kind and outcome")
                .init(),
            statement_duration_seconds: meter
                .f64_histogram("fluxgate.query.statement.duration")
                .with_description("Federated statement latency")
                .with_unit("s")
                .init(),
            rows_returned: meter
                .u64_histogram("fluxgate.query.rows_returned")
                .with_description("Rows emitted per statement")
                .init(),
            sub_queries: meter
                .u64_counter("fluxgate.query.sub_queries")
                .with_description("Sub-queries sent to shards by outcome")
                .init(),
            schema_discoveries: meter
                .u64_counter("fluxgate.query.schema_discoveries")
                .with_description("Schema discovery round trips by outcome")
                .init(),
        }
    })
}

pub struct StatementMetrics {
    pub kind: &'static str,
    pub outcome: &'static str,
    pub duration_seconds: f64,
    pub rows_returned: u64,
}

pub fn record_statement(metrics: StatementMetrics) {
    let i = instruments();
    let attrs = [
        KeyValue::new("kind", metrics.kind),
        KeyValue::new("outcome", metrics.outcome),
    ];
    i.statements.add(1, &attrs);
    i.statement_duration_seconds.record(metrics.duration_seconds, &attrs);
    i.rows_returned.record(metrics.rows_returned, &attrs);
}

pub fn record_sub_query(shard: &str, outcome: &'static str) {
    instruments().sub_queries.add(
        1,
        &[
            KeyValue::new("shard", shard.to_string()),
            KeyValue::new("outcome", outcome),
        ],
    );
}

pub fn record_schema_discovery(outcome: &'static str) {
    instruments()
        .schema_discoveries
        .add(1, &[KeyValue::new("outcome", outcome)]);
}
