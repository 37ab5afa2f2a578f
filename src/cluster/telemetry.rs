//! Write-path telemetry instruments and recording helpers.

use opentelemetry::global;
use opentelemetry::metrics::{Counter, Histogram};
use opentelemetry::KeyValue;
use std::sync::OnceLock;

struct WriteInstruments {
    batches: Counter<u64>,
    batch_points: Histogram<u64>,
    dropped_samples: Counter<u64>,
}

fn instruments() -> &'static WriteInstruments {
    static INSTRUMENTS: OnceLock<WriteInstruments> = OnceLock::new();
    INSTRUMENTS.get_or_init(|| {
        let meter = global::meter("fluxgate.write");
        WriteInstruments {
            batches: meter
                .u64_counter("fluxgate.write.batches")
                .with_description("Per-shard write batches by outcome")
                .init(),
            batch_points: meter
                .u64_histogram("fluxgate.write.batch_points")
                .with_description("Points per shard write batch")
                .init(),
            dropped_samples: meter
                .u64_counter("fluxgate.write.dropped_samples")
                .with_description("Samples dropped before dispatch by reason")
                .init(),
        }
    })
}

pub fn record_batch(shard: &str, outcome: &'static str, points: usize) {
    let i = instruments();
    let attrs = [
        KeyValue::new("shard", shard.to_string()),
        KeyValue::new("outcome", outcome),
    ];
    i.batches.add(1, &attrs);
    i.batch_points.record(points as u64, &attrs);
}

pub fn record_dropped(reason: &'static str, count: usize) {
    if count == 0 {
        return;
    }
    instruments()
        .dropped_samples
        .add(count as u64, &[KeyValue::new("reason", reason)]);
}
