//! Folds streamed statement chunks into one result per statement

use super::result::StatementResult;
use tokio::sync::mpsc;

/// Accumulates result chunks in arrival order.
///
/// Chunks for one statement id must arrive contiguously. Adjacent chunks of the same
/// series are joined, and an error chunk replaces whatever the statement had so far.
#[derive(Debug, Default)]
pub struct ResultCoalescer {
    results: Vec<StatementResult>,
}

impl ResultCoalescer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, chunk: StatementResult) {
        let Some(last) = self
            .results
            .last_mut()
            .filter(|last| last.statement_id == chunk.statement_id)
        else {
            self.results.push(chunk);
            return;
        };

        if chunk.error.is_some() {
            *last = chunk;
            return;
        }
        if last.error.is_some() {
            return;
        }

        let mut incoming = chunk.series.into_iter().peekable();
        if let Some(tail) = last.series.last_mut() {
            while let Some(next) = incoming.next_if(|row| row.same_series(tail)) {
                tail.values.extend(next.values);
                tail.partial = next.partial;
            }
        }
        last.series.extend(incoming);
        last.messages.extend(chunk.messages);
    }

    /// Drain a chunk stream until the producer closes it
    pub async fn collect(mut self, mut rx: mpsc::Receiver<StatementResult>) -> Vec<StatementResult> {
        while let Some(chunk) = rx.recv().await {
            self.push(chunk);
        }
        self.finish()
    }

    pub fn finish(self) -> Vec<StatementResult> {
        self.results
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::result::Row;
    use serde_json::json;

    fn chunk(stmt: usize, name: &str, t: i64) -> StatementResult {
        StatementResult::with_series(
            stmt,
            vec![Row {
                name: name.to_string(),
                columns: vec!["time".to_string(), "value".to_string()],
                values: vec![vec![json!(t), json!(1.5)]],
                ..Default::default()
            }],
        )
    }

    #[test]
    fn joins_adjacent_same_series() {
        let mut c = ResultCoalescer::new();
        c.push(chunk(0, "cpu", 1));
        c.push(chunk(0, "cpu", 2));
        c.push(chunk(0, "mem", 3));

        let results = c.finish();
        assert_eq!(results.len(), 1);
        let series = &results[0].series;
        assert_eq!(series.len(), 2);
        assert_eq!(series[0].name, "cpu");
        assert_eq!(series[0].values.len(), 2);
        assert_eq!(series[1].name, "mem");
    }

    #[test]
    fn error_replaces_statement_and_new_ids_start_new_results() {
        let mut c = ResultCoalescer::new();
        c.push(chunk(0, "cpu", 1));
        c.push(StatementResult::error(0, "boom"));
        c.push(chunk(0, "cpu", 2));
        c.push(chunk(1, "cpu", 3));

        let results = c.finish();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].error.as_deref(), Some("boom"));
        assert!(results[0].series.is_empty());
        assert_eq!(results[1].statement_id, 1);
        assert_eq!(results[1].series[0].values.len(), 1);
    }

    #[test]
    fn partial_flag_follows_last_chunk() {
        let mut first = chunk(0, "cpu", 1);
        first.series[0].partial = true;

        let mut c = ResultCoalescer::new();
        c.push(first);
        c.push(chunk(0, "cpu", 2));
        assert!(!c.finish()[0].series[0].partial);
    }

    #[tokio::test]
    async fn collects_from_channel() {
        let (tx, rx) = mpsc::channel(4);
        tokio::spawn(async move {
            for t in 0..3 {
                if tx.send(chunk(0, "cpu", t)).await.is_err() {
                    break;
                }
            }
        });

        let results = ResultCoalescer::new().collect(rx).await;
        assert_eq!(results[0].series[0].values.len(), 3);
    }
}
