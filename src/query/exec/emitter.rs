//! Shapes merged series into result rows
//!
//! Both stages are lazy iterators: one output series is materialized at a time and
//! each chunk is rendered only when the caller pulls it.

use super::Point;
use crate::model::Tags;
use crate::query::result::Row;
use serde_json::Value;
use std::iter::{Peekable, Skip, Take};

/// Rows of one output series before rendering: `(time, one value per field column)`
#[derive(Debug, Clone, PartialEq)]
pub struct SeriesRows {
    pub name: String,
    pub tags: Tags,
    pub rows: Vec<(i64, Vec<Option<f64>>)>,
}

impl SeriesRows {
    /// Group a series-ordered point stream into one entry per series, using each
    /// point's aux values as the row.
    pub fn group<I: IntoIterator<Item = Point>>(points: I) -> GroupedSeries<I::IntoIter> {
        GroupedSeries {
            points: points.into_iter().peekable(),
        }
    }
}

/// Iterator returned by [`SeriesRows::group`]
pub struct GroupedSeries<I: Iterator<Item = Point>> {
    points: Peekable<I>,
}

impl<I: Iterator<Item = Point>> Iterator for GroupedSeries<I> {
    type Item = SeriesRows;

    fn next(&mut self) -> Option<SeriesRows> {
        let first = self.points.next()?;
        let mut series = SeriesRows {
            name: first.name,
            tags: first.tags,
            rows: vec![(first.time, first.aux)],
        };
        while let Some(point) = self
            .points
            .next_if(|p| p.name == series.name && p.tags == series.tags)
        {
            series.rows.push((point.time, point.aux));
        }
        Some(series)
    }
}

/// Applies series and row limits and renders rows, splitting a series into chunks
/// of at most `chunk_size` rows when set.
#[derive(Debug, Clone)]
pub struct Emitter {
    columns: Vec<String>,
    limit: usize,
    offset: usize,
    slimit: usize,
    soffset: usize,
    chunk_size: usize,
}

impl Emitter {
    pub fn new(columns: Vec<String>) -> Self {
        Self {
            columns,
            limit: 0,
            offset: 0,
            slimit: 0,
            soffset: 0,
            chunk_size: 0,
        }
    }

    /// Per-series row limit and offset; zero limit means unlimited
    pub fn with_limit(mut self, limit: usize, offset: usize) -> Self {
        self.limit = limit;
        self.offset = offset;
        self
    }

    pub fn with_series_limit(mut self, slimit: usize, soffset: usize) -> Self {
        self.slimit = slimit;
        self.soffset = soffset;
        self
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    /// Rows are produced on demand; series past `SLIMIT` are never pulled.
    pub fn emit<I: IntoIterator<Item = SeriesRows>>(&self, series: I) -> EmittedRows<I::IntoIter> {
        let slimit = if self.slimit == 0 { usize::MAX } else { self.slimit };
        EmittedRows {
            series: series.into_iter().skip(self.soffset).take(slimit),
            columns: self.columns.clone(),
            offset: self.offset,
            limit: if self.limit == 0 { usize::MAX } else { self.limit },
            chunk_size: self.chunk_size,
            current: None,
        }
    }
}

struct PendingSeries {
    name: String,
    tags: Tags,
    rows: Skip<std::vec::IntoIter<(i64, Vec<Option<f64>>)>>,
    remaining: usize,
}

/// Iterator returned by [`Emitter::emit`]
pub struct EmittedRows<I: Iterator<Item = SeriesRows>> {
    series: Take<Skip<I>>,
    columns: Vec<String>,
    offset: usize,
    limit: usize,
    chunk_size: usize,
    current: Option<PendingSeries>,
}

impl<I: Iterator<Item = SeriesRows>> Iterator for EmittedRows<I> {
    type Item = Row;

    fn next(&mut self) -> Option<Row> {
        loop {
            if let Some(pending) = self.current.as_mut() {
                if pending.remaining > 0 {
                    let take = match self.chunk_size {
                        0 => pending.remaining,
                        size => size.min(pending.remaining),
                    };
                    pending.remaining -= take;
                    let values = pending.rows.by_ref().take(take).map(render_row).collect();
                    return Some(Row {
                        name: pending.name.clone(),
                        tags: pending.tags.clone(),
                        columns: self.columns.clone(),
                        values,
                        partial: pending.remaining > 0,
                    });
                }
                self.current = None;
            }

            let s = self.series.next()?;
            let remaining = s.rows.len().saturating_sub(self.offset).min(self.limit);
            self.current = Some(PendingSeries {
                name: s.name,
                tags: s.tags,
                rows: s.rows.into_iter().skip(self.offset),
                remaining,
            });
        }
    }
}

fn render_row((time, fields): (i64, Vec<Option<f64>>)) -> Vec<Value> {
    let mut row = Vec::with_capacity(fields.len() + 1);
    row.push(Value::from(time));
    row.extend(fields.into_iter().map(render_value));
    row
}

const MAX_EXACT_INTEGER: f64 = 9_007_199_254_740_992.0;

/// Integral floats render as JSON integers, matching how shards encode them
fn render_value(value: Option<f64>) -> Value {
    match value {
        Some(v) if v.fract() == 0.0 && v.abs() < MAX_EXACT_INTEGER => Value::from(v as i64),
        Some(v) => serde_json::Number::from_f64(v)
            .map(Value::Number)
            .unwrap_or(Value::Null),
        None => Value::Null,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn series(name: &str, times: &[i64]) -> SeriesRows {
        SeriesRows {
            name: name.to_string(),
            tags: Tags::new(),
            rows: times.iter().map(|t| (*t, vec![Some(*t as f64 + 0.5)])).collect(),
        }
    }

    fn columns() -> Vec<String> {
        vec!["time".to_string(), "value".to_string()]
    }

    #[test]
    fn applies_offset_and_limit_per_series() {
        let rows = Emitter::new(columns())
            .with_limit(2, 1)
            .emit(vec![series("cpu", &[1, 2, 3, 4]), series("mem", &[1])])
            .collect::<Vec<_>>();

        // mem has nothing left after the offset
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].values, vec![vec![json!(2), json!(2.5)], vec![json!(3), json!(3.5)]]);
    }

    #[test]
    fn applies_series_limits() {
        let rows = Emitter::new(columns())
            .with_series_limit(1, 1)
            .emit(vec![series("a", &[1]), series("b", &[1]), series("c", &[1])])
            .collect::<Vec<_>>();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].name, "b");
    }

    #[test]
    fn splits_into_partial_chunks() {
        let rows = Emitter::new(columns())
            .with_chunk_size(2)
            .emit(vec![series("cpu", &[1, 2, 3, 4, 5])])
            .collect::<Vec<_>>();

        assert_eq!(rows.len(), 3);
        assert!(rows[0].partial && rows[1].partial && !rows[2].partial);
        assert_eq!(rows[2].values.len(), 1);
    }

    #[test]
    fn pulls_series_only_as_rows_are_consumed() {
        let pulled = std::cell::Cell::new(0);
        let source = (0..1_000).map(|i| {
            pulled.set(pulled.get() + 1);
            series(&format!("s{}", i), &[1, 2, 3])
        });

        let mut rows = Emitter::new(columns()).with_chunk_size(2).emit(source);
        let first = rows.next().unwrap();
        assert_eq!(first.name, "s0");
        assert!(first.partial);
        assert_eq!(pulled.get(), 1);

        let second = rows.next().unwrap();
        assert_eq!(second.name, "s0");
        assert!(!second.partial);
        assert_eq!(rows.next().unwrap().name, "s1");
        assert_eq!(pulled.get(), 2);
    }

    #[test]
    fn renders_nulls_and_integral_values() {
        assert_eq!(render_value(None), Value::Null);
        assert_eq!(render_value(Some(3.0)), json!(3));
        assert_eq!(render_value(Some(f64::NAN)), Value::Null);
    }

    #[test]
    fn groups_points_by_series() {
        let points = vec![
            Point::with_aux("cpu", Tags::new(), 1, vec![Some(1.0)]),
            Point::with_aux("cpu", Tags::new(), 2, vec![None]),
            Point::with_aux("mem", Tags::new(), 1, vec![Some(4.0)]),
        ];
        let grouped: Vec<_> = SeriesRows::group(points).collect();
        assert_eq!(grouped.len(), 2);
        assert_eq!(grouped[0].rows, vec![(1, vec![Some(1.0)]), (2, vec![None])]);
    }
}
