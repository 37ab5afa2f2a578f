//! Aggregate evaluation over merged raw points

use super::Point;
use crate::model::Tags;
use crate::query::ast::{Fill, TimeRange};
use crate::{Error, Result};

/// Supported aggregate functions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Aggregate {
    Count,
    Sum,
    Mean,
    Min,
    Max,
    First,
    Last,
    Spread,
}

impl Aggregate {
    pub fn from_name(name: &str) -> Option<Self> {
        Some(match name.to_ascii_lowercase().as_str() {
            "count" => Aggregate::Count,
            "sum" => Aggregate::Sum,
            "mean" => Aggregate::Mean,
            "min" => Aggregate::Min,
            "max" => Aggregate::Max,
            "first" => Aggregate::First,
            "last" => Aggregate::Last,
            "spread" => Aggregate::Spread,
            _ => return None,
        })
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Aggregate::Count => "count",
            Aggregate::Sum => "sum",
            Aggregate::Mean => "mean",
            Aggregate::Min => "min",
            Aggregate::Max => "max",
            Aggregate::First => "first",
            Aggregate::Last => "last",
            Aggregate::Spread => "spread",
        }
    }
}

/// Aggregated output for one series: `(window start, value)` in ascending time
#[derive(Debug, Clone, PartialEq)]
pub struct ReducedSeries {
    pub name: String,
    pub tags: Tags,
    pub values: Vec<(i64, Option<f64>)>,
}

#[derive(Debug, Clone, Copy)]
struct Accumulator {
    count: u64,
    sum: f64,
    min: f64,
    max: f64,
    first: f64,
    last: f64,
}

impl Accumulator {
    fn new(v: f64) -> Self {
        Self {
            count: 1,
            sum: v,
            min: v,
            max: v,
            first: v,
            last: v,
        }
    }

    fn push(&mut self, v: f64) {
        self.count += 1;
        self.sum += v;
        self.min = self.min.min(v);
        self.max = self.max.max(v);
        self.last = v;
    }

    fn finish(&self, aggregate: Aggregate) -> f64 {
        match aggregate {
            Aggregate::Count => self.count as f64,
            Aggregate::Sum => self.sum,
            Aggregate::Mean => self.sum / self.count as f64,
            Aggregate::Min => self.min,
            Aggregate::Max => self.max,
            Aggregate::First => self.first,
            Aggregate::Last => self.last,
            Aggregate::Spread => self.max - self.min,
        }
    }
}

/// Applies one aggregate per (series, time window).
///
/// Input must be ordered by series and ascending time, as produced by an ascending
/// [`merge_sorted`](super::merge_sorted). Without an interval each series reduces to
/// a single value stamped at time zero. With one, filled windows span the statement's
/// time bounds where the WHERE clause gives them and the series' own extent otherwise.
#[derive(Debug, Clone)]
pub struct CallReducer {
    aggregate: Aggregate,
    interval: Option<i64>,
    fill: Fill,
    range: TimeRange,
    /// Zero means unlimited
    max_buckets: usize,
}

impl CallReducer {
    pub fn new(aggregate: Aggregate, interval: Option<i64>, fill: Fill) -> Self {
        Self {
            aggregate,
            interval: interval.filter(|i| *i > 0),
            fill,
            range: TimeRange::default(),
            max_buckets: 0,
        }
    }

    pub fn with_range(mut self, range: TimeRange) -> Self {
        self.range = range;
        self
    }

    pub fn with_max_buckets(mut self, max_buckets: usize) -> Self {
        self.max_buckets = max_buckets;
        self
    }

    pub fn reduce(&self, points: impl IntoIterator<Item = Point>) -> Result<Vec<ReducedSeries>> {
        let mut out = Vec::new();
        let mut current: Option<(String, Tags, Vec<(i64, Accumulator)>)> = None;

        for point in points {
            let window = self.window_start(point.time)?;
            match current.as_mut() {
                Some((name, tags, windows)) if *name == point.name && *tags == point.tags => {
                    match windows.last_mut() {
                        Some((start, acc)) if *start == window => acc.push(point.value),
                        _ => windows.push((window, Accumulator::new(point.value))),
                    }
                }
                _ => {
                    if let Some((name, tags, windows)) = current.take() {
                        out.push(self.finish_series(name, tags, windows)?);
                    }
                    current = Some((point.name, point.tags, vec![(window, Accumulator::new(point.value))]));
                }
            }
        }
        if let Some((name, tags, windows)) = current {
            out.push(self.finish_series(name, tags, windows)?);
        }
        Ok(out)
    }

    fn window_start(&self, time: i64) -> Result<i64> {
        match self.interval {
            Some(interval) => time
                .div_euclid(interval)
                .checked_mul(interval)
                .ok_or_else(|| Error::Query(format!("time {} has no time({}) window", time, interval))),
            None => Ok(0),
        }
    }

    fn finish_series(&self, name: String, tags: Tags, windows: Vec<(i64, Accumulator)>) -> Result<ReducedSeries> {
        let computed: Vec<(i64, f64)> = windows
            .into_iter()
            .map(|(start, acc)| (start, acc.finish(self.aggregate)))
            .collect();

        let values = match self.interval {
            Some(interval) => self.fill_gaps(&computed, interval)?,
            None => computed.into_iter().map(|(t, v)| (t, Some(v))).collect(),
        };
        Ok(ReducedSeries { name, tags, values })
    }

    /// Number of windows in `[start, end]`, rejected past `max_buckets`
    fn bucket_count(&self, start: i64, end: i64, interval: i64) -> Result<usize> {
        let buckets = end
            .checked_sub(start)
            .map(|span| span / interval)
            .and_then(|n| n.checked_add(1))
            .and_then(|n| usize::try_from(n).ok())
            .ok_or_else(|| Error::Query(format!("time range {} to {} overflows time() windows", start, end)))?;
        if self.max_buckets > 0 && buckets > self.max_buckets {
            return Err(Error::Query(format!(
                "max-select-buckets limit exceeded: ({}/{})",
                buckets, self.max_buckets
            )));
        }
        Ok(buckets)
    }

    fn fill_gaps(&self, computed: &[(i64, f64)], interval: i64) -> Result<Vec<(i64, Option<f64>)>> {
        let (Some(&(first, _)), Some(&(last, _))) = (computed.first(), computed.last()) else {
            return Ok(Vec::new());
        };
        let start = match self.range.min {
            Some(min) => self.window_start(min)?,
            None => first,
        };
        let end = match self.range.max {
            Some(max) => self.window_start(max)?,
            None => last,
        };
        if end < start {
            return Ok(Vec::new());
        }
        self.bucket_count(start, end, interval)?;

        if self.fill == Fill::None {
            return Ok(computed
                .iter()
                .filter(|(t, _)| (start..=end).contains(t))
                .map(|(t, v)| (*t, Some(*v)))
                .collect());
        }

        let mut values = Vec::with_capacity(computed.len());
        let mut known = computed.iter().peekable();
        let mut previous: Option<f64> = None;
        let mut time = start;
        loop {
            while let Some((_, v)) = known.next_if(|(t, _)| *t < time) {
                previous = Some(*v);
            }
            let value = match known.next_if(|(t, _)| *t == time) {
                Some((_, v)) => {
                    previous = Some(*v);
                    Some(*v)
                }
                None => match self.fill {
                    Fill::Null | Fill::None => None,
                    Fill::Previous => previous,
                    Fill::Number(n) => Some(n),
                },
            };
            values.push((time, value));
            match time.checked_add(interval) {
                Some(next) if next <= end => time = next,
                _ => break,
            }
        }
        Ok(values)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn points(series: &[(&str, i64, f64)]) -> Vec<Point> {
        series
            .iter()
            .map(|(name, t, v)| Point::new(*name, Tags::new(), *t, *v))
            .collect()
    }

    #[test]
    fn reduces_whole_series_without_interval() {
        let input = points(&[("cpu", 1, 2.0), ("cpu", 2, 4.0), ("cpu", 3, 9.0), ("mem", 1, 5.0)]);

        let mean = CallReducer::new(Aggregate::Mean, None, Fill::Null).reduce(input.clone()).unwrap();
        assert_eq!(mean.len(), 2);
        assert_eq!(mean[0].values, vec![(0, Some(5.0))]);
        assert_eq!(mean[1].values, vec![(0, Some(5.0))]);

        let spread = CallReducer::new(Aggregate::Spread, None, Fill::Null).reduce(input.clone()).unwrap();
        assert_eq!(spread[0].values, vec![(0, Some(7.0))]);

        let first = CallReducer::new(Aggregate::First, None, Fill::Null).reduce(input.clone()).unwrap();
        let last = CallReducer::new(Aggregate::Last, None, Fill::Null).reduce(input).unwrap();
        assert_eq!(first[0].values[0].1, Some(2.0));
        assert_eq!(last[0].values[0].1, Some(9.0));
    }

    #[test]
    fn windows_and_fill_policies() {
        // windows 0 and 30 have data, 10 and 20 are empty
        let input = points(&[("cpu", 1, 1.0), ("cpu", 5, 3.0), ("cpu", 31, 8.0)]);

        let null = CallReducer::new(Aggregate::Sum, Some(10), Fill::Null).reduce(input.clone()).unwrap();
        assert_eq!(
            null[0].values,
            vec![(0, Some(4.0)), (10, None), (20, None), (30, Some(8.0))]
        );

        let none = CallReducer::new(Aggregate::Sum, Some(10), Fill::None).reduce(input.clone()).unwrap();
        assert_eq!(none[0].values, vec![(0, Some(4.0)), (30, Some(8.0))]);

        let prev = CallReducer::new(Aggregate::Count, Some(10), Fill::Previous).reduce(input.clone()).unwrap();
        assert_eq!(
            prev[0].values,
            vec![(0, Some(2.0)), (10, Some(2.0)), (20, Some(2.0)), (30, Some(1.0))]
        );

        let num = CallReducer::new(Aggregate::Max, Some(10), Fill::Number(-1.0)).reduce(input).unwrap();
        assert_eq!(
            num[0].values,
            vec![(0, Some(3.0)), (10, Some(-1.0)), (20, Some(-1.0)), (30, Some(8.0))]
        );
    }

    #[test]
    fn negative_times_align_to_window_start() {
        let input = points(&[("cpu", -5, 1.0)]);
        let out = CallReducer::new(Aggregate::Min, Some(10), Fill::Null).reduce(input).unwrap();
        assert_eq!(out[0].values, vec![(-10, Some(1.0))]);
    }

    #[test]
    fn too_many_windows_is_a_query_error() {
        const SEC: i64 = 1_000_000_000;
        let input = points(&[("cpu", 0, 1.0), ("cpu", 1_000 * SEC, 2.0)]);

        let err = CallReducer::new(Aggregate::Count, Some(1_000_000), Fill::Null)
            .with_max_buckets(100_000)
            .reduce(input.clone())
            .unwrap_err();
        assert!(matches!(err, Error::Query(_)));
        assert!(err.to_string().contains("(1000001/100000)"), "{}", err);

        // a 1ns interval must fail fast rather than allocate every window
        let input = points(&[("cpu", 0, 1.0), ("cpu", 10 * SEC, 2.0)]);
        let result = CallReducer::new(Aggregate::Count, Some(1), Fill::Null)
            .with_max_buckets(100_000)
            .reduce(input.clone());
        assert!(result.is_err());

        // fill(none) is bounded by the same limit
        let result = CallReducer::new(Aggregate::Count, Some(1), Fill::None)
            .with_max_buckets(100_000)
            .reduce(input);
        assert!(result.is_err());
    }

    #[test]
    fn extreme_times_do_not_overflow() {
        const HOUR: i64 = 3_600_000_000_000;
        let input = points(&[("cpu", -9_000_000_000_000_000_000, 1.0), ("cpu", 9_000_000_000_000_000_000, 2.0)]);
        let result = CallReducer::new(Aggregate::Count, Some(HOUR), Fill::Null).reduce(input);
        assert!(matches!(result, Err(Error::Query(_))));

        let input = points(&[("cpu", i64::MIN, 1.0)]);
        let result = CallReducer::new(Aggregate::Count, Some(7), Fill::Null).reduce(input);
        assert!(matches!(result, Err(Error::Query(_))));
    }

    #[test]
    fn fill_spans_the_statement_time_range() {
        let input = points(&[("cpu", 15, 1.0), ("cpu", 17, 2.0)]);
        let range = TimeRange {
            min: Some(0),
            max: Some(39),
        };

        let out = CallReducer::new(Aggregate::Sum, Some(10), Fill::Number(0.0))
            .with_range(range)
            .reduce(input.clone())
            .unwrap();
        assert_eq!(
            out[0].values,
            vec![(0, Some(0.0)), (10, Some(3.0)), (20, Some(0.0)), (30, Some(0.0))]
        );

        // a narrower range clamps the windows that are emitted
        let out = CallReducer::new(Aggregate::Sum, Some(10), Fill::Null)
            .with_range(TimeRange {
                min: Some(10),
                max: Some(19),
            })
            .reduce(input)
            .unwrap();
        assert_eq!(out[0].values, vec![(10, Some(3.0))]);
    }

    #[test]
    fn parses_function_names() {
        assert_eq!(Aggregate::from_name("MEAN"), Some(Aggregate::Mean));
        assert_eq!(Aggregate::from_name("median"), None);
    }
}
