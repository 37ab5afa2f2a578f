//! K-way merge of series cursors

use super::{Point, SeriesCursor};
use std::cmp::Ordering;
use std::collections::BinaryHeap;

/// Merge `cursors` into one stream ordered by series (name, then tags) and, within a
/// series, by time in the requested direction. Points with equal keys keep cursor order.
pub fn merge_sorted(cursors: Vec<SeriesCursor>, ascending: bool) -> SortedMerge {
    SortedMerge::new(cursors, ascending)
}

pub struct SortedMerge {
    cursors: Vec<SeriesCursor>,
    heap: BinaryHeap<Head>,
    ascending: bool,
}

struct Head {
    point: Point,
    cursor: usize,
    ascending: bool,
}

impl Head {
    fn key_cmp(&self, other: &Self) -> Ordering {
        let time = if self.ascending {
            self.point.time.cmp(&other.point.time)
        } else {
            other.point.time.cmp(&self.point.time)
        };
        self.point
            .name
            .cmp(&other.point.name)
            .then_with(|| self.point.tags.cmp(&other.point.tags))
            .then(time)
            .then(self.cursor.cmp(&other.cursor))
    }
}

impl PartialEq for Head {
    fn eq(&self, other: &Self) -> bool {
        self.key_cmp(other) == Ordering::Equal
    }
}

impl Eq for Head {}

impl PartialOrd for Head {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Head {
    // BinaryHeap is a max-heap; invert so the smallest key pops first
    fn cmp(&self, other: &Self) -> Ordering {
        other.key_cmp(self)
    }
}

impl SortedMerge {
    fn new(mut cursors: Vec<SeriesCursor>, ascending: bool) -> Self {
        let mut heap = BinaryHeap::with_capacity(cursors.len());
        for (idx, cursor) in cursors.iter_mut().enumerate() {
            if let Some(point) = cursor.next() {
                heap.push(Head {
                    point,
                    cursor: idx,
                    ascending,
                });
            }
        }
        Self {
            cursors,
            heap,
            ascending,
        }
    }
}

impl Iterator for SortedMerge {
    type Item = Point;

    fn next(&mut self) -> Option<Point> {
        let Head { point, cursor, .. } = self.heap.pop()?;
        if let Some(next) = self.cursors[cursor].next() {
            self.heap.push(Head {
                point: next,
                cursor,
                ascending: self.ascending,
            });
        }
        Some(point)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Tags;

    fn cursor(name: &str, host: &str, times: &[i64]) -> SeriesCursor {
        let mut tags = Tags::new();
        tags.insert("host".to_string(), host.to_string());
        let points = times
            .iter()
            .map(|t| Point::new(name, tags.clone(), *t, *t as f64))
            .collect();
        SeriesCursor::new(name, tags, points)
    }

    #[test]
    fn interleaves_shards_by_time() {
        let merged: Vec<i64> = merge_sorted(
            vec![cursor("cpu", "a", &[1, 4, 6]), cursor("cpu", "a", &[2, 3, 5])],
            true,
        )
        .map(|p| p.time)
        .collect();
        assert_eq!(merged, vec![1, 2, 3, 4, 5, 6]);
    }

    #[test]
    fn groups_series_before_time() {
        let merged: Vec<(String, i64)> = merge_sorted(
            vec![cursor("cpu", "b", &[1, 2]), cursor("cpu", "a", &[3]), cursor("mem", "a", &[0])],
            true,
        )
        .map(|p| (p.tags["host"].clone() + "/" + &p.name, p.time))
        .collect();
        assert_eq!(
            merged,
            vec![
                ("a/cpu".to_string(), 3),
                ("b/cpu".to_string(), 1),
                ("b/cpu".to_string(), 2),
                ("a/mem".to_string(), 0),
            ]
        );
    }

    #[test]
    fn descending_order() {
        let merged: Vec<i64> = merge_sorted(
            vec![cursor("cpu", "a", &[6, 4, 1]), cursor("cpu", "a", &[5, 3, 2])],
            false,
        )
        .map(|p| p.time)
        .collect();
        assert_eq!(merged, vec![6, 5, 4, 3, 2, 1]);
    }

    #[test]
    fn empty_input() {
        assert_eq!(merge_sorted(Vec::new(), true).count(), 0);
    }
}
