use crate::model::Tags;

/// One decoded sample flowing through the runtime.
///
/// `value` is set for single-expression reads; `aux` holds one entry per requested
/// auxiliary field, `None` where the shard returned null.
#[derive(Debug, Clone, PartialEq)]
pub struct Point {
    pub name: String,
    pub tags: Tags,
    /// Nanoseconds since the Unix epoch
    pub time: i64,
    pub value: f64,
    pub aux: Vec<Option<f64>>,
}

impl Point {
    pub fn new(name: impl Into<String>, tags: Tags, time: i64, value: f64) -> Self {
        Self {
            name: name.into(),
            tags,
            time,
            value,
            aux: Vec::new(),
        }
    }

    pub fn with_aux(name: impl Into<String>, tags: Tags, time: i64, aux: Vec<Option<f64>>) -> Self {
        Self {
            name: name.into(),
            tags,
            time,
            value: aux.first().copied().flatten().unwrap_or_default(),
            aux,
        }
    }
}

/// Forward-only cursor over one series' pre-materialized points.
///
/// The whole sub-query result is decoded before the cursor is built, so closing it
/// releases nothing.
#[derive(Debug)]
pub struct SeriesCursor {
    name: String,
    tags: Tags,
    points: std::vec::IntoIter<Point>,
}

impl SeriesCursor {
    pub fn new(name: impl Into<String>, tags: Tags, points: Vec<Point>) -> Self {
        Self {
            name: name.into(),
            tags,
            points: points.into_iter(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn tags(&self) -> &Tags {
        &self.tags
    }

    /// Points not yet consumed
    pub fn remaining(&self) -> usize {
        self.points.len()
    }

    pub fn close(self) {}
}

impl Iterator for SeriesCursor {
    type Item = Point;

    fn next(&mut self) -> Option<Point> {
        self.points.next()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cursor_is_single_pass() {
        let points = vec![
            Point::new("cpu", Tags::new(), 1, 1.0),
            Point::new("cpu", Tags::new(), 2, 2.0),
        ];
        let mut cursor = SeriesCursor::new("cpu", Tags::new(), points);

        assert_eq!(cursor.remaining(), 2);
        assert_eq!(cursor.next().map(|p| p.time), Some(1));
        assert_eq!(cursor.next().map(|p| p.time), Some(2));
        assert!(cursor.next().is_none());
        assert!(cursor.next().is_none());
        cursor.close();
    }

    #[test]
    fn aux_point_takes_first_value() {
        let p = Point::with_aux("cpu", Tags::new(), 5, vec![None, Some(3.0)]);
        assert_eq!(p.value, 0.0);
        let p = Point::with_aux("cpu", Tags::new(), 5, vec![Some(7.5), None]);
        assert_eq!(p.value, 7.5);
    }
}
