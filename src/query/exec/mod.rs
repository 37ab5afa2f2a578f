//! Execution runtime
//!
//! Pulls raw series from [`SampleSource`]s, merges them in series/time order, applies
//! aggregates and shapes the output into result rows.

mod call;
mod emitter;
mod merge;
mod point;
mod rewrite;
mod source;

pub use call::{Aggregate, CallReducer, ReducedSeries};
pub use emitter::{EmittedRows, Emitter, GroupedSeries, SeriesRows};
pub use merge::{merge_sorted, SortedMerge};
pub use point::{Point, SeriesCursor};
pub use rewrite::rewrite_fields;
pub use source::{FieldDimensions, SampleSource, SourceSet};

use super::ast::{Expr, Fill};

/// Read request handed to a [`SampleSource`]
#[derive(Debug, Clone, PartialEq)]
pub struct IteratorOptions {
    /// Single projected expression; ignored when `aux` is non-empty
    pub expr: Option<Expr>,
    /// Auxiliary fields, one output value each, in order
    pub aux: Vec<Expr>,
    pub sources: Vec<String>,
    pub condition: Option<Expr>,
    /// Tag dimensions to group by
    pub dimensions: Vec<String>,
    /// GROUP BY time() interval in nanoseconds
    pub interval: Option<i64>,
    pub fill: Fill,
    pub ascending: bool,
    pub limit: usize,
    pub offset: usize,
    pub slimit: usize,
    pub soffset: usize,
}

impl Default for IteratorOptions {
    fn default() -> Self {
        Self {
            expr: None,
            aux: Vec::new(),
            sources: Vec::new(),
            condition: None,
            dimensions: Vec::new(),
            interval: None,
            fill: Fill::Null,
            ascending: true,
            limit: 0,
            offset: 0,
            slimit: 0,
            soffset: 0,
        }
    }
}
