//! Leaf data-source contract and the fan-out composite over all shards

use super::{IteratorOptions, SeriesCursor};
use crate::model::DataType;
use crate::Result;
use async_trait::async_trait;
use futures::future::try_join_all;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

/// Field types and dimension names for a set of measurements
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FieldDimensions {
    pub fields: BTreeMap<String, DataType>,
    pub dimensions: BTreeSet<String>,
}

impl FieldDimensions {
    /// Merge `other` into `self`. On a field type conflict the first type seen is kept.
    pub fn union(&mut self, other: FieldDimensions) {
        for (name, data_type) in other.fields {
            self.fields.entry(name).or_insert(data_type);
        }
        self.dimensions.extend(other.dimensions);
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty() && self.dimensions.is_empty()
    }
}

/// A source the runtime pulls raw series from
#[async_trait]
pub trait SampleSource: Send + Sync {
    /// Field types and dimension names across `sources`
    async fn schema(&self, sources: &[String]) -> Result<FieldDimensions>;

    /// Execute a read and return one cursor per returned series
    async fn open(&self, options: &IteratorOptions) -> Result<Vec<SeriesCursor>>;
}

/// Union of per-shard sources. Every call fans out to all members concurrently and
/// fails if any member fails.
pub struct SourceSet {
    sources: Vec<Arc<dyn SampleSource>>,
}

impl SourceSet {
    pub fn new(sources: Vec<Arc<dyn SampleSource>>) -> Self {
        Self { sources }
    }

    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }
}

#[async_trait]
impl SampleSource for SourceSet {
    async fn schema(&self, sources: &[String]) -> Result<FieldDimensions> {
        let all = try_join_all(self.sources.iter().map(|s| s.schema(sources))).await?;
        let mut merged = FieldDimensions::default();
        for fd in all {
            merged.union(fd);
        }
        Ok(merged)
    }

    async fn open(&self, options: &IteratorOptions) -> Result<Vec<SeriesCursor>> {
        let all = try_join_all(self.sources.iter().map(|s| s.open(options))).await?;
        Ok(all.into_iter().flatten().collect())
    }
}
