//! Sample data model shared by the write and read paths
//!
//! A [`Sample`] is one measurement event: a measurement name, a sorted tag set that
//! identifies the series, typed field values and a nanosecond timestamp.

pub mod line_protocol;

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Sorted tag set identifying a series
pub type Tags = BTreeMap<String, String>;

/// Typed field value
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Float(f64),
    Integer(i64),
    String(String),
    Boolean(bool),
}

impl FieldValue {
    pub fn data_type(&self) -> DataType {
        match self {
            FieldValue::Float(_) => DataType::Float,
            FieldValue::Integer(_) => DataType::Integer,
            FieldValue::String(_) => DataType::String,
            FieldValue::Boolean(_) => DataType::Boolean,
        }
    }

    /// Numeric view of the value, used when comparing against numeric literals
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            FieldValue::Float(v) => Some(*v),
            FieldValue::Integer(v) => Some(*v as f64),
            _ => None,
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        match self {
            FieldValue::Float(v) => serde_json::Number::from_f64(*v)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            FieldValue::Integer(v) => serde_json::Value::from(*v),
            FieldValue::String(v) => serde_json::Value::String(v.clone()),
            FieldValue::Boolean(v) => serde_json::Value::Bool(*v),
        }
    }
}

impl From<f64> for FieldValue {
    fn from(v: f64) -> Self {
        FieldValue::Float(v)
    }
}

impl From<i64> for FieldValue {
    fn from(v: i64) -> Self {
        FieldValue::Integer(v)
    }
}

impl From<bool> for FieldValue {
    fn from(v: bool) -> Self {
        FieldValue::Boolean(v)
    }
}

impl From<&str> for FieldValue {
    fn from(v: &str) -> Self {
        FieldValue::String(v.to_string())
    }
}

/// Value types a shard reports for a field, plus `Tag` for dimension references
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataType {
    Float,
    Integer,
    String,
    Boolean,
    Tag,
}

impl DataType {
    /// Decode the type string used in `SHOW FIELD KEYS` responses.
    /// Unknown strings yield `None`.
    pub fn from_wire(raw: &str) -> Option<Self> {
        match raw {
            "float" => Some(DataType::Float),
            "integer" => Some(DataType::Integer),
            "string" => Some(DataType::String),
            "boolean" | "bool" => Some(DataType::Boolean),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DataType::Float => "float",
            DataType::Integer => "integer",
            DataType::String => "string",
            DataType::Boolean => "boolean",
            DataType::Tag => "tag",
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One measurement event. Immutable once built.
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    measurement: String,
    tags: Tags,
    fields: BTreeMap<String, FieldValue>,
    timestamp: i64,
}

impl Sample {
    pub fn new(
        measurement: impl Into<String>,
        tags: Tags,
        fields: BTreeMap<String, FieldValue>,
        timestamp: i64,
    ) -> Self {
        Self {
            measurement: measurement.into(),
            tags,
            fields,
            timestamp,
        }
    }

    /// Start building a sample for `measurement`
    pub fn builder(measurement: impl Into<String>) -> SampleBuilder {
        SampleBuilder {
            measurement: measurement.into(),
            tags: Tags::new(),
            fields: BTreeMap::new(),
            timestamp: 0,
        }
    }

    pub fn measurement(&self) -> &str {
        &self.measurement
    }

    pub fn tags(&self) -> &Tags {
        &self.tags
    }

    pub fn fields(&self) -> &BTreeMap<String, FieldValue> {
        &self.fields
    }

    /// Timestamp in nanoseconds since the Unix epoch
    pub fn timestamp(&self) -> i64 {
        self.timestamp
    }

    /// Series key: measurement followed by `,key=value` per tag in key order
    pub fn series_key(&self) -> String {
        let mut key = line_protocol::escape_measurement(&self.measurement);
        for (k, v) in &self.tags {
            key.push(',');
            key.push_str(&line_protocol::escape_key(k));
            key.push('=');
            key.push_str(&line_protocol::escape_key(v));
        }
        key
    }
}

/// Builder for [`Sample`]
#[derive(Debug, Clone)]
pub struct SampleBuilder {
    measurement: String,
    tags: Tags,
    fields: BTreeMap<String, FieldValue>,
    timestamp: i64,
}

impl SampleBuilder {
    pub fn tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }

    pub fn field(mut self, key: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }

    pub fn timestamp(mut self, nanos: i64) -> Self {
        self.timestamp = nanos;
        self
    }

    pub fn build(self) -> Sample {
        Sample::new(self.measurement, self.tags, self.fields, self.timestamp)
    }
}

/// Timestamp precision for writes and query results
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Precision {
    #[default]
    Nanosecond,
    Microsecond,
    Millisecond,
    Second,
    Minute,
    Hour,
}

impl Precision {
    /// Parse a precision or epoch parameter. Empty means nanoseconds.
    pub fn parse(raw: &str) -> Result<Self> {
        match raw.trim() {
            "" | "n" | "ns" => Ok(Precision::Nanosecond),
            "u" | "µ" | "us" => Ok(Precision::Microsecond),
            "ms" => Ok(Precision::Millisecond),
            "s" => Ok(Precision::Second),
            "m" => Ok(Precision::Minute),
            "h" => Ok(Precision::Hour),
            other => Err(Error::InvalidRequest(format!("invalid precision '{}'", other))),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Precision::Nanosecond => "ns",
            Precision::Microsecond => "u",
            Precision::Millisecond => "ms",
            Precision::Second => "s",
            Precision::Minute => "m",
            Precision::Hour => "h",
        }
    }

    /// Nanoseconds per unit
    pub fn nanos(&self) -> i64 {
        match self {
            Precision::Nanosecond => 1,
            Precision::Microsecond => 1_000,
            Precision::Millisecond => 1_000_000,
            Precision::Second => 1_000_000_000,
            Precision::Minute => 60 * 1_000_000_000,
            Precision::Hour => 3_600 * 1_000_000_000,
        }
    }

    pub fn to_nanos(&self, value: i64) -> i64 {
        value.saturating_mul(self.nanos())
    }

    /// `value` in nanoseconds, or `None` when it overflows
    pub fn checked_to_nanos(&self, value: i64) -> Option<i64> {
        value.checked_mul(self.nanos())
    }

    pub fn from_nanos(&self, nanos: i64) -> i64 {
        nanos / self.nanos()
    }
}

impl fmt::Display for Precision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Write consistency level forwarded to shards
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConsistencyLevel {
    Any,
    #[default]
    One,
    Quorum,
    All,
}

impl ConsistencyLevel {
    pub fn parse(raw: &str) -> Result<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "any" => Ok(ConsistencyLevel::Any),
            "" | "one" => Ok(ConsistencyLevel::One),
            "quorum" => Ok(ConsistencyLevel::Quorum),
            "all" => Ok(ConsistencyLevel::All),
            other => Err(Error::InvalidRequest(format!("invalid consistency level '{}'", other))),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ConsistencyLevel::Any => "any",
            ConsistencyLevel::One => "one",
            ConsistencyLevel::Quorum => "quorum",
            ConsistencyLevel::All => "all",
        }
    }
}
