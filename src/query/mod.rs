//! Read path
//!
//! - [`parser`] turns InfluxQL text into the [`ast`]
//! - [`catalog`] caches per-shard schemas
//! - [`source`] runs sub-queries on one shard
//! - [`exec`] merges, aggregates and shapes shard output
//! - [`coalesce`] folds streamed chunks back into per-statement results

pub mod ast;
pub mod catalog;
pub mod coalesce;
pub mod exec;
pub mod parser;
pub mod result;
pub mod source;
pub(crate) mod telemetry;

pub use ast::{Query, SelectStatement, Statement};
pub use catalog::{DatabaseSchema, MeasurementSchema, SchemaCatalog};
pub use coalesce::ResultCoalescer;
pub use parser::{parse_query, parse_statement};
pub use result::{Message, QueryResponse, Row, StatementResult};
pub use source::{RemoteSampleSource, SubQuery};
