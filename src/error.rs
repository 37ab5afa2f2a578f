//! Error types for fluxgate

use std::fmt;

/// Result type alias for fluxgate operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for fluxgate
#[derive(Debug)]
pub enum Error {
    /// A routing key has no destination, or a routed node has no client
    Routing(String),
    /// Schema discovery against a shard failed
    SchemaDiscovery { shard: String, message: String },
    /// A shard rejected or failed a sub-query
    SubQuery { shard: String, message: String },
    /// A shard answered a request with a non-success status
    ShardRejected { shard: String, message: String },
    /// Query text could not be parsed
    Parse(String),
    /// A line of a write body could not be parsed
    LineProtocol { line: String, message: String },
    /// Malformed request parameter or body encoding
    InvalidRequest(String),
    /// A statement could not be evaluated
    Query(String),
    /// Statement kind the federated executor does not handle
    UnsupportedStatement(String),
    /// Configuration errors
    Config(String),
    /// Transport errors talking to a shard
    Http(reqwest::Error),
    /// IO errors
    Io(std::io::Error),
    /// Serialization errors
    Serialization(String),
    /// Operation timed out
    Timeout,
    /// Caller went away before the operation finished
    Cancelled,
    /// One or more shard batches were rejected
    PartialWrite { failures: Vec<ShardFailure> },
    /// Internal error
    Internal(String),
}

/// One shard that failed to accept its write batch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShardFailure {
    pub shard: String,
    pub error: String,
}

impl fmt::Display for ShardFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.shard, self.error)
    }
}

impl Error {
    /// Failed shard addresses for a partial write, empty otherwise
    pub fn failed_shards(&self) -> Vec<&str> {
        match self {
            Error::PartialWrite { failures } => failures.iter().map(|f| f.shard.as_str()).collect(),
            _ => Vec::new(),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Http(e) => Some(e),
            Error::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Routing(msg) => write!(f, "Routing error: {}", msg),
            Error::SchemaDiscovery { shard, message } => {
                write!(f, "Schema discovery on {} failed: {}", shard, message)
            }
            Error::SubQuery { shard, message } => {
                write!(f, "Sub-query on {} failed: {}", shard, message)
            }
            Error::ShardRejected { shard, message } => {
                write!(f, "Shard {} rejected request: {}", shard, message)
            }
            Error::Parse(msg) => write!(f, "error parsing query: {}", msg),
            Error::LineProtocol { line, message } => {
                write!(f, "unable to parse '{}': {}", line, message)
            }
            Error::InvalidRequest(msg) => write!(f, "{}", msg),
            Error::Query(msg) => write!(f, "Query error: {}", msg),
            Error::UnsupportedStatement(stmt) => {
                write!(f, "statement not supported by federated executor: {}", stmt)
            }
            Error::Config(msg) => write!(f, "Configuration error: {}", msg),
            Error::Http(e) => write!(f, "HTTP error: {}", e),
            Error::Io(e) => write!(f, "IO error: {}", e),
            Error::Serialization(msg) => write!(f, "Serialization error: {}", msg),
            Error::Timeout => write!(f, "Operation timed out"),
            Error::Cancelled => write!(f, "Operation cancelled"),
            Error::PartialWrite { failures } => {
                let shards: Vec<String> = failures.iter().map(|s| s.to_string()).collect();
                write!(
                    f,
                    "write failed on {} shard(s): {}",
                    failures.len(),
                    shards.join("; ")
                )
            }
            Error::Internal(msg) => write!(f, "Internal error: {}", msg),
        }
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        Error::Http(e)
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Io(e)
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

impl From<toml::de::Error> for Error {
    fn from(e: toml::de::Error) -> Self {
        Error::Config(e.to_string())
    }
}
