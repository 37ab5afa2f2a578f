//! Proxy configuration
//!
//! Loaded from a TOML file, then overridden from the environment:
//! - FLUXGATE_UPSTREAMS: comma-separated shard node addresses
//! - FLUXGATE_HTTP_ADDR: listen address of the HTTP API
//!
//! ```toml
//! [upstreams]
//! addrs = ["http://10.0.0.1:8086", "http://10.0.0.2:8086"]
//!
//! [httpd]
//! addr = "0.0.0.0:8086"
//!
//! [query]
//! max_buckets = 100000
//! ```

use crate::{Error, Result};
use serde::Deserialize;
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;
use tracing::info;

pub const ENV_UPSTREAMS: &str = "FLUXGATE_UPSTREAMS";
pub const ENV_HTTP_ADDR: &str = "FLUXGATE_HTTP_ADDR";

pub const DEFAULT_MAX_BUCKETS: usize = 100_000;

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct ProxyConfig {
    pub upstreams: UpstreamsConfig,
    pub httpd: HttpdConfig,
    pub query: QueryConfig,
    pub write: WriteConfig,
}

/// Shard nodes behind the proxy
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct UpstreamsConfig {
    /// Node addresses; each address is also the node's identity on the hash ring
    pub addrs: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct HttpdConfig {
    pub addr: String,
}

impl Default for HttpdConfig {
    fn default() -> Self {
        Self {
            addr: "0.0.0.0:8086".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct QueryConfig {
    /// Per-statement deadline, including every sub-query
    pub timeout_secs: u64,
    /// Result chunks buffered between executor and caller
    pub channel_capacity: usize,
    /// Rows per chunk when the caller does not ask; zero means unchunked
    pub default_chunk_size: usize,
    /// Most GROUP BY time() windows one series may span; zero means unlimited
    pub max_buckets: usize,
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 60,
            channel_capacity: 100,
            default_chunk_size: 0,
            max_buckets: DEFAULT_MAX_BUCKETS,
        }
    }
}

impl QueryConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct WriteConfig {
    /// Per shard request deadline
    pub timeout_secs: u64,
}

impl Default for WriteConfig {
    fn default() -> Self {
        Self { timeout_secs: 10 }
    }
}

impl WriteConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl ProxyConfig {
    /// Parse TOML text. Missing sections take their defaults.
    pub fn from_toml(text: &str) -> Result<Self> {
        Ok(toml::from_str(text)?)
    }

    /// Load a config file, apply environment overrides and validate
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("failed to read {}: {}", path.display(), e))
        })?;
        let mut config = Self::from_toml(&text)?;
        config.apply_env();
        config.validate()?;
        info!(
            path = %path.display(),
            upstreams = config.upstreams.addrs.len(),
            http_addr = %config.httpd.addr,
            "Loaded configuration"
        );
        Ok(config)
    }

    /// Apply FLUXGATE_UPSTREAMS and FLUXGATE_HTTP_ADDR when set
    pub fn apply_env(&mut self) {
        let upstreams = std::env::var(ENV_UPSTREAMS).ok();
        let http_addr = std::env::var(ENV_HTTP_ADDR).ok();
        self.apply_overrides(upstreams.as_deref(), http_addr.as_deref());
    }

    /// Override upstreams (comma-separated) and listen address. Blank values are ignored.
    pub fn apply_overrides(&mut self, upstreams: Option<&str>, http_addr: Option<&str>) {
        if let Some(raw) = upstreams.map(str::trim).filter(|s| !s.is_empty()) {
            self.upstreams.addrs = raw
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect();
        }
        if let Some(addr) = http_addr.map(str::trim).filter(|s| !s.is_empty()) {
            self.httpd.addr = addr.to_string();
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.upstreams.addrs.is_empty() {
            return Err(Error::Config("upstreams.addrs must not be empty".to_string()));
        }
        let mut seen = HashSet::new();
        for addr in &self.upstreams.addrs {
            if !(addr.starts_with("http://") || addr.starts_with("https://")) {
                return Err(Error::Config(format!(
                    "upstream '{}' must start with http:// or https://",
                    addr
                )));
            }
            if !seen.insert(addr.trim_end_matches('/')) {
                return Err(Error::Config(format!("duplicate upstream '{}'", addr)));
            }
        }
        if self.httpd.addr.trim().is_empty() {
            return Err(Error::Config("httpd.addr must not be empty".to_string()));
        }
        if self.query.channel_capacity == 0 {
            return Err(Error::Config("query.channel_capacity must be positive".to_string()));
        }
        if self.query.timeout_secs == 0 || self.write.timeout_secs == 0 {
            return Err(Error::Config("timeouts must be positive".to_string()));
        }
        Ok(())
    }
}
