//! Client for InfluxDB 1.x compatible HTTP nodes

use super::{ShardClient, WireQuery, WriteBatch};
use crate::query::result::QueryResponse;
use crate::{Error, Result};
use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;
use tracing::debug;

pub struct HttpShardClient {
    addr: String,
    base_url: String,
    client: Client,
}

impl HttpShardClient {
    /// Create a client for `addr`. The address may omit the scheme, in which case
    /// plain HTTP is assumed.
    pub fn new(addr: impl Into<String>, timeout: Duration) -> Result<Self> {
        let addr = addr.into();
        let base_url = if addr.starts_with("http://") || addr.starts_with("https://") {
            addr.trim_end_matches('/').to_string()
        } else {
            format!("http://{}", addr.trim_end_matches('/'))
        };
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(Error::Http)?;
        Ok(Self {
            addr,
            base_url,
            client,
        })
    }

    async fn rejected(&self, response: reqwest::Response) -> Error {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        // InfluxDB wraps failures as {"error": "..."}
        let message = serde_json::from_str::<QueryResponse>(&body)
            .ok()
            .and_then(|r| r.error)
            .unwrap_or(body);
        Error::ShardRejected {
            shard: self.addr.clone(),
            message: format!("{}: {}", status, message.trim()),
        }
    }
}

#[async_trait]
impl ShardClient for HttpShardClient {
    fn addr(&self) -> &str {
        &self.addr
    }

    async fn query(&self, query: &WireQuery) -> Result<QueryResponse> {
        debug!(shard = %self.addr, db = %query.database, q = %query.command, "Shard query");
        let response = self
            .client
            .get(format!("{}/query", self.base_url))
            .query(&[
                ("q", query.command.as_str()),
                ("db", query.database.as_str()),
                ("epoch", query.epoch.as_str()),
            ])
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(self.rejected(response).await);
        }
        Ok(response.json::<QueryResponse>().await?)
    }

    async fn write(&self, batch: &WriteBatch) -> Result<()> {
        debug!(shard = %self.addr, db = %batch.database, points = batch.len(), "Shard write");
        let response = self
            .client
            .post(format!("{}/write", self.base_url))
            .query(&[
                ("db", batch.database.as_str()),
                ("precision", batch.precision.as_str()),
                ("consistency", batch.consistency.as_str()),
            ])
            .body(batch.body())
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(self.rejected(response).await);
        }
        Ok(())
    }
}
