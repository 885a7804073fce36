use std::time::Duration;

use async_trait::async_trait;
use redis::AsyncCommands;

use crate::types::ProviderResponse;
use crate::Result;

use super::ResponseStore;

/// Response store backed by Redis with per-entry TTL expiration.
#[derive(Clone)]
pub struct RedisResponseStore {
    client: redis::Client,
    ttl: Duration,
}

impl RedisResponseStore {
    pub fn new(url: impl AsRef<str>, ttl: Duration) -> Result<Self> {
        Ok(Self {
            client: redis::Client::open(url.as_ref())?,
            ttl,
        })
    }

    /// Build the connection URL from the discrete address / password /
    /// database settings the proxy is configured with.
    pub fn url(addr: &str, password: &str, db: i64) -> String {
        if password.is_empty() {
            format!("redis://{addr}/{db}")
        } else {
            format!("redis://:{password}@{addr}/{db}")
        }
    }

    async fn connection(&self) -> Result<redis::aio::MultiplexedConnection> {
        Ok(self.client.get_multiplexed_async_connection().await?)
    }

    pub async fn ping(&self) -> Result<()> {
        let mut conn = self.connection().await?;
        let _: Option<String> = conn.get("__ping__").await?;
        Ok(())
    }
}

#[async_trait]
impl ResponseStore for RedisResponseStore {
    async fn get(&self, key: &str) -> Result<Option<ProviderResponse>> {
        let mut conn = self.connection().await?;
        let raw: Option<String> = conn.get(key).await?;
        match raw {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    async fn put(&self, key: &str, response: &ProviderResponse) -> Result<()> {
        let mut conn = self.connection().await?;
        let json = serde_json::to_string(response)?;
        conn.set_ex::<_, _, ()>(key, json, self.ttl.as_secs().max(1))
            .await?;
        Ok(())
    }
}
