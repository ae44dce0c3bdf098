//! Redis-backed shared store.

use async_trait::async_trait;
use redis::AsyncCommands;
use redis::aio::ConnectionManager;
use serde_json::Value;
use tracing::debug;

use super::{SharedStore, StoreError};

/// Store backed by a Redis server.
///
/// The connection manager multiplexes one connection and reconnects on its own,
/// so clones are cheap and can be used from concurrent request handlers.
#[derive(Clone)]
pub struct RedisStore {
    connection: ConnectionManager,
}

impl RedisStore {
    /// Connect to `url`, for example `redis://127.0.0.1:6379`.
    pub async fn connect(url: &str) -> Result<Self, StoreError> {
        debug!(%url, "connecting to redis");
        let client = redis::Client::open(url)?;
        let connection = ConnectionManager::new(client).await?;
        Ok(Self { connection })
    }
}

#[async_trait]
impl SharedStore for RedisStore {
    async fn get(&self, key: &str) -> Result<Option<Value>, StoreError> {
        let mut connection = self.connection.clone();
        let raw: Option<String> = connection.get(key).await?;
        Ok(raw.map(|text| serde_json::from_str(&text)).transpose()?)
    }

    async fn set(&self, key: &str, value: &Value) -> Result<(), StoreError> {
        let mut connection = self.connection.clone();
        let text = serde_json::to_string(value)?;
        connection.set::<_, _, ()>(key, text).await?;
        Ok(())
    }

    async fn keys(&self, pattern: &str) -> Result<Vec<String>, StoreError> {
        let mut connection = self.connection.clone();
        Ok(connection.keys(pattern).await?)
    }

    async fn del(&self, keys: &[String]) -> Result<usize, StoreError> {
        if keys.is_empty() {
            return Ok(0);
        }
        let mut connection = self.connection.clone();
        Ok(connection.del(keys).await?)
    }

    async fn append(&self, key: &str, value: &Value) -> Result<usize, StoreError> {
        let mut connection = self.connection.clone();
        let text = serde_json::to_string(value)?;
        Ok(connection.rpush(key, text).await?)
    }

    async fn range(&self, key: &str, limit: Option<usize>) -> Result<Vec<Value>, StoreError> {
        let stop = match limit {
            Some(0) => return Ok(Vec::new()),
            Some(limit) => isize::try_from(limit).map_or(-1, |limit| limit - 1),
            None => -1,
        };
        let mut connection = self.connection.clone();
        let raw: Vec<String> = connection.lrange(key, 0, stop).await?;
        raw.iter()
            .map(|text| serde_json::from_str(text).map_err(StoreError::from))
            .collect()
    }

    async fn ping(&self) -> Result<(), StoreError> {
        let mut connection = self.connection.clone();
        let _: String = redis::cmd("PING").query_async(&mut connection).await?;
        Ok(())
    }
}
