//! Redis-backed query cache
//!
//! Production binding for the read-path cache: per-key TTL via `SETEX`
//! semantics, namespace isolation through a key prefix, and a managed
//! async connection that reconnects on failure.

use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use tracing::info;

use slopestream_types::{PipelineError, Result};

use crate::cache::QueryCache;

/// Redis cache configuration
#[derive(Debug, Clone)]
pub struct RedisCacheConfig {
    /// Redis connection URL
    pub url: String,
    /// Key prefix for namespace isolation
    pub key_prefix: String,
}

impl Default for RedisCacheConfig {
    fn default() -> Self {
        Self {
            url: "redis://localhost:6379".to_string(),
            key_prefix: "slopestream:".to_string(),
        }
    }
}

/// Query cache backed by Redis
pub struct RedisCache {
    connection: ConnectionManager,
    key_prefix: String,
}

impl RedisCache {
    /// Connect to Redis and return a ready cache
    pub async fn connect(config: RedisCacheConfig) -> Result<Self> {
        let client = redis::Client::open(config.url.as_str())
            .map_err(|e| PipelineError::Storage(e.to_string()))?;
        let connection = ConnectionManager::new(client)
            .await
            .map_err(|e| PipelineError::Storage(e.to_string()))?;

        info!(url = %config.url, "redis cache connected");

        Ok(Self {
            connection,
            key_prefix: config.key_prefix,
        })
    }

    fn prefixed(&self, key: &str) -> String {
        format!("{}{}", self.key_prefix, key)
    }
}

#[async_trait]
impl QueryCache for RedisCache {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut connection = self.connection.clone();
        let value: Option<String> = connection
            .get(self.prefixed(key))
            .await
            .map_err(|e| PipelineError::Storage(e.to_string()))?;
        Ok(value)
    }

    async fn put_with_ttl(&self, key: &str, value: &str, ttl: Duration) -> Result<()> {
        let mut connection = self.connection.clone();
        let _: () = connection
            .set_ex(self.prefixed(key), value, ttl.as_secs())
            .await
            .map_err(|e| PipelineError::Storage(e.to_string()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_prefixing() {
        let config = RedisCacheConfig::default();
        assert_eq!(config.key_prefix, "slopestream:");
        assert_eq!(config.url, "redis://localhost:6379");
    }
}
