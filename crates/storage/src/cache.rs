//! Read-path query cache
//!
//! Cache-aside contract: a present, unexpired entry is what a fresh store
//! query would have produced as of the time it was cached. Entries are
//! written on read-path miss with a TTL and never proactively invalidated
//! by writes; the TTL bounds the staleness window.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tokio::time::Instant;

use slopestream_types::Result;

/// Key-value cache with per-key expiry
#[async_trait]
pub trait QueryCache: Send + Sync {
    /// Fetch an entry; expired entries read as absent
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Store an entry, overwriting any previous value, expiring after `ttl`
    async fn put_with_ttl(&self, key: &str, value: &str, ttl: Duration) -> Result<()>;
}

/// In-memory cache used by tests and local runs
#[derive(Debug, Default)]
pub struct MemoryCache {
    entries: RwLock<HashMap<String, (String, Instant)>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }
}

#[async_trait]
impl QueryCache for MemoryCache {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        {
            let entries = self.entries.read().await;
            match entries.get(key) {
                Some((value, expiry)) if *expiry > Instant::now() => {
                    return Ok(Some(value.clone()))
                }
                Some(_) => {}
                None => return Ok(None),
            }
        }
        // Lazily drop the expired entry.
        self.entries.write().await.remove(key);
        Ok(None)
    }

    async fn put_with_ttl(&self, key: &str, value: &str, ttl: Duration) -> Result<()> {
        self.entries
            .write()
            .await
            .insert(key.to_string(), (value.to_string(), Instant::now() + ttl));
        Ok(())
    }
}
