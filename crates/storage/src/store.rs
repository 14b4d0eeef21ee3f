//! Durable-store trait and in-memory implementation

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::debug;

use slopestream_types::{RideRecord, Result};

/// Durable store for ride records.
///
/// Writes are independent per record; there is no cross-record
/// transaction. Upserts are idempotent: writing the same
/// partition/sort-key pair twice leaves one record.
#[async_trait]
pub trait RideStore: Send + Sync {
    /// Upsert a single record
    async fn put(&self, record: &RideRecord) -> Result<()>;

    /// Upsert a batch of records. Partial failure is reported as
    /// whole-batch failure; callers retry the batch in full.
    async fn put_batch(&self, records: &[RideRecord]) -> Result<()> {
        for record in records {
            self.put(record).await?;
        }
        Ok(())
    }

    /// All records for a partition key whose sort key starts with the prefix
    async fn query_prefix(
        &self,
        partition_key: &str,
        sort_key_prefix: &str,
    ) -> Result<Vec<RideRecord>>;

    /// All records sharing a secondary-index grouping key
    async fn query_index(&self, index_key: &str) -> Result<Vec<RideRecord>>;
}

/// In-memory ride store, ordered by (partition key, sort key)
#[derive(Debug, Default)]
pub struct MemoryRideStore {
    rows: RwLock<BTreeMap<(String, String), RideRecord>>,
    query_count: AtomicU64,
}

impl MemoryRideStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of records currently stored
    pub async fn len(&self) -> usize {
        self.rows.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.rows.read().await.is_empty()
    }

    /// Total prefix/index queries served; used to assert cache-aside
    /// behavior in tests
    pub fn query_count(&self) -> u64 {
        self.query_count.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl RideStore for MemoryRideStore {
    async fn put(&self, record: &RideRecord) -> Result<()> {
        let key = (record.partition_key.clone(), record.sort_key.clone());
        self.rows.write().await.insert(key, record.clone());
        Ok(())
    }

    async fn put_batch(&self, records: &[RideRecord]) -> Result<()> {
        let mut rows = self.rows.write().await;
        for record in records {
            let key = (record.partition_key.clone(), record.sort_key.clone());
            rows.insert(key, record.clone());
        }
        debug!(count = records.len(), "batch committed");
        Ok(())
    }

    async fn query_prefix(
        &self,
        partition_key: &str,
        sort_key_prefix: &str,
    ) -> Result<Vec<RideRecord>> {
        self.query_count.fetch_add(1, Ordering::Relaxed);
        let rows = self.rows.read().await;
        Ok(rows
            .range((partition_key.to_string(), sort_key_prefix.to_string())..)
            .take_while(|((pk, sk), _)| pk == partition_key && sk.starts_with(sort_key_prefix))
            .map(|(_, record)| record.clone())
            .collect())
    }

    async fn query_index(&self, index_key: &str) -> Result<Vec<RideRecord>> {
        self.query_count.fetch_add(1, Ordering::Relaxed);
        let rows = self.rows.read().await;
        Ok(rows
            .values()
            .filter(|record| record.index_key == index_key)
            .cloned()
            .collect())
    }
}
