//! Batched persistence consumer
//!
//! Per-worker state machine: accumulate deliveries into a private batch
//! buffer; when the buffer reaches the configured size, commit the whole
//! batch to the durable store under the retry executor (delays double
//! from the initial backoff); only after the commit attempt concludes —
//! success or exhausted retries — are the broker messages of that batch
//! acknowledged. Malformed payloads are dropped and acked, never retried.
//! A partially filled buffer is flushed when the stream ends.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, info, warn};

use slopestream_broker::PooledChannel;
use slopestream_storage::RideStore;
use slopestream_types::{
    LiftRideEvent, Result, RetryExecutor, RetryPolicy, RideRecord,
};

/// Write-consumer tuning
#[derive(Debug, Clone)]
pub struct WriteConsumerConfig {
    /// Queue carrying serialized lift-ride events
    pub queue: String,
    /// Events accumulated per store commit
    pub batch_size: usize,
    /// Retries per batch commit
    pub max_retries: u32,
    /// First commit-retry delay; doubles per retry
    pub initial_backoff: Duration,
}

impl Default for WriteConsumerConfig {
    fn default() -> Self {
        Self {
            queue: "skiers.rides".to_string(),
            batch_size: 25,
            max_retries: 5,
            initial_backoff: Duration::from_millis(100),
        }
    }
}

/// Counters for one write consumer
#[derive(Debug, Default)]
pub struct WriteConsumerStats {
    consumed: AtomicU64,
    committed_batches: AtomicU64,
    failed_batches: AtomicU64,
    dropped_malformed: AtomicU64,
}

impl WriteConsumerStats {
    pub fn consumed(&self) -> u64 {
        self.consumed.load(Ordering::Relaxed)
    }

    pub fn committed_batches(&self) -> u64 {
        self.committed_batches.load(Ordering::Relaxed)
    }

    pub fn failed_batches(&self) -> u64 {
        self.failed_batches.load(Ordering::Relaxed)
    }

    pub fn dropped_malformed(&self) -> u64 {
        self.dropped_malformed.load(Ordering::Relaxed)
    }
}

/// One persistence worker holding one pooled broker channel for its
/// lifetime and a private batch buffer
pub struct WriteConsumer {
    channel: PooledChannel,
    store: Arc<dyn RideStore>,
    config: WriteConsumerConfig,
    retry: RetryExecutor,
    stats: Arc<WriteConsumerStats>,
}

impl WriteConsumer {
    pub fn new(
        channel: PooledChannel,
        store: Arc<dyn RideStore>,
        config: WriteConsumerConfig,
    ) -> Self {
        let retry = RetryExecutor::new(RetryPolicy::for_batch_commit(
            config.max_retries,
            config.initial_backoff,
        ));
        Self {
            channel,
            store,
            config,
            retry,
            stats: Arc::new(WriteConsumerStats::default()),
        }
    }

    pub fn stats(&self) -> Arc<WriteConsumerStats> {
        self.stats.clone()
    }

    /// Consume until the stream ends, flushing any partial batch last
    pub async fn run(&self) -> Result<()> {
        let mut batch: Vec<(LiftRideEvent, u64)> = Vec::with_capacity(self.config.batch_size);

        loop {
            match self.channel.next_delivery(&self.config.queue).await? {
                Some(delivery) => {
                    match serde_json::from_slice::<LiftRideEvent>(&delivery.payload) {
                        Ok(event) => {
                            self.stats.consumed.fetch_add(1, Ordering::Relaxed);
                            batch.push((event, delivery.ack_tag));
                            if batch.len() >= self.config.batch_size {
                                self.commit(&mut batch).await?;
                            }
                        }
                        Err(err) => {
                            // Acked, not retried: a poison message must not loop.
                            warn!(error = %err, "dropping malformed ride payload");
                            self.stats.dropped_malformed.fetch_add(1, Ordering::Relaxed);
                            self.channel.ack(delivery.ack_tag).await?;
                        }
                    }
                }
                None => break,
            }
        }

        if !batch.is_empty() {
            debug!(size = batch.len(), "flushing final partial batch");
            self.commit(&mut batch).await?;
        }

        info!(
            consumed = self.stats.consumed(),
            committed_batches = self.stats.committed_batches(),
            failed_batches = self.stats.failed_batches(),
            "write consumer finished"
        );
        Ok(())
    }

    /// Commit one batch, then ack its messages whatever the outcome.
    ///
    /// Partial store failure counts as whole-batch failure and the batch
    /// is retried in full; per-record upserts are idempotent, so replay
    /// is safe for the records themselves.
    async fn commit(&self, batch: &mut Vec<(LiftRideEvent, u64)>) -> Result<()> {
        let records: Vec<RideRecord> = batch
            .iter()
            .map(|(event, _)| RideRecord::from_event(event))
            .collect();

        let outcome = self
            .retry
            .execute(|_| self.store.put_batch(&records))
            .await;

        match &outcome.result {
            Ok(()) => {
                self.stats.committed_batches.fetch_add(1, Ordering::Relaxed);
            }
            Err(err) => {
                self.stats.failed_batches.fetch_add(1, Ordering::Relaxed);
                error!(
                    error = %err,
                    attempts = outcome.attempts,
                    size = records.len(),
                    "batch commit exhausted retries, dropping batch"
                );
            }
        }

        // At-least-once boundary: the attempt has concluded, so the
        // messages may be acknowledged either way.
        for (_, ack_tag) in batch.drain(..) {
            self.channel.ack(ack_tag).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use slopestream_broker::{BrokerChannel, ChannelPool, Envelope, MemoryBroker};
    use slopestream_storage::MemoryRideStore;
    use slopestream_types::PipelineError;
    use std::sync::atomic::AtomicU32;
    use tokio::sync::Notify;

    fn test_config(batch_size: usize) -> WriteConsumerConfig {
        WriteConsumerConfig {
            batch_size,
            max_retries: 2,
            initial_backoff: Duration::from_millis(1),
            ..WriteConsumerConfig::default()
        }
    }

    async fn publish_event(channel: &dyn BrokerChannel, skier_id: u32) {
        let event = LiftRideEvent::new(skier_id, 7, 2024, 3, 120, 9).unwrap();
        channel
            .publish(
                "skiers.rides",
                &Envelope::default(),
                &serde_json::to_vec(&event).unwrap(),
            )
            .await
            .unwrap();
    }

    async fn consumer_over(
        broker: &MemoryBroker,
        store: Arc<dyn RideStore>,
        batch_size: usize,
    ) -> WriteConsumer {
        let pool = ChannelPool::new(vec![broker.channel()]);
        WriteConsumer::new(pool.acquire().await.unwrap(), store, test_config(batch_size))
    }

    #[tokio::test]
    async fn test_full_batch_is_committed_and_acked() {
        let broker = MemoryBroker::new();
        let publisher = broker.channel();
        for i in 1..=25u32 {
            publish_event(&*publisher, i).await;
        }
        broker.close();

        let store = Arc::new(MemoryRideStore::new());
        let consumer = consumer_over(&broker, store.clone(), 25).await;
        consumer.run().await.unwrap();

        assert_eq!(store.len().await, 25);
        assert_eq!(consumer.stats().committed_batches(), 1);
        assert_eq!(broker.unacked_count(), 0);
    }

    #[tokio::test]
    async fn test_partial_batch_flushes_at_stream_end() {
        let broker = MemoryBroker::new();
        let publisher = broker.channel();
        for i in 1..=3u32 {
            publish_event(&*publisher, i).await;
        }
        broker.close();

        let store = Arc::new(MemoryRideStore::new());
        let consumer = consumer_over(&broker, store.clone(), 25).await;
        consumer.run().await.unwrap();

        assert_eq!(store.len().await, 3);
        assert_eq!(consumer.stats().committed_batches(), 1);
        assert_eq!(broker.unacked_count(), 0);
    }

    #[tokio::test]
    async fn test_malformed_payload_is_dropped_and_acked() {
        let broker = MemoryBroker::new();
        let publisher = broker.channel();
        publisher
            .publish("skiers.rides", &Envelope::default(), b"not json")
            .await
            .unwrap();
        publish_event(&*publisher, 1).await;
        broker.close();

        let store = Arc::new(MemoryRideStore::new());
        let consumer = consumer_over(&broker, store.clone(), 25).await;
        consumer.run().await.unwrap();

        assert_eq!(store.len().await, 1);
        assert_eq!(consumer.stats().dropped_malformed(), 1);
        assert_eq!(broker.unacked_count(), 0);
    }

    /// Store that fails a configurable number of commits before recovering
    struct FlakyStore {
        inner: MemoryRideStore,
        failures_left: AtomicU32,
        attempts: AtomicU32,
    }

    impl FlakyStore {
        fn failing(times: u32) -> Self {
            Self {
                inner: MemoryRideStore::new(),
                failures_left: AtomicU32::new(times),
                attempts: AtomicU32::new(0),
            }
        }
    }

    #[async_trait]
    impl RideStore for FlakyStore {
        async fn put(&self, record: &RideRecord) -> Result<()> {
            self.inner.put(record).await
        }

        async fn put_batch(&self, records: &[RideRecord]) -> Result<()> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            let left = self.failures_left.load(Ordering::SeqCst);
            if left > 0 {
                self.failures_left.store(left - 1, Ordering::SeqCst);
                return Err(PipelineError::Storage("simulated outage".into()));
            }
            self.inner.put_batch(records).await
        }

        async fn query_prefix(&self, pk: &str, prefix: &str) -> Result<Vec<RideRecord>> {
            self.inner.query_prefix(pk, prefix).await
        }

        async fn query_index(&self, index_key: &str) -> Result<Vec<RideRecord>> {
            self.inner.query_index(index_key).await
        }
    }

    #[tokio::test]
    async fn test_commit_retries_then_succeeds() {
        let broker = MemoryBroker::new();
        let publisher = broker.channel();
        for i in 1..=5u32 {
            publish_event(&*publisher, i).await;
        }
        broker.close();

        let store = Arc::new(FlakyStore::failing(2));
        let consumer = consumer_over(&broker, store.clone(), 5).await;
        consumer.run().await.unwrap();

        assert_eq!(store.attempts.load(Ordering::SeqCst), 3);
        assert_eq!(store.inner.len().await, 5);
        assert_eq!(consumer.stats().committed_batches(), 1);
        assert_eq!(broker.unacked_count(), 0);
    }

    #[tokio::test]
    async fn test_exhausted_retries_still_ack_the_batch() {
        let broker = MemoryBroker::new();
        let publisher = broker.channel();
        for i in 1..=5u32 {
            publish_event(&*publisher, i).await;
        }
        broker.close();

        // More failures than max_retries + 1: the commit exhausts.
        let store = Arc::new(FlakyStore::failing(10));
        let consumer = consumer_over(&broker, store.clone(), 5).await;
        consumer.run().await.unwrap();

        assert_eq!(store.attempts.load(Ordering::SeqCst), 3);
        assert_eq!(consumer.stats().failed_batches(), 1);
        assert_eq!(consumer.stats().committed_batches(), 0);
        // Acked regardless: the attempt concluded.
        assert_eq!(broker.unacked_count(), 0);
    }

    /// Store that parks inside the commit until released
    struct GatedStore {
        inner: MemoryRideStore,
        entered: Notify,
        release: Notify,
    }

    #[async_trait]
    impl RideStore for GatedStore {
        async fn put(&self, record: &RideRecord) -> Result<()> {
            self.inner.put(record).await
        }

        async fn put_batch(&self, records: &[RideRecord]) -> Result<()> {
            self.entered.notify_one();
            self.release.notified().await;
            self.inner.put_batch(records).await
        }

        async fn query_prefix(&self, pk: &str, prefix: &str) -> Result<Vec<RideRecord>> {
            self.inner.query_prefix(pk, prefix).await
        }

        async fn query_index(&self, index_key: &str) -> Result<Vec<RideRecord>> {
            self.inner.query_index(index_key).await
        }
    }

    #[tokio::test]
    async fn test_no_ack_before_the_commit_attempt_concludes() {
        let broker = MemoryBroker::new();
        let publisher = broker.channel();
        for i in 1..=5u32 {
            publish_event(&*publisher, i).await;
        }
        broker.close();

        let store = Arc::new(GatedStore {
            inner: MemoryRideStore::new(),
            entered: Notify::new(),
            release: Notify::new(),
        });

        let consumer = consumer_over(&broker, store.clone(), 5).await;
        let stats = consumer.stats();
        let broker_probe = broker.clone();
        let handle = tokio::spawn(async move { consumer.run().await });

        // Commit is in flight: every message of the batch is unacked.
        store.entered.notified().await;
        assert_eq!(broker_probe.unacked_count(), 5);
        assert_eq!(stats.committed_batches(), 0);

        store.release.notify_one();
        handle.await.unwrap().unwrap();
        assert_eq!(broker_probe.unacked_count(), 0);
        assert_eq!(stats.committed_batches(), 1);
    }
}
