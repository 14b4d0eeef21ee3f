//! Bounded pool of reusable broker channels
//!
//! Every broker interaction goes through an acquire/release cycle. When
//! all channels are out, `acquire` blocks the caller until a channel is
//! returned; the pool never grows. Channels are returned on guard drop
//! regardless of outcome.

use std::ops::Deref;
use std::sync::{Arc, Mutex};

use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::debug;

use slopestream_types::{PipelineError, Result};

use crate::channel::BrokerChannel;

struct PoolInner {
    idle: Mutex<Vec<Arc<dyn BrokerChannel>>>,
    permits: Arc<Semaphore>,
    capacity: usize,
}

/// Fixed-size channel pool
#[derive(Clone)]
pub struct ChannelPool {
    inner: Arc<PoolInner>,
}

impl ChannelPool {
    /// Build a pool over a fixed set of channels
    pub fn new(channels: Vec<Arc<dyn BrokerChannel>>) -> Self {
        let capacity = channels.len();
        debug!(capacity, "channel pool created");
        Self {
            inner: Arc::new(PoolInner {
                permits: Arc::new(Semaphore::new(capacity)),
                idle: Mutex::new(channels),
                capacity,
            }),
        }
    }

    /// Borrow a channel, blocking while the pool is exhausted
    pub async fn acquire(&self) -> Result<PooledChannel> {
        let permit = self
            .inner
            .permits
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| PipelineError::ResourceExhausted("channel pool closed".into()))?;

        let channel = self
            .inner
            .idle
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop()
            .ok_or_else(|| {
                PipelineError::ResourceExhausted("channel pool invariant violated".into())
            })?;

        Ok(PooledChannel {
            channel: Some(channel),
            pool: self.inner.clone(),
            _permit: permit,
        })
    }

    pub fn capacity(&self) -> usize {
        self.inner.capacity
    }

    /// Channels currently available without blocking
    pub fn idle_count(&self) -> usize {
        self.inner
            .idle
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }
}

/// A channel borrowed from the pool; returned on drop
pub struct PooledChannel {
    channel: Option<Arc<dyn BrokerChannel>>,
    pool: Arc<PoolInner>,
    _permit: OwnedSemaphorePermit,
}

impl Deref for PooledChannel {
    type Target = dyn BrokerChannel;

    fn deref(&self) -> &Self::Target {
        // only taken in Drop
        self.channel.as_deref().expect("channel already returned")
    }
}

impl Drop for PooledChannel {
    fn drop(&mut self) {
        if let Some(channel) = self.channel.take() {
            self.pool
                .idle
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .push(channel);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::Envelope;
    use crate::memory::MemoryBroker;
    use std::time::Duration;

    fn pool_of(broker: &MemoryBroker, size: usize) -> ChannelPool {
        ChannelPool::new((0..size).map(|_| broker.channel()).collect())
    }

    #[tokio::test]
    async fn test_acquire_and_release() {
        let broker = MemoryBroker::new();
        let pool = pool_of(&broker, 2);
        assert_eq!(pool.capacity(), 2);
        assert_eq!(pool.idle_count(), 2);

        {
            let channel = pool.acquire().await.unwrap();
            channel
                .publish("rides", &Envelope::default(), b"x")
                .await
                .unwrap();
            assert_eq!(pool.idle_count(), 1);
        }
        assert_eq!(pool.idle_count(), 2);
    }

    #[tokio::test]
    async fn test_exhausted_pool_blocks_until_release() {
        let broker = MemoryBroker::new();
        let pool = pool_of(&broker, 1);

        let held = pool.acquire().await.unwrap();

        let contender = {
            let pool = pool.clone();
            tokio::spawn(async move { pool.acquire().await.map(|_| ()) })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!contender.is_finished());

        drop(held);
        contender.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_channel_returned_even_after_operation_error() {
        let broker = MemoryBroker::new();
        let pool = pool_of(&broker, 1);
        broker.close();

        {
            let channel = pool.acquire().await.unwrap();
            assert!(channel
                .publish("rides", &Envelope::default(), b"x")
                .await
                .is_err());
        }
        assert_eq!(pool.idle_count(), 1);
    }
}
