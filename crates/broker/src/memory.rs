//! In-memory broker
//!
//! Reference implementation of the channel seam: named queues, ephemeral
//! reply queues, per-delivery ack tags and close-to-drain semantics.
//! Every test in the workspace runs against this broker.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::Notify;
use tracing::debug;
use uuid::Uuid;

use slopestream_types::{PipelineError, Result};

use crate::channel::{BrokerChannel, Delivery, Envelope};

#[derive(Debug)]
struct QueuedMessage {
    payload: Vec<u8>,
    envelope: Envelope,
}

#[derive(Debug, Default)]
struct QueueState {
    entries: Mutex<VecDeque<QueuedMessage>>,
    notify: Notify,
}

impl QueueState {
    fn pop(&self) -> Option<QueuedMessage> {
        self.entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop_front()
    }

    fn push(&self, message: QueuedMessage) {
        self.entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push_back(message);
        self.notify.notify_one();
    }

    fn depth(&self) -> usize {
        self.entries.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

#[derive(Debug)]
struct BrokerCore {
    queues: DashMap<String, Arc<QueueState>>,
    /// Delivered-but-unacked messages, keyed by ack tag
    unacked: DashMap<u64, String>,
    next_tag: AtomicU64,
    published_total: AtomicU64,
    closed: AtomicBool,
}

impl BrokerCore {
    fn queue(&self, name: &str) -> Arc<QueueState> {
        Arc::clone(
            self.queues
                .entry(name.to_string())
                .or_insert_with(|| Arc::new(QueueState::default()))
                .value(),
        )
    }
}

/// Shared in-memory broker; channels are cheap handles onto it
#[derive(Debug, Clone)]
pub struct MemoryBroker {
    core: Arc<BrokerCore>,
}

impl Default for MemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self {
            core: Arc::new(BrokerCore {
                queues: DashMap::new(),
                unacked: DashMap::new(),
                next_tag: AtomicU64::new(1),
                published_total: AtomicU64::new(0),
                closed: AtomicBool::new(false),
            }),
        }
    }

    /// Open a channel onto this broker
    pub fn channel(&self) -> Arc<dyn BrokerChannel> {
        Arc::new(MemoryChannel {
            core: self.core.clone(),
        })
    }

    /// Close the broker: consumers drain remaining messages, then observe
    /// end-of-stream.
    pub fn close(&self) {
        self.core.closed.store(true, Ordering::SeqCst);
        for queue in self.core.queues.iter() {
            queue.value().notify.notify_waiters();
        }
    }

    /// Messages currently waiting in a queue
    pub fn queue_depth(&self, queue: &str) -> usize {
        self.core
            .queues
            .get(queue)
            .map(|q| q.depth())
            .unwrap_or(0)
    }

    /// Delivered messages awaiting acknowledgment
    pub fn unacked_count(&self) -> usize {
        self.core.unacked.len()
    }

    /// Total messages ever published across all queues
    pub fn published_total(&self) -> u64 {
        self.core.published_total.load(Ordering::Relaxed)
    }
}

struct MemoryChannel {
    core: Arc<BrokerCore>,
}

#[async_trait]
impl BrokerChannel for MemoryChannel {
    async fn publish(&self, queue: &str, envelope: &Envelope, payload: &[u8]) -> Result<()> {
        if self.core.closed.load(Ordering::SeqCst) {
            return Err(PipelineError::Broker("broker is closed".into()));
        }
        self.core.queue(queue).push(QueuedMessage {
            payload: payload.to_vec(),
            envelope: envelope.clone(),
        });
        self.core.published_total.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    async fn next_delivery(&self, queue: &str) -> Result<Option<Delivery>> {
        let state = self.core.queue(queue);
        loop {
            let notified = state.notify.notified();
            if let Some(message) = state.pop() {
                let ack_tag = self.core.next_tag.fetch_add(1, Ordering::Relaxed);
                self.core.unacked.insert(ack_tag, queue.to_string());
                return Ok(Some(Delivery {
                    queue: queue.to_string(),
                    payload: message.payload,
                    envelope: message.envelope,
                    ack_tag,
                }));
            }
            if self.core.closed.load(Ordering::SeqCst) {
                return Ok(None);
            }
            notified.await;
        }
    }

    async fn ack(&self, ack_tag: u64) -> Result<()> {
        if self.core.unacked.remove(&ack_tag).is_none() {
            debug!(ack_tag, "ack for unknown tag ignored");
        }
        Ok(())
    }

    async fn declare_ephemeral_queue(&self) -> Result<String> {
        let name = format!("reply.{}", Uuid::new_v4().simple());
        self.core.queue(&name);
        Ok(name)
    }

    async fn delete_queue(&self, queue: &str) -> Result<()> {
        self.core.queues.remove(queue);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_publish_consume_ack() {
        let broker = MemoryBroker::new();
        let channel = broker.channel();

        channel
            .publish("rides", &Envelope::default(), b"payload")
            .await
            .unwrap();
        assert_eq!(broker.queue_depth("rides"), 1);
        assert_eq!(broker.published_total(), 1);

        let delivery = channel.next_delivery("rides").await.unwrap().unwrap();
        assert_eq!(delivery.payload, b"payload");
        assert_eq!(broker.queue_depth("rides"), 0);
        assert_eq!(broker.unacked_count(), 1);

        channel.ack(delivery.ack_tag).await.unwrap();
        assert_eq!(broker.unacked_count(), 0);
    }

    #[tokio::test]
    async fn test_envelope_travels_with_the_message() {
        let broker = MemoryBroker::new();
        let channel = broker.channel();

        let envelope = Envelope::with_correlation("abc-123", "reply.q");
        channel.publish("queries", &envelope, b"{}").await.unwrap();

        let delivery = channel.next_delivery("queries").await.unwrap().unwrap();
        assert_eq!(delivery.envelope.correlation_id.as_deref(), Some("abc-123"));
        assert_eq!(delivery.envelope.reply_to.as_deref(), Some("reply.q"));
    }

    #[tokio::test]
    async fn test_consumer_blocks_until_publish() {
        let broker = MemoryBroker::new();
        let channel = broker.channel();
        let consumer = broker.channel();

        let waiter = tokio::spawn(async move { consumer.next_delivery("rides").await });

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        channel
            .publish("rides", &Envelope::default(), b"late")
            .await
            .unwrap();
        let delivery = waiter.await.unwrap().unwrap().unwrap();
        assert_eq!(delivery.payload, b"late");
    }

    #[tokio::test]
    async fn test_close_drains_then_ends_stream() {
        let broker = MemoryBroker::new();
        let channel = broker.channel();

        channel
            .publish("rides", &Envelope::default(), b"one")
            .await
            .unwrap();
        broker.close();

        assert!(channel.next_delivery("rides").await.unwrap().is_some());
        assert!(channel.next_delivery("rides").await.unwrap().is_none());
        assert!(channel
            .publish("rides", &Envelope::default(), b"two")
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_ephemeral_queue_lifecycle() {
        let broker = MemoryBroker::new();
        let channel = broker.channel();

        let name = channel.declare_ephemeral_queue().await.unwrap();
        assert!(name.starts_with("reply."));
        channel
            .publish(&name, &Envelope::default(), b"r")
            .await
            .unwrap();
        assert_eq!(broker.queue_depth(&name), 1);

        channel.delete_queue(&name).await.unwrap();
        assert_eq!(broker.queue_depth(&name), 0);
    }

    #[tokio::test]
    async fn test_multiple_consumers_share_a_queue() {
        let broker = MemoryBroker::new();
        let publisher = broker.channel();
        for i in 0..10u8 {
            publisher
                .publish("rides", &Envelope::default(), &[i])
                .await
                .unwrap();
        }

        let a = broker.channel();
        let b = broker.channel();
        let mut seen = Vec::new();
        for _ in 0..5 {
            seen.push(a.next_delivery("rides").await.unwrap().unwrap().payload[0]);
            seen.push(b.next_delivery("rides").await.unwrap().unwrap().payload[0]);
        }
        seen.sort_unstable();
        assert_eq!(seen, (0..10).collect::<Vec<u8>>());
    }
}
