//! Kafka binding for the channel seam
//!
//! Maps the broker abstractions onto Kafka: a queue is a topic, an ack is
//! a manual offset commit, and the correlation envelope travels as message
//! headers. Ephemeral reply queues become uniquely named reply topics.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::message::{Header, Headers, OwnedHeaders};
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::util::Timeout;
use rdkafka::{Message, Offset, TopicPartitionList};
use tracing::{debug, info};
use uuid::Uuid;

use slopestream_types::{PipelineError, Result};

use crate::channel::{BrokerChannel, Delivery, Envelope};

const CORRELATION_ID_HEADER: &str = "correlation-id";
const REPLY_TO_HEADER: &str = "reply-to";

/// Kafka channel configuration
#[derive(Debug, Clone)]
pub struct KafkaChannelConfig {
    /// Bootstrap servers (comma-separated)
    pub brokers: String,
    /// Consumer group id
    pub group_id: String,
    /// Client id for this channel
    pub client_id: String,
    /// Timeout for sending messages (milliseconds)
    pub send_timeout_ms: u64,
}

impl Default for KafkaChannelConfig {
    fn default() -> Self {
        Self {
            brokers: "localhost:9092".to_string(),
            group_id: "slopestream-consumer".to_string(),
            client_id: "slopestream".to_string(),
            send_timeout_ms: 30_000,
        }
    }
}

/// A broker channel backed by one Kafka producer plus one consumer per
/// consumed topic
pub struct KafkaChannel {
    producer: FutureProducer,
    config: KafkaChannelConfig,
    consumers: DashMap<String, Arc<StreamConsumer>>,
    /// ack tag -> (topic, partition, offset) awaiting commit
    offsets: DashMap<u64, (String, i32, i64)>,
    next_tag: AtomicU64,
}

impl KafkaChannel {
    pub fn new(config: KafkaChannelConfig) -> Result<Self> {
        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", &config.brokers)
            .set("client.id", &config.client_id)
            .set("message.timeout.ms", config.send_timeout_ms.to_string())
            .create()
            .map_err(|e| PipelineError::Broker(e.to_string()))?;

        info!(brokers = %config.brokers, "kafka channel created");

        Ok(Self {
            producer,
            config,
            consumers: DashMap::new(),
            offsets: DashMap::new(),
            next_tag: AtomicU64::new(1),
        })
    }

    fn consumer_for(&self, queue: &str) -> Result<Arc<StreamConsumer>> {
        if let Some(consumer) = self.consumers.get(queue) {
            return Ok(Arc::clone(consumer.value()));
        }

        let consumer: StreamConsumer = ClientConfig::new()
            .set("bootstrap.servers", &self.config.brokers)
            .set("group.id", &self.config.group_id)
            .set("enable.auto.commit", "false")
            .set("auto.offset.reset", "earliest")
            .set("allow.auto.create.topics", "true")
            .create()
            .map_err(|e| PipelineError::Broker(e.to_string()))?;

        consumer
            .subscribe(&[queue])
            .map_err(|e| PipelineError::Broker(e.to_string()))?;

        let consumer = Arc::new(consumer);
        self.consumers.insert(queue.to_string(), consumer.clone());
        Ok(consumer)
    }
}

#[async_trait]
impl BrokerChannel for KafkaChannel {
    async fn publish(&self, queue: &str, envelope: &Envelope, payload: &[u8]) -> Result<()> {
        let mut headers = OwnedHeaders::new();
        if let Some(correlation_id) = &envelope.correlation_id {
            headers = headers.insert(Header {
                key: CORRELATION_ID_HEADER,
                value: Some(correlation_id.as_bytes()),
            });
        }
        if let Some(reply_to) = &envelope.reply_to {
            headers = headers.insert(Header {
                key: REPLY_TO_HEADER,
                value: Some(reply_to.as_bytes()),
            });
        }

        let record = FutureRecord::<(), [u8]>::to(queue)
            .payload(payload)
            .headers(headers);

        self.producer
            .send(
                record,
                Timeout::After(Duration::from_millis(self.config.send_timeout_ms)),
            )
            .await
            .map_err(|(err, _)| PipelineError::Broker(err.to_string()))?;
        Ok(())
    }

    async fn next_delivery(&self, queue: &str) -> Result<Option<Delivery>> {
        let consumer = self.consumer_for(queue)?;
        let message = consumer
            .recv()
            .await
            .map_err(|e| PipelineError::Broker(e.to_string()))?;

        let payload = message.payload().map(<[u8]>::to_vec).unwrap_or_default();
        let mut envelope = Envelope::default();
        if let Some(headers) = message.headers() {
            for header in headers.iter() {
                let value = header
                    .value
                    .map(|v| String::from_utf8_lossy(v).into_owned());
                match header.key {
                    CORRELATION_ID_HEADER => envelope.correlation_id = value,
                    REPLY_TO_HEADER => envelope.reply_to = value,
                    _ => {}
                }
            }
        }

        let ack_tag = self.next_tag.fetch_add(1, Ordering::Relaxed);
        self.offsets.insert(
            ack_tag,
            (message.topic().to_string(), message.partition(), message.offset()),
        );

        Ok(Some(Delivery {
            queue: queue.to_string(),
            payload,
            envelope,
            ack_tag,
        }))
    }

    async fn ack(&self, ack_tag: u64) -> Result<()> {
        let Some((_, (topic, partition, offset))) = self.offsets.remove(&ack_tag) else {
            debug!(ack_tag, "ack for unknown tag ignored");
            return Ok(());
        };
        let consumer = match self.consumers.get(&topic) {
            Some(entry) => Arc::clone(entry.value()),
            None => return Ok(()),
        };

        let mut tpl = TopicPartitionList::new();
        tpl.add_partition_offset(&topic, partition, Offset::Offset(offset + 1))
            .map_err(|e| PipelineError::Broker(e.to_string()))?;
        consumer
            .commit(&tpl, CommitMode::Async)
            .map_err(|e| PipelineError::Broker(e.to_string()))?;
        Ok(())
    }

    async fn declare_ephemeral_queue(&self) -> Result<String> {
        // Topics auto-create on first use; a unique name keeps replies private.
        Ok(format!("skiers.reply.{}", Uuid::new_v4().simple()))
    }

    async fn delete_queue(&self, queue: &str) -> Result<()> {
        // Topic deletion is an admin operation; dropping the consumer is
        // enough to stop reading the reply topic.
        self.consumers.remove(queue);
        Ok(())
    }
}
