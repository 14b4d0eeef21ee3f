//! Broker channel trait and message envelope

use async_trait::async_trait;

use slopestream_types::Result;

/// Correlation metadata carried as message properties, never body fields
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Envelope {
    /// Opaque token linking a reply to its originating request
    pub correlation_id: Option<String>,
    /// Destination queue for the reply
    pub reply_to: Option<String>,
}

impl Envelope {
    pub fn with_correlation(correlation_id: impl Into<String>, reply_to: impl Into<String>) -> Self {
        Self {
            correlation_id: Some(correlation_id.into()),
            reply_to: Some(reply_to.into()),
        }
    }
}

/// One message handed to a consumer, unacknowledged until `ack` is called
#[derive(Debug, Clone)]
pub struct Delivery {
    pub queue: String,
    pub payload: Vec<u8>,
    pub envelope: Envelope,
    /// Tag passed back to [`BrokerChannel::ack`]
    pub ack_tag: u64,
}

/// A reusable broker channel.
///
/// Implementations provide at-least-once delivery with explicit consumer
/// acknowledgment; a delivery that is never acked is eligible for
/// redelivery by the broker. Channels are shared through the
/// [`crate::ChannelPool`] and must tolerate concurrent use.
#[async_trait]
pub trait BrokerChannel: Send + Sync {
    /// Publish a payload to a queue with its correlation envelope
    async fn publish(&self, queue: &str, envelope: &Envelope, payload: &[u8]) -> Result<()>;

    /// Blocking pull of the next delivery from a queue.
    ///
    /// Returns `Ok(None)` once the broker is closed and the queue drained.
    async fn next_delivery(&self, queue: &str) -> Result<Option<Delivery>>;

    /// Acknowledge a delivery. Acking an unknown tag is a no-op.
    async fn ack(&self, ack_tag: u64) -> Result<()>;

    /// Declare a private, auto-named reply queue for one request
    async fn declare_ephemeral_queue(&self) -> Result<String>;

    /// Tear down a queue created by [`Self::declare_ephemeral_queue`]
    async fn delete_queue(&self, queue: &str) -> Result<()>;
}
