//! Query correlation protocol
//!
//! Synchronous request/reply over the asynchronous broker. A caller
//! publishes a request tagged with a fresh correlation id and a reply
//! destination, then blocks with a timeout until the matching reply
//! arrives. Two topologies are supported: a private ephemeral reply queue
//! per request, or one shared reply queue routed by a dispatch table of
//! per-correlation oneshot waiters. Unmatched replies are discarded.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{timeout, Instant};
use tracing::{debug, error, warn};
use uuid::Uuid;

use slopestream_types::{PipelineError, Result};

use crate::channel::{BrokerChannel, Envelope};
use crate::pool::ChannelPool;

/// Reply-destination topology
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplyTopology {
    /// Private, ephemeral reply queue per request
    Exclusive,
    /// One reply queue shared by all callers on the process
    Shared { reply_queue: String },
}

/// RPC client configuration
#[derive(Debug, Clone)]
pub struct RpcConfig {
    /// Queue the requests are published to
    pub request_queue: String,
    pub topology: ReplyTopology,
    /// Deadline for the reply; expiry surfaces as a timeout outcome
    pub timeout: Duration,
}

impl RpcConfig {
    pub fn shared(request_queue: impl Into<String>, reply_queue: impl Into<String>) -> Self {
        Self {
            request_queue: request_queue.into(),
            topology: ReplyTopology::Shared {
                reply_queue: reply_queue.into(),
            },
            timeout: Duration::from_secs(15),
        }
    }

    pub fn exclusive(request_queue: impl Into<String>) -> Self {
        Self {
            request_queue: request_queue.into(),
            topology: ReplyTopology::Exclusive,
            timeout: Duration::from_secs(15),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Caller side of the correlation protocol
pub struct RpcClient {
    pool: ChannelPool,
    config: RpcConfig,
    /// correlation id -> waiter, shared topology only
    pending: Arc<DashMap<String, oneshot::Sender<Vec<u8>>>>,
}

impl RpcClient {
    pub fn new(pool: ChannelPool, config: RpcConfig) -> Self {
        Self {
            pool,
            config,
            pending: Arc::new(DashMap::new()),
        }
    }

    /// Waiters currently blocked on a reply (shared topology)
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Start the background reply pump for the shared topology.
    ///
    /// The pump consumes the shared reply queue and resolves exactly one
    /// waiter per correlation id; replies with an unknown or already
    /// resolved id are discarded without error propagation.
    pub fn start_reply_pump(&self, channel: Arc<dyn BrokerChannel>) -> JoinHandle<()> {
        let reply_queue = match &self.config.topology {
            ReplyTopology::Shared { reply_queue } => reply_queue.clone(),
            ReplyTopology::Exclusive => {
                warn!("reply pump started for exclusive topology; it will idle");
                String::new()
            }
        };
        let pending = self.pending.clone();

        tokio::spawn(async move {
            if reply_queue.is_empty() {
                return;
            }
            loop {
                match channel.next_delivery(&reply_queue).await {
                    Ok(Some(delivery)) => {
                        if let Err(err) = channel.ack(delivery.ack_tag).await {
                            error!(error = %err, "failed to ack reply");
                        }
                        match delivery.envelope.correlation_id {
                            Some(correlation_id) => match pending.remove(&correlation_id) {
                                Some((_, waiter)) => {
                                    if waiter.send(delivery.payload).is_err() {
                                        debug!(
                                            %correlation_id,
                                            "waiter already gone, reply discarded"
                                        );
                                    }
                                }
                                None => {
                                    debug!(
                                        %correlation_id,
                                        "discarding reply with unknown correlation id"
                                    );
                                }
                            },
                            None => warn!("reply without correlation id discarded"),
                        }
                    }
                    Ok(None) => break,
                    Err(err) => {
                        error!(error = %err, "reply pump stopped on broker error");
                        break;
                    }
                }
            }
        })
    }

    /// Publish a request and block until its reply arrives or the deadline
    /// expires. The borrowed channel is returned to the pool on every exit
    /// path.
    pub async fn call(&self, payload: &[u8]) -> Result<Vec<u8>> {
        match self.config.topology.clone() {
            ReplyTopology::Shared { reply_queue } => self.call_shared(payload, &reply_queue).await,
            ReplyTopology::Exclusive => self.call_exclusive(payload).await,
        }
    }

    async fn call_shared(&self, payload: &[u8], reply_queue: &str) -> Result<Vec<u8>> {
        let correlation_id = Uuid::new_v4().to_string();
        let (waiter, reply) = oneshot::channel();
        self.pending.insert(correlation_id.clone(), waiter);

        let published = async {
            let channel = self.pool.acquire().await?;
            channel
                .publish(
                    &self.config.request_queue,
                    &Envelope::with_correlation(correlation_id.clone(), reply_queue),
                    payload,
                )
                .await
        }
        .await;

        if let Err(err) = published {
            self.pending.remove(&correlation_id);
            return Err(err);
        }

        match timeout(self.config.timeout, reply).await {
            Ok(Ok(bytes)) => Ok(bytes),
            Ok(Err(_)) => {
                self.pending.remove(&correlation_id);
                Err(PipelineError::Broker("reply pump stopped".into()))
            }
            Err(_) => {
                // A late reply now matches no pending waiter and is discarded.
                self.pending.remove(&correlation_id);
                Err(PipelineError::Timeout {
                    waited_ms: self.config.timeout.as_millis() as u64,
                })
            }
        }
    }

    async fn call_exclusive(&self, payload: &[u8]) -> Result<Vec<u8>> {
        let channel = self.pool.acquire().await?;
        let reply_queue = channel.declare_ephemeral_queue().await?;

        let result = self
            .exclusive_round_trip(&*channel, &reply_queue, payload)
            .await;

        // Teardown on success, timeout and error alike.
        if let Err(err) = channel.delete_queue(&reply_queue).await {
            warn!(error = %err, %reply_queue, "failed to tear down reply queue");
        }
        result
    }

    async fn exclusive_round_trip(
        &self,
        channel: &dyn BrokerChannel,
        reply_queue: &str,
        payload: &[u8],
    ) -> Result<Vec<u8>> {
        let correlation_id = Uuid::new_v4().to_string();
        channel
            .publish(
                &self.config.request_queue,
                &Envelope::with_correlation(correlation_id.clone(), reply_queue),
                payload,
            )
            .await?;

        let deadline = Instant::now() + self.config.timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(PipelineError::Timeout {
                    waited_ms: self.config.timeout.as_millis() as u64,
                });
            }
            match timeout(remaining, channel.next_delivery(reply_queue)).await {
                Ok(Ok(Some(delivery))) => {
                    channel.ack(delivery.ack_tag).await?;
                    if delivery.envelope.correlation_id.as_deref() == Some(correlation_id.as_str()) {
                        return Ok(delivery.payload);
                    }
                    debug!("discarding mismatched reply on exclusive queue");
                }
                Ok(Ok(None)) => return Err(PipelineError::Broker("broker closed".into())),
                Ok(Err(err)) => return Err(err),
                Err(_) => {
                    return Err(PipelineError::Timeout {
                        waited_ms: self.config.timeout.as_millis() as u64,
                    })
                }
            }
        }
    }
}
