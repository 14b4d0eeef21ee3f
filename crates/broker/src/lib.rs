//! Broker seam for slopestream
//!
//! This crate isolates everything that touches the message broker: the
//! `BrokerChannel` trait with at-least-once delivery and explicit
//! acknowledgment, a bounded reusable channel pool, an in-memory broker
//! used by tests and local runs, a Kafka-backed production binding, and
//! the synchronous request/reply overlay (correlation ids + timeouts)
//! layered on top of the asynchronous broker.

pub mod channel;
pub mod kafka;
pub mod memory;
pub mod pool;
pub mod rpc;

pub use channel::{BrokerChannel, Delivery, Envelope};
pub use kafka::{KafkaChannel, KafkaChannelConfig};
pub use memory::MemoryBroker;
pub use pool::{ChannelPool, PooledChannel};
pub use rpc::{ReplyTopology, RpcClient, RpcConfig};
