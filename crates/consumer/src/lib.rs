//! Broker consumers for slopestream
//!
//! The write side drains the ride queue into fixed-size batches and
//! commits each batch to the durable store with bounded, backed-off
//! retries, acknowledging broker messages only after a commit attempt
//! concludes. The read side serves the three query kinds cache-aside and
//! replies through the correlation envelope.

pub mod query;
pub mod write;

pub use query::{QueryConsumer, QueryConsumerConfig, QueryConsumerStats};
pub use write::{WriteConsumer, WriteConsumerConfig, WriteConsumerStats};
