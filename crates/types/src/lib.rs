//! Core types and data models for slopestream
//!
//! This crate provides the fundamental data structures shared across the
//! lift-ride pipeline: the event record and its boundary validation, the
//! durable-store key scheme, the query request/reply wire shapes, the
//! per-attempt request metrics, the shared error taxonomy and the
//! retry-with-backoff executor.

pub mod errors;
pub mod events;
pub mod keys;
pub mod metrics;
pub mod queries;
pub mod retry;

pub use errors::{PipelineError, Result};
pub use events::{parse_ride_path, LiftRideEvent};
pub use keys::RideRecord;
pub use metrics::{RequestKind, RequestMetrics};
pub use queries::{QueryReply, QueryRequest, SeasonVertical};
pub use retry::{RetryExecutor, RetryOutcome, RetryPolicy};
