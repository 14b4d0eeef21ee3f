//! Load generator for slopestream
//!
//! Produces synthetic lift-ride events into a bounded work queue and
//! drains it with an adaptive worker pool: a small initial worker count
//! ramps toward a ceiling as workers complete their batches, under a
//! fixed total-request budget and a bounded retry policy. One metrics row
//! is recorded per dispatch attempt; the run ends with a latency summary
//! and a CSV artifact.

pub mod dispatcher;
pub mod generator;
pub mod http;
pub mod report;

pub use dispatcher::{
    AdaptiveDispatcher, DispatchReport, DispatcherConfig, RideDispatcher,
};
pub use generator::{EventGenerator, GeneratorConfig};
pub use http::HttpRideTarget;
pub use report::{write_metrics_csv, LatencySummary};
