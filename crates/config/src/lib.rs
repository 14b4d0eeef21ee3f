//! Configuration management for slopestream
//!
//! Loads a YAML file merged with `SLOPESTREAM_`-prefixed environment
//! overrides. Defaults reproduce the tuning of the reference load runs.

use figment::{
    providers::{Env, Format, Yaml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    LoadError(String),

    #[error("invalid configuration: {0}")]
    ValidationError(String),
}

pub type Result<T> = std::result::Result<T, ConfigError>;

/// Top-level pipeline configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SlopestreamConfig {
    /// HTTP gateway settings
    #[serde(default)]
    pub gateway: GatewayConfig,

    /// Broker connectivity and queue names
    #[serde(default)]
    pub broker: BrokerConfig,

    /// Read-path cache settings
    #[serde(default)]
    pub cache: CacheConfig,

    /// Batched persistence and query consumer settings
    #[serde(default)]
    pub consumer: ConsumerConfig,

    /// Load generator settings
    #[serde(default)]
    pub loadgen: LoadgenConfig,
}

impl SlopestreamConfig {
    /// Load configuration from file and environment
    pub fn load(config_path: Option<PathBuf>) -> Result<Self> {
        let mut figment = Figment::new();

        if let Some(path) = config_path {
            figment = figment.merge(Yaml::file(path));
        }

        figment = figment.merge(Env::prefixed("SLOPESTREAM_").split("__"));

        let config: Self = figment
            .extract()
            .map_err(|e| ConfigError::LoadError(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.gateway.port == 0 {
            return Err(ConfigError::ValidationError("invalid gateway port".into()));
        }
        if self.broker.brokers.is_empty() {
            return Err(ConfigError::ValidationError(
                "broker address list required".into(),
            ));
        }
        if self.broker.gateway_pool_size == 0 || self.broker.consumer_pool_size == 0 {
            return Err(ConfigError::ValidationError(
                "channel pool sizes must be positive".into(),
            ));
        }
        if self.consumer.batch_size == 0 {
            return Err(ConfigError::ValidationError(
                "consumer batch size must be positive".into(),
            ));
        }
        self.loadgen.validate()
    }
}

/// HTTP gateway settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    pub host: String,
    pub port: u16,
    /// Deadline for a broker-backed read query, in seconds
    pub rpc_timeout_secs: u64,
    /// Reply topology: one ephemeral queue per request, or one shared queue
    pub reply_topology: ReplyTopologyKind,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            rpc_timeout_secs: 15,
            reply_topology: ReplyTopologyKind::Shared,
        }
    }
}

/// Reply-queue topology for the query correlation protocol
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ReplyTopologyKind {
    Exclusive,
    Shared,
}

/// Broker backend selector
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum BrokerKind {
    Memory,
    Kafka,
}

/// Broker connectivity and queue names
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrokerConfig {
    pub kind: BrokerKind,
    /// Broker addresses (comma-separated for kafka)
    pub brokers: String,
    pub write_queue: String,
    pub query_queue: String,
    pub reply_queue: String,
    pub group_id: String,
    /// Channel pool size on the gateway side
    pub gateway_pool_size: usize,
    /// Channel pool size on the consumer side
    pub consumer_pool_size: usize,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            kind: BrokerKind::Memory,
            brokers: "localhost:9092".to_string(),
            write_queue: "skiers.rides".to_string(),
            query_queue: "skiers.queries".to_string(),
            reply_queue: "skiers.replies".to_string(),
            group_id: "slopestream-consumer".to_string(),
            gateway_pool_size: 200,
            consumer_pool_size: 100,
        }
    }
}

/// Cache backend selector
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CacheKind {
    Memory,
    Redis,
}

/// Read-path cache settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    pub kind: CacheKind,
    pub url: String,
    /// Per-entry expiry, in seconds
    pub ttl_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            kind: CacheKind::Memory,
            url: "redis://localhost:6379".to_string(),
            ttl_secs: 900,
        }
    }
}

/// Batched persistence and query consumer settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsumerConfig {
    /// Events accumulated per store commit
    pub batch_size: usize,
    pub write_workers: usize,
    pub query_workers: usize,
    /// Retries per batch commit
    pub max_retries: u32,
    /// First commit-retry delay; doubles per retry
    pub initial_backoff_ms: u64,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            batch_size: 25,
            write_workers: 8,
            query_workers: 8,
            max_retries: 5,
            initial_backoff_ms: 100,
        }
    }
}

/// Load generator settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoadgenConfig {
    /// Gateway base URL the generator posts against
    pub target_url: String,
    pub total_requests: u64,
    pub initial_workers: usize,
    pub max_workers: usize,
    /// Events per worker in the ramp-up phase
    pub initial_batch: usize,
    /// Events per worker in the steady phase
    pub steady_batch: usize,
    pub max_retries: u32,
    pub queue_capacity: usize,
    /// Live workers allowed beyond the ceiling before submitters block
    pub worker_overrun: usize,
    pub metrics_path: String,
    #[serde(default)]
    pub generator: GeneratorRanges,
}

impl Default for LoadgenConfig {
    fn default() -> Self {
        Self {
            target_url: "http://localhost:8080".to_string(),
            total_requests: 200_000,
            initial_workers: 32,
            max_workers: 200,
            initial_batch: 1000,
            steady_batch: 1500,
            max_retries: 5,
            queue_capacity: 50_000,
            worker_overrun: 20,
            metrics_path: "request_metrics.csv".to_string(),
            generator: GeneratorRanges::default(),
        }
    }
}

impl LoadgenConfig {
    fn validate(&self) -> Result<()> {
        if self.max_workers == 0 {
            return Err(ConfigError::ValidationError(
                "loadgen worker ceiling must be positive".into(),
            ));
        }
        if self.initial_workers > self.max_workers {
            return Err(ConfigError::ValidationError(
                "loadgen initial workers exceed the ceiling".into(),
            ));
        }
        if self.queue_capacity == 0 {
            return Err(ConfigError::ValidationError(
                "loadgen queue capacity must be positive".into(),
            ));
        }
        Ok(())
    }
}

/// Inclusive value ranges for synthetic event generation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneratorRanges {
    pub skier_min: u32,
    pub skier_max: u32,
    pub resort_id: u32,
    pub season_id: u16,
    pub day_id: u16,
    pub lift_min: u32,
    pub lift_max: u32,
    pub time_min: u16,
    pub time_max: u16,
}

impl Default for GeneratorRanges {
    fn default() -> Self {
        Self {
            skier_min: 1,
            skier_max: 100_000,
            resort_id: 1,
            season_id: 2024,
            day_id: 3,
            lift_min: 1,
            lift_max: 40,
            time_min: 1,
            time_max: 360,
        }
    }
}
