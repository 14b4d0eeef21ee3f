//! Subcommand wiring

use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use colored::Colorize;
use tokio::sync::mpsc;
use tracing::{info, warn};

use slopestream_broker::{
    BrokerChannel, ChannelPool, KafkaChannel, KafkaChannelConfig, MemoryBroker, RpcClient,
    RpcConfig,
};
use slopestream_config::{
    BrokerConfig, BrokerKind, CacheKind, ReplyTopologyKind, SlopestreamConfig,
};
use slopestream_consumer::{
    QueryConsumer, QueryConsumerConfig, WriteConsumer, WriteConsumerConfig,
};
use slopestream_gateway::{router, serve, AppState};
use slopestream_loadgen::{
    write_metrics_csv, AdaptiveDispatcher, DispatcherConfig, EventGenerator, GeneratorConfig,
    HttpRideTarget, LatencySummary,
};
use slopestream_storage::{
    MemoryCache, MemoryRideStore, QueryCache, RedisCache, RedisCacheConfig,
};

/// Build `count` channels against the configured broker
fn make_channels(
    config: &BrokerConfig,
    count: usize,
) -> anyhow::Result<Vec<Arc<dyn BrokerChannel>>> {
    match config.kind {
        BrokerKind::Memory => {
            // Single-process demo broker: consumers and the gateway must
            // share one process for the queues to connect.
            warn!("memory broker selected; queues exist only inside this process");
            let broker = MemoryBroker::new();
            Ok((0..count).map(|_| broker.channel()).collect())
        }
        BrokerKind::Kafka => (0..count)
            .map(|i| {
                let channel = KafkaChannel::new(KafkaChannelConfig {
                    brokers: config.brokers.clone(),
                    group_id: config.group_id.clone(),
                    client_id: format!("slopestream-{i}"),
                    ..KafkaChannelConfig::default()
                })?;
                Ok(Arc::new(channel) as Arc<dyn BrokerChannel>)
            })
            .collect::<Result<_, slopestream_types::PipelineError>>()
            .context("failed to create kafka channels"),
    }
}

fn rpc_config(config: &SlopestreamConfig) -> RpcConfig {
    let timeout = Duration::from_secs(config.gateway.rpc_timeout_secs);
    match config.gateway.reply_topology {
        ReplyTopologyKind::Shared => {
            RpcConfig::shared(&config.broker.query_queue, &config.broker.reply_queue)
                .with_timeout(timeout)
        }
        ReplyTopologyKind::Exclusive => {
            RpcConfig::exclusive(&config.broker.query_queue).with_timeout(timeout)
        }
    }
}

pub async fn run_gateway(config: SlopestreamConfig) -> anyhow::Result<()> {
    let mut channels = make_channels(&config.broker, config.broker.gateway_pool_size * 2 + 1)?;
    let pump_channel = channels
        .pop()
        .context("gateway pool configuration yielded no channels")?;
    let rpc_channels = channels.split_off(config.broker.gateway_pool_size);

    let rpc = RpcClient::new(ChannelPool::new(rpc_channels), rpc_config(&config));
    if config.gateway.reply_topology == ReplyTopologyKind::Shared {
        // Detached: the pump lives as long as the process.
        let _ = rpc.start_reply_pump(pump_channel);
    }

    let state = Arc::new(AppState::new(
        ChannelPool::new(channels),
        rpc,
        config.broker.write_queue.clone(),
    ));

    let addr: SocketAddr = format!("{}:{}", config.gateway.host, config.gateway.port)
        .parse()
        .context("invalid gateway bind address")?;
    serve(router(state), addr).await?;
    Ok(())
}

pub async fn run_persist(config: SlopestreamConfig) -> anyhow::Result<()> {
    let channels = make_channels(&config.broker, config.broker.consumer_pool_size)?;
    let pool = ChannelPool::new(channels);
    let store = Arc::new(MemoryRideStore::new());

    let consumer_config = WriteConsumerConfig {
        queue: config.broker.write_queue.clone(),
        batch_size: config.consumer.batch_size,
        max_retries: config.consumer.max_retries,
        initial_backoff: Duration::from_millis(config.consumer.initial_backoff_ms),
    };

    info!(workers = config.consumer.write_workers, "starting persistence consumers");
    let mut workers = Vec::new();
    for _ in 0..config.consumer.write_workers {
        let consumer = WriteConsumer::new(
            pool.acquire().await?,
            store.clone(),
            consumer_config.clone(),
        );
        workers.push(tokio::spawn(async move { consumer.run().await }));
    }
    for worker in workers {
        worker.await??;
    }
    Ok(())
}

pub async fn run_queries(config: SlopestreamConfig) -> anyhow::Result<()> {
    let channels = make_channels(&config.broker, config.broker.consumer_pool_size)?;
    let pool = ChannelPool::new(channels);
    let store = Arc::new(MemoryRideStore::new());

    let cache: Arc<dyn QueryCache> = match config.cache.kind {
        CacheKind::Memory => Arc::new(MemoryCache::new()),
        CacheKind::Redis => Arc::new(
            RedisCache::connect(RedisCacheConfig {
                url: config.cache.url.clone(),
                ..RedisCacheConfig::default()
            })
            .await?,
        ),
    };

    let consumer_config = QueryConsumerConfig {
        queue: config.broker.query_queue.clone(),
        cache_ttl: Duration::from_secs(config.cache.ttl_secs),
    };

    info!(workers = config.consumer.query_workers, "starting query consumers");
    let mut workers = Vec::new();
    for _ in 0..config.consumer.query_workers {
        let consumer = QueryConsumer::new(
            pool.acquire().await?,
            store.clone(),
            cache.clone(),
            consumer_config.clone(),
        );
        workers.push(tokio::spawn(async move { consumer.run().await }));
    }
    for worker in workers {
        worker.await??;
    }
    Ok(())
}

pub async fn run_loadgen(config: SlopestreamConfig) -> anyhow::Result<()> {
    let loadgen = &config.loadgen;
    let generator = EventGenerator::new(GeneratorConfig {
        skier_min: loadgen.generator.skier_min,
        skier_max: loadgen.generator.skier_max,
        resort_id: loadgen.generator.resort_id,
        season_id: loadgen.generator.season_id,
        day_id: loadgen.generator.day_id,
        lift_min: loadgen.generator.lift_min,
        lift_max: loadgen.generator.lift_max,
        time_min: loadgen.generator.time_min,
        time_max: loadgen.generator.time_max,
    });

    let (queue_tx, queue_rx) = mpsc::channel(loadgen.queue_capacity);
    let total = loadgen.total_requests;
    let producer = {
        let generator = generator.clone();
        tokio::spawn(async move { generator.produce(queue_tx, total).await })
    };

    let dispatcher = AdaptiveDispatcher::new(
        DispatcherConfig {
            total_requests: loadgen.total_requests,
            initial_workers: loadgen.initial_workers,
            max_workers: loadgen.max_workers,
            initial_batch: loadgen.initial_batch,
            steady_batch: loadgen.steady_batch,
            max_retries: loadgen.max_retries,
            worker_overrun: loadgen.worker_overrun,
        },
        Arc::new(HttpRideTarget::new(&loadgen.target_url)),
    );

    let report = dispatcher.run(queue_rx).await;
    producer.await??;

    write_metrics_csv(Path::new(&loadgen.metrics_path), &report.metrics)
        .context("failed to write metrics artifact")?;
    info!(path = %loadgen.metrics_path, rows = report.metrics.len(), "metrics written");

    match LatencySummary::compute(&report) {
        Some(summary) => print_summary(loadgen.max_workers, &summary),
        None => println!("{}", "no requests were dispatched".yellow()),
    }
    Ok(())
}

fn print_summary(max_workers: usize, summary: &LatencySummary) {
    let rule = "-".repeat(72);
    println!("{}", rule.dimmed());
    println!("Worker ceiling:                  {max_workers}");
    println!("Total run time:                  {} ms", summary.wall_time_ms);
    println!("Total requests:                  {}", summary.total_requests);
    let failed = summary.failed_requests.to_string();
    println!(
        "Unsuccessful requests:           {}",
        if summary.failed_requests > 0 {
            failed.red()
        } else {
            failed.green()
        }
    );
    println!(
        "Throughput:                      {:.2} requests/second",
        summary.throughput_rps
    );
    println!("Mean response time:              {:.2} ms", summary.mean_ms);
    println!("Median response time:            {:.2} ms", summary.median_ms);
    println!("99th percentile response time:   {:.2} ms", summary.p99_ms);
    println!("Min response time:               {} ms", summary.min_ms);
    println!("Max response time:               {} ms", summary.max_ms);
    println!("{}", rule.dimmed());
}
