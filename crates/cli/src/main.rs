//! slopestream CLI
//!
//! Runs the pipeline components: the HTTP gateway, the batched
//! persistence workers, the cache-aside query workers, and the synthetic
//! load generator.

mod commands;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use slopestream_config::SlopestreamConfig;

#[derive(Parser)]
#[command(
    name = "slopestream",
    version,
    about = "Lift-ride event pipeline: gateway, consumers and load generator"
)]
struct Cli {
    /// Path to a YAML configuration file
    #[arg(short, long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Log filter (overridable with SLOPESTREAM_LOG)
    #[arg(long, global = true, env = "SLOPESTREAM_LOG", default_value = "info")]
    log: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve the HTTP gateway
    Gateway,
    /// Run the batched persistence consumers
    Persist,
    /// Run the cache-aside query consumers
    Queries,
    /// Drive a synthetic load run against the gateway
    Loadgen {
        /// Override the configured total request budget
        #[arg(long)]
        total: Option<u64>,
        /// Override the configured gateway base URL
        #[arg(long)]
        target: Option<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_new(&cli.log)?)
        .init();

    let config = SlopestreamConfig::load(cli.config.clone())?;

    match cli.command {
        Commands::Gateway => commands::run_gateway(config).await,
        Commands::Persist => commands::run_persist(config).await,
        Commands::Queries => commands::run_queries(config).await,
        Commands::Loadgen { total, target } => {
            let mut config = config;
            if let Some(total) = total {
                config.loadgen.total_requests = total;
            }
            if let Some(target) = target {
                config.loadgen.target_url = target;
            }
            commands::run_loadgen(config).await
        }
    }
}
