//! Market-data fan-out
//!
//! # Roles
//! - **worker**: Binance kline ingestion into the bus
//! - **gateway**: client WebSocket server fed from the bus
//! - **standalone**: both in one process over an in-memory bus

use anyhow::{bail, Context};
use clap::{Parser, ValueEnum};
use market_fanout::bus::{Bus, MemoryBus, RedisBus};
use market_fanout::engine::IngestWorker;
use market_fanout::exchanges::ReadLoopExit;
use market_fanout::gateway::{self, FanoutSettings};
use market_fanout::infrastructure::logging::init_logging;
use market_fanout::infrastructure::shutdown::os_signal;
use market_fanout::infrastructure::{BusBackend, MetricsCollector, Shutdown, ShutdownSignal};
use market_fanout::Config;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;

#[derive(Parser)]
#[command(name = "market-fanout", version, about = "Kline ingestion and WebSocket fan-out")]
struct Cli {
    /// Process role
    #[arg(value_enum)]
    role: Role,

    /// Config file, overrides CONFIG_PATH
    #[arg(long)]
    config: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Role {
    Worker,
    Gateway,
    Standalone,
}

impl Role {
    fn as_str(self) -> &'static str {
        match self {
            Role::Worker => "worker",
            Role::Gateway => "gateway",
            Role::Standalone => "standalone",
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => Config::load_from(path),
        None => Config::load(),
    }
    .context("Failed to load configuration")?;

    let _log_guards =
        init_logging(&config.logging, cli.role.as_str()).context("Failed to initialize logging")?;

    let shutdown = Shutdown::new();
    let signal = shutdown.subscribe();
    tokio::spawn(async move {
        os_signal().await;
        tracing::info!("Shutdown requested");
        shutdown.trigger();
    });

    let metrics = Arc::new(MetricsCollector::new());
    tracing::info!("Starting market-fanout as {}", cli.role.as_str());

    match cli.role {
        Role::Worker => match config.bus.backend {
            BusBackend::Redis => {
                let bus = Arc::new(RedisBus::connect(&config.bus.redis_url).await?);
                run_worker(&config, bus, metrics, signal).await
            }
            BusBackend::Memory => {
                tracing::warn!("Worker on the in-memory bus: no other process will see its events");
                let bus = Arc::new(MemoryBus::new(config.bus.memory_capacity));
                run_worker(&config, bus, metrics, signal).await
            }
        },
        Role::Gateway => match config.bus.backend {
            BusBackend::Redis => {
                let bus = Arc::new(RedisBus::connect(&config.bus.redis_url).await?);
                run_gateway(&config, bus, metrics, signal).await
            }
            BusBackend::Memory => {
                tracing::warn!("Gateway on the in-memory bus: only local publishers are visible");
                let bus = Arc::new(MemoryBus::new(config.bus.memory_capacity));
                run_gateway(&config, bus, metrics, signal).await
            }
        },
        Role::Standalone => {
            let bus = Arc::new(MemoryBus::new(config.bus.memory_capacity));
            tokio::try_join!(
                run_worker(&config, bus.clone(), metrics.clone(), signal.clone()),
                run_gateway(&config, bus, metrics, signal),
            )?;
            Ok(())
        }
    }
}

async fn run_worker<B: Bus>(
    config: &Config,
    bus: Arc<B>,
    metrics: Arc<MetricsCollector>,
    signal: ShutdownSignal,
) -> anyhow::Result<()> {
    let worker = IngestWorker::new(
        config.upstream.clone(),
        config.discovery.clone(),
        bus,
        metrics,
    );

    match worker.run(signal).await? {
        ReadLoopExit::Cancelled => Ok(()),
        ReadLoopExit::Closed => bail!("Upstream closed the stream"),
    }
}

async fn run_gateway<B: Bus>(
    config: &Config,
    bus: Arc<B>,
    metrics: Arc<MetricsCollector>,
    signal: ShutdownSignal,
) -> anyhow::Result<()> {
    let listener = TcpListener::bind(&config.gateway.bind_addr)
        .await
        .with_context(|| format!("Failed to bind {}", config.gateway.bind_addr))?;
    tracing::info!("Gateway listening on {}", config.gateway.bind_addr);

    let settings = FanoutSettings::from(&config.gateway);
    gateway::server::serve(listener, bus, settings, metrics, signal).await?;
    Ok(())
}
