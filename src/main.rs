//! zk-balancer
//!
//! Forwards each client request to one backend chosen round-robin from the
//! set of healthy backends listed in a coordination service.
//!
//! # Architecture Overview
//!
//! ```text
//!                  ┌───────────────────────────────────────────────────┐
//!                  │                    BALANCER                       │
//!   Client         │  ┌──────────┐   ┌────────────┐   ┌─────────────┐  │
//!   ───────────────┼─▶│ listener │──▶│ dispatcher │──▶│ backend pool│──┼──▶ Backends
//!   ◀──────────────┼──│          │◀──│            │◀──│ round-robin │◀─┼─── (persistent
//!                  │  └──────────┘   └────────────┘   └──────▲──────┘  │     connections)
//!                  │                                        │         │
//!                  │  ┌──────────────┐  events  ┌────────────┴──────┐  │
//!   Coordination ──┼─▶│ membership   │─────────▶│  synchronizer     │  │
//!   /servers       │  │ watcher      │          │  reconnect sweep  │  │
//!   /balancers  ◀──┼──│ registration │          └───────────────────┘  │
//!                  │  └──────────────┘                                 │
//!                  └───────────────────────────────────────────────────┘
//! ```
//!
//! With `coordination.connect_string` set the balancer joins that ZooKeeper
//! ensemble. Without it the binary runs standalone: it hosts an in-process
//! ensemble and publishes the configured seed servers into it.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;

use zk_balancer::config::loader::{load_config, ConfigError};
use zk_balancer::config::validation::validate_config;
use zk_balancer::config::{BalancerConfig, CoordinationConfig};
use zk_balancer::coordination::{
    join_path, CoordinationError, Coordinator, MemoryEnsemble, MemorySession, ZooKeeperSession,
};
use zk_balancer::lifecycle::{self, signals, Shutdown};
use zk_balancer::observability::{logging, metrics};

#[derive(Debug, Parser)]
#[command(name = "zk-balancer", version, about = "TCP load balancer with coordinated membership")]
struct Cli {
    /// Path to a TOML configuration file. Defaults are used when omitted.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override `listener.bind_address`.
    #[arg(long)]
    bind: Option<String>,

    /// Override `observability.log_level`.
    #[arg(long)]
    log_level: Option<String>,

    /// Override `coordination.connect_string` (e.g. "zk1:2181,zk2:2181").
    #[arg(long = "zookeeper", value_name = "HOSTS")]
    connect_string: Option<String>,

    /// Backend node name (`host:port`) to publish; may be repeated.
    #[arg(long = "seed", value_name = "HOST:PORT")]
    seeds: Vec<String>,
}

fn resolve_config(cli: &Cli) -> Result<BalancerConfig, ConfigError> {
    let mut config = match &cli.config {
        Some(path) => load_config(path)?,
        None => BalancerConfig::default(),
    };
    if let Some(bind) = &cli.bind {
        config.listener.bind_address = bind.clone();
    }
    if let Some(level) = &cli.log_level {
        config.observability.log_level = level.clone();
    }
    if let Some(servers) = &cli.connect_string {
        config.coordination.connect_string = Some(servers.clone());
    }
    config.coordination.seed_servers.extend(cli.seeds.iter().cloned());
    validate_config(&config).map_err(ConfigError::Validation)?;
    Ok(config)
}

/// Session the balancer runs on, plus the standalone seeder session if the
/// in-process ensemble is used.
async fn open_coordination(
    config: &CoordinationConfig,
) -> Result<(Arc<dyn Coordinator>, Option<MemorySession>), CoordinationError> {
    if let Some(servers) = &config.connect_string {
        let session = ZooKeeperSession::connect(servers, config.session_timeout()).await?;
        return Ok((Arc::new(session), None));
    }

    tracing::warn!("No coordination.connect_string set, running with an in-process ensemble");
    let ensemble = MemoryEnsemble::new();
    let seeder = ensemble.session();
    seeder.ensure_path(&config.servers_path).await?;
    for seed in &config.seed_servers {
        let path = join_path(&config.servers_path, seed);
        seeder.create_ephemeral(&path, seed.as_bytes()).await?;
        tracing::info!(backend = %seed, "Seed server published");
    }
    Ok((Arc::new(ensemble.session()), Some(seeder)))
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let config = resolve_config(&cli)?;

    logging::init_logging(&config.observability)?;
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "zk-balancer starting");

    if config.observability.metrics_enabled {
        let addr = config.observability.metrics_address.parse()?;
        metrics::init_metrics(addr)?;
    }

    let (coordinator, seeder) = open_coordination(&config.coordination).await?;

    let shutdown = Shutdown::new();
    let balancer = lifecycle::launch(config, coordinator, &shutdown).await?;
    tracing::info!(
        address = %balancer.local_addr(),
        advertised = %balancer.advertised(),
        "Ready"
    );

    signals::wait_for_signal().await;
    shutdown.trigger();
    balancer.wait().await;
    if let Some(seeder) = seeder {
        seeder.close().await;
    }

    tracing::info!("Shutdown complete");
    Ok(())
}
