//! Cluster agent.
//!
//! Serves node-local log metadata and log records, and shuts down within a
//! fixed deadline when asked to terminate.
//!
//! # Architecture Overview
//!
//! ```text
//!     SIGINT/SIGTERM ──▶ SignalWatcher ──▶ ShutdownCoordinator
//!                                             │         │
//!                               graceful/forced stop    shutdown hooks
//!                                             ▼         ▼
//!     Client ──▶ Endpoint (listener + hyper) ──▶ router
//!                                                 ├─ /healthz          (HealthReporter)
//!                                                 ├─ /v1/log-metadata  (LogMetadataService)
//!                                                 └─ /v1/log-records   (LogRecordsService)
//! ```

use std::path::PathBuf;

use clap::Parser;

use cluster_agent::cluster::ClusterClient;
use cluster_agent::config::load_config;
use cluster_agent::lifecycle::{Agent, AgentSettings, SignalWatcher};
use cluster_agent::observability::logging::init_logging;
use cluster_agent::observability::metrics::init_metrics;
use cluster_agent::observability::tracing::shutdown_tracing;

#[derive(Parser)]
#[command(name = "cluster-agent")]
#[command(about = "Cluster agent serving node-local container logs", long_about = None)]
struct Cli {
    /// Path to configuration file (e.g. "/etc/cluster-agent/config.toml")
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Host address to bind to (e.g. ":50051")
    #[arg(short, long)]
    addr: Option<String>,

    /// Config params as key:value (e.g. "cluster-agent.logging.level:debug")
    #[arg(short = 'p', long = "param", value_name = "KEY:VALUE")]
    params: Vec<String>,

    /// Name of the node this agent runs on
    #[arg(long, env = "NODE_NAME", default_value = "")]
    node_name: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Listen for termination signals as early as possible.
    let signals = SignalWatcher::install()?;

    let cli = Cli::parse();

    let mut overrides = cli.params;
    if let Some(addr) = cli.addr {
        overrides.push(format!("cluster-agent.addr:{addr}"));
    }
    let config = load_config(cli.config.as_deref(), &overrides)?.cluster_agent;

    init_logging(&config.logging, &config.otel)?;

    if config.metrics.enabled {
        init_metrics(config.metrics.address.parse()?)?;
    }

    let cluster = ClusterClient::in_cluster()?;

    let agent = Agent::bootstrap(AgentSettings::from_config(&config, cli.node_name, cluster)).await?;
    let settled = agent.run_until(signals.wait()).await;

    tracing::info!(
        state = ?settled.state,
        elapsed_ms = settled.elapsed.as_millis() as u64,
        hooks_settled = settled.hooks.is_some(),
        "cluster-agent exiting"
    );
    shutdown_tracing();
    Ok(())
}
