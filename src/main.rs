//! Campaign API gateway.
//!
//! # Architecture Overview
//!
//! ```text
//!                      ┌──────────────────────────────────────────────────────────┐
//!                      │                    CAMPAIGN GATEWAY                       │
//!                      │                                                           │
//!   Client Request     │  ┌────────┐   ┌──────────┐   ┌─────────┐   ┌──────────┐  │
//!   ───────────────────┼─▶│  http  │──▶│ routing  │──▶│ circuit │──▶│  rate    │  │
//!                      │  │ server │   │  table   │   │ breaker │   │ limiter  │  │
//!                      │  └────────┘   └──────────┘   └─────────┘   └────┬─────┘  │
//!                      │                                                  │        │
//!                      │                                                  ▼        │
//!   Client Response    │  ┌────────┐   ┌──────────┐   ┌──────────────────────┐    │
//!   ◀──────────────────┼──│response│◀──│ retries  │◀──│ load_balancer + pool │◀───┼── Backend
//!                      │  │ errors │   │ + backoff│   │  (healthy instances) │    │   instances
//!                      │  └────────┘   └──────────┘   └──────────────────────┘    │
//!                      │                                                           │
//!                      │  Background: health monitor, counter sweeper, admin API   │
//!                      └──────────────────────────────────────────────────────────┘
//! ```

use std::path::PathBuf;

use clap::Parser;
use tokio::net::TcpListener;

use campaign_gateway::config::{load_config, GatewayConfig};
use campaign_gateway::lifecycle::signals::shutdown_on_signal;
use campaign_gateway::observability::{logging::init_logging, metrics::init_metrics};
use campaign_gateway::{Gateway, Shutdown};

#[derive(Debug, Parser)]
#[command(name = "campaign-gateway", version, about = "Campaign API gateway")]
struct Args {
    /// Path to the TOML configuration file. Built-in defaults when omitted.
    #[arg(short, long, env = "GATEWAY_CONFIG")]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => load_config(path)?,
        None => GatewayConfig::default(),
    };

    init_logging(&config.observability)?;
    tracing::info!("campaign-gateway v{} starting", env!("CARGO_PKG_VERSION"));
    tracing::info!(
        bind_address = %config.listener.bind_address,
        max_connections = config.listener.max_connections,
        attempt_timeout_ms = config.timeouts.attempt_ms,
        config_file = ?args.config,
        "Configuration loaded"
    );

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => init_metrics(addr),
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let listener = TcpListener::bind(&config.listener.bind_address).await?;
    tracing::info!(address = %listener.local_addr()?, "Listening for connections");

    let gateway = Gateway::build(config).await?;

    let shutdown = Shutdown::new();
    let signals = shutdown.clone();
    tokio::spawn(async move { shutdown_on_signal(&signals).await });

    gateway.run(listener, shutdown).await?;

    tracing::info!("Shutdown complete");
    Ok(())
}
