//! chaos-proxy
//!
//! A reverse proxy that injects faults into the traffic it forwards.
//!
//! # Architecture Overview
//!
//! ```text
//!                     ┌───────────────────────────────────────────────────┐
//!                     │                   CHAOS PROXY                     │
//!                     │                                                   │
//!   Client Request    │  ┌─────────┐   ┌───────────┐   ┌──────────────┐   │
//!   ──────────────────┼─▶│   net   │──▶│   http    │──▶│    chaos     │   │
//!                     │  │listener │   │  server   │   │  decide()    │   │
//!                     │  └─────────┘   └───────────┘   └──────┬───────┘   │
//!                     │                                       │ pass      │
//!                     │                                       ▼           │
//!   Client Response   │  ┌───────────┐                ┌──────────────┐    │
//!   ◀─────────────────┼──│ corruption│◀───────────────│  forwarder   │◀───┼── Upstream
//!                     │  │ (maybe)   │                └──────────────┘    │
//!                     │  └───────────┘                                    │
//!                     │                                                   │
//!                     │  ┌─────────────────────────────────────────────┐  │
//!                     │  │ config + watcher → lifecycle (orchestrator) │  │
//!                     │  │ observability (logging, metrics)            │  │
//!                     │  └─────────────────────────────────────────────┘  │
//!                     └───────────────────────────────────────────────────┘
//! ```

use std::path::PathBuf;

use clap::Parser;
use tokio::sync::mpsc;

use chaos_proxy::config::{ConfigSource, ConfigWatcher, FileConfigSource, Overrides};
use chaos_proxy::lifecycle::{forward_sighup, shutdown_signal, Orchestrator};
use chaos_proxy::observability::{logging, metrics};

#[derive(Parser)]
#[command(name = "chaos-proxy")]
#[command(about = "Reverse proxy that injects drops, latency, errors and corrupted bodies", long_about = None)]
struct Cli {
    /// Path to the TOML config file; watched for changes.
    #[arg(short, long, default_value = "chaos-proxy.toml")]
    config: PathBuf,

    /// Listen address, overrides `listener.bind_address`.
    #[arg(short, long)]
    listen: Option<String>,

    /// Upstream URL, overrides `upstream.url`.
    #[arg(short, long)]
    upstream: Option<String>,

    /// Disable reloading on config file changes.
    #[arg(long)]
    no_watch: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let source = FileConfigSource::new(
        cli.config.clone(),
        Overrides {
            listen: cli.listen,
            upstream: cli.upstream,
        },
    );

    let config = match source.load() {
        Ok(config) => config,
        Err(e) => {
            logging::init_logging("info");
            tracing::error!(path = %cli.config.display(), error = %e, "Invalid configuration");
            return Err(e.into());
        }
    };

    logging::init_logging(&config.observability.log_level);
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "chaos-proxy starting");

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let (reload_tx, reload_rx) = mpsc::channel(1);

    let _watcher = if cli.no_watch {
        None
    } else {
        match ConfigWatcher::spawn(&cli.config, reload_tx.clone()) {
            Ok(watcher) => Some(watcher),
            Err(e) => {
                tracing::warn!(error = %e, "Failed to set up config watcher, hot reload disabled");
                None
            }
        }
    };

    if let Err(e) = forward_sighup(reload_tx) {
        tracing::warn!(error = %e, "Failed to install SIGHUP handler");
    }

    Orchestrator::new(source)
        .run_with(config, Some(reload_rx), shutdown_signal())
        .await?;

    tracing::info!("Shutdown complete");
    Ok(())
}
