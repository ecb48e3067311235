//! Relay broker for marketplace peers.
//!
//! Usage:
//!   market-relay [--listen 127.0.0.1:7787] [--status-addr 127.0.0.1:7788] [--persist]

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use market::config::DEFAULT_RELAY_ADDR;
use market::relay::RelayServer;
use market::status::{serve_status, status_router};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser)]
#[command(name = "market-relay")]
#[command(about = "Relay broker replicating marketplace rooms between peers")]
struct Cli {
    /// Address to accept peer connections on
    #[arg(long, env = "MARKET_RELAY_LISTEN", default_value = DEFAULT_RELAY_ADDR)]
    listen: String,

    /// Serve GET /status on this address
    #[arg(long, env = "MARKET_RELAY_STATUS_ADDR")]
    status_addr: Option<String>,

    /// Persist rooms and the spend ledger to this file
    #[arg(long, env = "MARKET_RELAY_STATE")]
    state_file: Option<PathBuf>,

    /// Persist to the default state file in the user's data directory
    #[arg(long, conflicts_with = "state_file")]
    persist: bool,
}

fn default_state_file() -> anyhow::Result<PathBuf> {
    let dir = dirs::data_local_dir()
        .context("no local data directory on this platform")?
        .join("peer-market");
    std::fs::create_dir_all(&dir)
        .with_context(|| format!("creating {}", dir.display()))?;
    Ok(dir.join("relay.cbor"))
}

fn init_logging_stderr() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_ansi(false),
        )
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_logging_stderr();
    let cli = Cli::parse();

    let state_file = match (cli.state_file, cli.persist) {
        (Some(path), _) => Some(path),
        (None, true) => Some(default_state_file()?),
        (None, false) => None,
    };
    let relay = match &state_file {
        Some(path) => {
            info!("Persisting relay state to {}", path.display());
            RelayServer::with_persistence(path)?
        }
        None => {
            warn!("Running without persistence; state is lost on exit");
            RelayServer::new()
        }
    };
    let relay = Arc::new(relay);
    let shutdown = CancellationToken::new();

    if let Some(addr) = &cli.status_addr {
        let status_relay = relay.clone();
        let router = status_router(Arc::new(move || status_relay.status()));
        serve_status(addr, router, shutdown.clone()).await?;
    }

    let (_, serving) = relay.spawn(&cli.listen, shutdown.clone()).await?;
    tokio::signal::ctrl_c()
        .await
        .context("waiting for ctrl-c")?;
    info!("Shutting down relay");
    shutdown.cancel();
    serving.await.context("relay task panicked")?;
    Ok(())
}
