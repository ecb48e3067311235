//! Interactive marketplace peer.
//!
//! Connects to a relay, initializes the peer's identity and reads commands
//! from stdin. Logging goes to stderr; command output goes to stdout.
//!
//! Usage:
//!   market-node --username alice --secret s3cret [--relay 127.0.0.1:7787]

use std::sync::Arc;
use std::time::Instant;

use anyhow::Context;
use clap::Parser;
use market::config::{
    MarketConfig, DEFAULT_RELAY_ADDR, DEFAULT_ROOM, DEFAULT_SYNC_TIMEOUT_SECS,
    MARKET_RELAY_ADDR_ENV, MARKET_ROOM_ENV, MARKET_SECRET_ENV, MARKET_STATUS_ADDR_ENV,
    MARKET_SYNC_TIMEOUT_ENV, MARKET_USERNAME_ENV,
};
use market::engine::SignedTokenEngine;
use market::identity::Secret;
use market::node::{node_status, MarketNode};
use market::protocol::Market;
use market::relay::{RelayLedger, RelayStore};
use market::status::{serve_status, status_router};
use market::traits::{SystemTimeProvider, ThreadRng};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

type RelayMarket = Market<RelayStore, SignedTokenEngine<RelayLedger>, ThreadRng, SystemTimeProvider>;

#[derive(Parser)]
#[command(name = "market-node")]
#[command(about = "Peer of a replicated item marketplace")]
struct Cli {
    /// Display name of this peer
    #[arg(short, long, env = MARKET_USERNAME_ENV)]
    username: String,

    /// Secret the peer's address and signing key derive from
    #[arg(short, long, env = MARKET_SECRET_ENV, hide_env_values = true)]
    secret: String,

    /// Relay broker address
    #[arg(long, env = MARKET_RELAY_ADDR_ENV, default_value = DEFAULT_RELAY_ADDR)]
    relay: String,

    /// Relay room shared by the marketplace's peers
    #[arg(long, env = MARKET_ROOM_ENV, default_value = DEFAULT_ROOM)]
    room: String,

    /// Seconds to wait for the initial sync before initializing anyway
    #[arg(long, env = MARKET_SYNC_TIMEOUT_ENV, default_value_t = DEFAULT_SYNC_TIMEOUT_SECS)]
    sync_timeout: u64,

    /// Serve GET /status on this address
    #[arg(long, env = MARKET_STATUS_ADDR_ENV)]
    status_addr: Option<String>,
}

impl Cli {
    fn into_config(self) -> MarketConfig {
        MarketConfig {
            relay_addr: self.relay,
            room: self.room,
            username: self.username,
            secret: self.secret,
            sync_timeout_secs: self.sync_timeout,
            status_addr: self.status_addr,
            persistence_path: None,
        }
    }
}

// ── Helpers ──────────────────────────────────────────────────────────

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

const HELP: &str = "\
Commands:
  help                     show this message
  status                   peer, presence and wallet summary
  market                   items currently for sale
  inventory                coins and items in the wallet
  addcoin                  mint a coin into the wallet
  additem <name> <desc>    mint an item straight into the marketplace
  mintitem <name> <desc>   mint an item into the wallet
  buy <item>               pay for a listed item
  list <item>              move a wallet item to the marketplace
  unlist <item>            move an own listing back to the wallet
  exit                     go offline and quit";

fn print_market(market: &RelayMarket) {
    match market.get_market_list() {
        Ok(items) if items.is_empty() => println!("(nothing for sale)"),
        Ok(items) => {
            for item in items {
                println!("  {:<20} {}", item.name, item.description);
            }
        }
        Err(e) => println!("error: {e}"),
    }
}

fn print_inventory(market: &RelayMarket) {
    match market.get_inventory_list() {
        Ok(inventory) => {
            println!(
                "balance {} ({} coins)",
                inventory.balance,
                inventory.coins.len()
            );
            for item in inventory.items.iter().filter_map(|t| t.item_data()) {
                println!("  {:<20} {}", item.name, item.description);
            }
        }
        Err(e) => println!("error: {e}"),
    }
}

/// Run one command line. Returns `false` when the loop should stop.
async fn run_command(market: &RelayMarket, started_at: Instant, line: &str) -> bool {
    let mut words = line.split_whitespace();
    let Some(command) = words.next() else {
        return true;
    };
    let rest: Vec<&str> = words.collect();
    let arg = rest.join(" ");

    match (command, rest.as_slice()) {
        ("help", _) => println!("{HELP}"),
        ("exit" | "quit", _) => return false,
        ("status", _) => match node_status(market, started_at) {
            Ok(status) => match serde_json::to_string_pretty(&status) {
                Ok(json) => println!("{json}"),
                Err(e) => println!("error: {e}"),
            },
            Err(e) => println!("error: {e}"),
        },
        ("market", _) => print_market(market),
        ("inventory", _) => print_inventory(market),
        ("addcoin", _) => match market.add_coin().await {
            Ok(coin) => println!("minted coin {} worth {}", coin.token_id, coin.token_value),
            Err(e) => println!("error: {e}"),
        },
        ("additem" | "mintitem", [name, description @ ..]) => {
            let description = description.join(" ");
            let result = if command == "additem" {
                market.add_market_item(name, &description).await
            } else {
                market.add_item(name, &description).await
            };
            match result {
                Ok(_) => println!("minted '{name}'"),
                Err(e) => println!("error: {e}"),
            }
        }
        ("buy", [_, ..]) => match market.purchase(&arg).await {
            Ok(receipt) => println!(
                "paid {} {} for '{}'; the item arrives once they settle",
                receipt.seller, receipt.value, receipt.item
            ),
            Err(e) => println!("error: {e}"),
        },
        ("list", [_, ..]) => match market.list_item(&arg).await {
            Ok(()) => println!("listed '{arg}'"),
            Err(e) => println!("error: {e}"),
        },
        ("unlist", [_, ..]) => match market.unlist_item(&arg).await {
            Ok(()) => println!("unlisted '{arg}'"),
            Err(e) => println!("error: {e}"),
        },
        _ => println!("unknown or incomplete command '{line}', try 'help'"),
    }
    true
}

// ── Main ─────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_logging_stderr();
    let config = Cli::parse().into_config();
    config.validate()?;
    info!(
        "market-node '{}' connecting to {} (room '{}')",
        config.username, config.relay_addr, config.room
    );

    let store = RelayStore::connect(&config.relay_addr, &config.room, &config.username)
        .await
        .context("connecting to the relay")?;
    let engine = SignedTokenEngine::new(RelayLedger::new(store.clone()));
    let market = Market::new(
        store,
        engine,
        ThreadRng::new(),
        SystemTimeProvider::new(),
        &config.username,
        Secret::new(config.secret.clone()),
    )?;

    let market_viewer = market.register_market_viewer(|items| {
        info!("Market now lists {} item(s)", items.len());
    });
    let inventory_viewer = market.register_inventory_viewer(|inventory| {
        info!(
            "Wallet now holds {} coin(s), {} item(s), balance {}",
            inventory.coins.len(),
            inventory.items.len(),
            inventory.balance
        );
    });

    let node = MarketNode::start(market, config.sync_timeout()).await?;
    let started_at = Instant::now();

    if let Some(addr) = &config.status_addr {
        let status_market = node.market().clone();
        let router = status_router(Arc::new(move || {
            node_status(&status_market, started_at).map_err(|e| e.to_string())
        }));
        serve_status(addr, router, node.shutdown_token()).await?;
    }

    println!("{HELP}");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = tokio::select! {
            line = lines.next_line() => line,
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted");
                break;
            }
        };
        let line = match line {
            Ok(Some(line)) => line,
            Ok(None) => {
                info!("stdin closed, shutting down");
                break;
            }
            Err(e) => {
                error!("stdin read error: {}", e);
                break;
            }
        };
        if !run_command(node.market(), started_at, line.trim()).await {
            break;
        }
    }

    market_viewer.cancel();
    inventory_viewer.cancel();
    node.shutdown().await?;
    info!("market-node stopped");
    Ok(())
}
