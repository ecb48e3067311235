//! Configuration constants and runtime settings for a marketplace peer.
//!
//! This module centralizes collection names, key prefixes and network
//! defaults so the protocol code never spells them inline.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{MarketError, MarketResult};

/// Names of the shared (non per-peer) replicated collections.
pub mod collections {
    /// Directory of `username_<name>` and `address_<addr>` records.
    pub const USERS: &str = "users";
    /// Items currently for sale.
    pub const MARKETPLACE: &str = "marketplace";
    /// Prefix of a peer's wallet collection; suffixed with the peer's address.
    pub const OWNED_PREFIX: &str = "owned_";
    /// Prefix of a peer's mailbox collection; suffixed with the peer's name.
    pub const MAILBOX_PREFIX: &str = "recipient_";
}

/// Key prefixes inside the collections.
pub mod key_prefix {
    pub const MARKET_ITEM: &str = "market_item_";
    pub const COIN: &str = "coin_";
    /// Wallet key of a committed payment still waiting for delivery.
    pub const PAYMENT: &str = "payment_";
    pub const NAMETAG: &str = "nametag_";
    pub const USERNAME: &str = "username_";
    pub const ADDRESS: &str = "address_";
}

/// Value minted into every new coin and item token.
pub const DEFAULT_TOKEN_VALUE: u64 = 10;

/// Domain separator hashed with a display name to derive its nametag token id.
pub const NAMETAG_DOMAIN: &str = "nametag:";

/// Default relay broker address.
pub const DEFAULT_RELAY_ADDR: &str = "127.0.0.1:7787";

/// Default relay room shared by all peers of one marketplace.
pub const DEFAULT_ROOM: &str = "market";

/// How long a starting peer waits for the substrate's initial sync.
pub const DEFAULT_SYNC_TIMEOUT_SECS: u64 = 10;

/// Timeout applied to every oracle round-trip through the relay.
pub const ORACLE_TIMEOUT_SECS: u64 = 15;

/// Interval at which a peer re-queues mailbox entries left by failed settlements.
pub const MAILBOX_RESCAN_SECS: u64 = 30;

/// Interval between relay persistence flushes.
pub const RELAY_PERSIST_INTERVAL_SECS: u64 = 2;

/// Maximum accepted size of one relay frame.
pub const MAX_FRAME_BYTES: usize = 1024 * 1024;

/// Environment variable names read by [`MarketConfig::from_env`].
pub const MARKET_RELAY_ADDR_ENV: &str = "MARKET_RELAY_ADDR";
pub const MARKET_ROOM_ENV: &str = "MARKET_ROOM";
pub const MARKET_USERNAME_ENV: &str = "MARKET_USERNAME";
pub const MARKET_SECRET_ENV: &str = "MARKET_SECRET";
pub const MARKET_SYNC_TIMEOUT_ENV: &str = "MARKET_SYNC_TIMEOUT_SECS";
pub const MARKET_STATUS_ADDR_ENV: &str = "MARKET_STATUS_ADDR";

/// Runtime settings of a single marketplace peer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketConfig {
    /// Relay broker to replicate through.
    pub relay_addr: String,
    /// Room on the relay.
    pub room: String,
    /// Display name of this peer.
    pub username: String,
    /// Secret the peer's address and signing key derive from.
    #[serde(skip_serializing, default)]
    pub secret: String,
    /// Seconds to wait for the initial sync before initializing anyway.
    pub sync_timeout_secs: u64,
    /// Optional HTTP listener for the `/status` endpoint.
    pub status_addr: Option<String>,
    /// Optional relay-side persistence file (only used by the relay binary).
    pub persistence_path: Option<String>,
}

impl Default for MarketConfig {
    fn default() -> Self {
        Self {
            relay_addr: DEFAULT_RELAY_ADDR.to_string(),
            room: DEFAULT_ROOM.to_string(),
            username: String::new(),
            secret: String::new(),
            sync_timeout_secs: DEFAULT_SYNC_TIMEOUT_SECS,
            status_addr: None,
            persistence_path: None,
        }
    }
}

impl MarketConfig {
    /// Build a configuration from `MARKET_*` environment variables,
    /// falling back to defaults for anything unset.
    pub fn from_env() -> MarketResult<Self> {
        let mut config = Self::default();
        if let Ok(addr) = std::env::var(MARKET_RELAY_ADDR_ENV) {
            config.relay_addr = addr;
        }
        if let Ok(room) = std::env::var(MARKET_ROOM_ENV) {
            config.room = room;
        }
        if let Ok(name) = std::env::var(MARKET_USERNAME_ENV) {
            config.username = name;
        }
        if let Ok(secret) = std::env::var(MARKET_SECRET_ENV) {
            config.secret = secret;
        }
        if let Ok(secs) = std::env::var(MARKET_SYNC_TIMEOUT_ENV) {
            config.sync_timeout_secs = secs.parse().map_err(|e| {
                MarketError::Config(format!("Invalid {MARKET_SYNC_TIMEOUT_ENV} '{secs}': {e}"))
            })?;
        }
        if let Ok(addr) = std::env::var(MARKET_STATUS_ADDR_ENV) {
            config.status_addr = Some(addr);
        }
        Ok(config)
    }

    /// Reject configurations a peer cannot start with.
    pub fn validate(&self) -> MarketResult<()> {
        if self.username.trim().is_empty() {
            return Err(MarketError::Config("username must not be empty".into()));
        }
        if self.username.chars().any(char::is_whitespace) {
            return Err(MarketError::Config(format!(
                "username '{}' must not contain whitespace",
                self.username
            )));
        }
        if self.secret.is_empty() {
            return Err(MarketError::Config(format!(
                "a secret is required (set {MARKET_SECRET_ENV} or pass --secret)"
            )));
        }
        Ok(())
    }

    pub const fn sync_timeout(&self) -> Duration {
        Duration::from_secs(self.sync_timeout_secs)
    }
}
