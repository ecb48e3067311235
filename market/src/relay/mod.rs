//! Relay substrate: a broker process that replicates rooms of shared maps
//! between peers and hosts the spend ledger they all consult.

mod client;
mod ledger;
mod server;
pub mod wire;

pub use client::RelayStore;
pub use ledger::RelayLedger;
pub use server::{RelayServer, RelayStatus};
