//! The per-peer collection set: directory, marketplace, wallet and mailbox.
//!
//! Typed access to the four replicated maps a peer works with. The wallet
//! (`owned_<address>`) is only ever written by its owner and the mailbox
//! (`recipient_<name>`) is only ever drained by its owner; both rules are
//! enforced by which methods exist here, not by the substrate.

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::config::collections;
use crate::error::{MarketError, MarketResult};
use crate::identity::Address;
use crate::keys;
use crate::token::TokenFlow;
use crate::traits::{ChangeStream, ReplicatedStore};

/// `users[username_<name>]`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRecord {
    pub address: Address,
}

/// `users[address_<address>]`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddressRecord {
    pub username: String,
}

/// Typed view over the replicated maps of one peer session.
#[derive(Debug, Clone)]
pub struct CollectionSet<S: ReplicatedStore> {
    store: S,
    wallet: String,
    mailbox: String,
}

fn decode_flow(collection: &str, key: &str, value: &serde_json::Value) -> MarketResult<TokenFlow> {
    TokenFlow::from_value(value).map_err(|e| {
        MarketError::Serialization(format!("Malformed token at {collection}[{key}]: {e}"))
    })
}

impl<S: ReplicatedStore> CollectionSet<S> {
    pub fn new(store: S, my_address: &Address, my_name: &str) -> Self {
        Self {
            store,
            wallet: keys::owned_collection(my_address),
            mailbox: keys::mailbox_collection(my_name),
        }
    }

    pub const fn store(&self) -> &S {
        &self.store
    }

    pub fn wallet_name(&self) -> &str {
        &self.wallet
    }

    pub fn mailbox_name(&self) -> &str {
        &self.mailbox
    }

    fn get_flow(&self, collection: &str, key: &str) -> MarketResult<Option<TokenFlow>> {
        self.store
            .get(collection, key)?
            .map(|value| decode_flow(collection, key, &value))
            .transpose()
    }

    fn put_flow(&self, collection: &str, key: &str, flow: &TokenFlow) -> MarketResult<()> {
        self.store.set(collection, key, flow.to_value()?)
    }

    /// Every well-formed flow in a collection; malformed entries are skipped.
    fn flows(&self, collection: &str) -> MarketResult<Vec<(String, TokenFlow)>> {
        let entries = self.store.entries(collection)?;
        Ok(entries
            .into_iter()
            .filter_map(|(key, value)| match decode_flow(collection, &key, &value) {
                Ok(flow) => Some((key, flow)),
                Err(e) => {
                    warn!("Skipping entry: {}", e);
                    None
                }
            })
            .collect())
    }

    // ── Wallet ──

    pub fn wallet_get(&self, key: &str) -> MarketResult<Option<TokenFlow>> {
        self.get_flow(&self.wallet, key)
    }

    pub fn wallet_contains(&self, key: &str) -> MarketResult<bool> {
        self.store.contains(&self.wallet, key)
    }

    pub fn wallet_put(&self, key: &str, flow: &TokenFlow) -> MarketResult<()> {
        self.put_flow(&self.wallet, key, flow)
    }

    pub fn wallet_remove(&self, key: &str) -> MarketResult<bool> {
        self.store.delete(&self.wallet, key)
    }

    pub fn wallet_entries(&self) -> MarketResult<Vec<(String, TokenFlow)>> {
        self.flows(&self.wallet)
    }

    // ── Marketplace ──

    pub fn listing_get(&self, item_name: &str) -> MarketResult<Option<TokenFlow>> {
        self.get_flow(collections::MARKETPLACE, &keys::market_item_key(item_name))
    }

    pub fn listing_put(&self, item_name: &str, flow: &TokenFlow) -> MarketResult<()> {
        self.put_flow(collections::MARKETPLACE, &keys::market_item_key(item_name), flow)
    }

    pub fn listing_remove(&self, item_name: &str) -> MarketResult<bool> {
        self.store
            .delete(collections::MARKETPLACE, &keys::market_item_key(item_name))
    }

    pub fn listings(&self) -> MarketResult<Vec<(String, TokenFlow)>> {
        self.flows(collections::MARKETPLACE)
    }

    // ── Mailbox ──

    pub fn mailbox_get(&self, key: &str) -> MarketResult<Option<TokenFlow>> {
        self.get_flow(&self.mailbox, key)
    }

    pub fn mailbox_remove(&self, key: &str) -> MarketResult<bool> {
        self.store.delete(&self.mailbox, key)
    }

    pub fn mailbox_keys(&self) -> MarketResult<Vec<String>> {
        Ok(self
            .store
            .entries(&self.mailbox)?
            .into_iter()
            .map(|(key, _)| key)
            .collect())
    }

    /// Write a flow into another peer's mailbox.
    pub fn deliver(&self, recipient_name: &str, key: &str, flow: &TokenFlow) -> MarketResult<()> {
        self.put_flow(&keys::mailbox_collection(recipient_name), key, flow)
    }

    // ── Directory ──

    /// Publish both directory records for a peer.
    pub fn publish_user(&self, name: &str, address: &Address) -> MarketResult<()> {
        let user = serde_json::to_value(UserRecord {
            address: address.clone(),
        })?;
        self.store.set(collections::USERS, &keys::username_key(name), user)?;
        self.register_owner(address, name)
    }

    /// Map an owner address back to a username so buyers can find the seller.
    pub fn register_owner(&self, address: &Address, name: &str) -> MarketResult<()> {
        let record = serde_json::to_value(AddressRecord {
            username: name.to_string(),
        })?;
        self.store
            .set(collections::USERS, &keys::address_key(address), record)
    }

    /// Username registered for an address, if the record has arrived.
    pub fn lookup_username(&self, address: &Address) -> MarketResult<Option<String>> {
        let Some(value) = self
            .store
            .get(collections::USERS, &keys::address_key(address))?
        else {
            return Ok(None);
        };
        let record = AddressRecord::deserialize(&value).map_err(|e| {
            MarketError::Serialization(format!("Malformed directory record for {address}: {e}"))
        })?;
        Ok(Some(record.username))
    }

    // ── Observation ──

    pub fn observe_marketplace(&self) -> MarketResult<ChangeStream> {
        self.store.observe(collections::MARKETPLACE)
    }

    pub fn observe_wallet(&self) -> MarketResult<ChangeStream> {
        self.store.observe(&self.wallet)
    }

    pub fn observe_mailbox(&self) -> MarketResult<ChangeStream> {
        self.store.observe(&self.mailbox)
    }
}
