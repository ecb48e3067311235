//! Naming of replicated collections and the keys inside them.

use crate::config::{collections, key_prefix};
use crate::identity::Address;

/// Wallet collection of the peer owning `address`.
pub fn owned_collection(address: &Address) -> String {
    format!("{}{}", collections::OWNED_PREFIX, address)
}

/// Mailbox collection of the peer named `name`.
pub fn mailbox_collection(name: &str) -> String {
    format!("{}{}", collections::MAILBOX_PREFIX, name)
}

pub fn market_item_key(item_name: &str) -> String {
    format!("{}{}", key_prefix::MARKET_ITEM, item_name)
}

pub fn coin_key(token_id: &str) -> String {
    format!("{}{}", key_prefix::COIN, token_id)
}

pub fn nametag_key(name: &str) -> String {
    format!("{}{}", key_prefix::NAMETAG, name)
}

pub fn username_key(name: &str) -> String {
    format!("{}{}", key_prefix::USERNAME, name)
}

pub fn address_key(address: &Address) -> String {
    format!("{}{}", key_prefix::ADDRESS, address)
}

/// `payment_<tokenId>_<seller>`. Token ids are hex, so the first `_` after
/// the prefix separates the two parts.
pub fn payment_key(token_id: &str, seller: &str) -> String {
    format!("{}{}_{}", key_prefix::PAYMENT, token_id, seller)
}

/// Token id and seller of a `payment_` key.
pub fn parse_payment_key(key: &str) -> Option<(&str, &str)> {
    key.strip_prefix(key_prefix::PAYMENT)?
        .split_once('_')
        .filter(|(token_id, seller)| !token_id.is_empty() && !seller.is_empty())
}
