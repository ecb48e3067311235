//! Seller-side settlement of mailbox entries.
//!
//! Salts of the transfers created here are derived from the incoming
//! payment, so re-running a settlement that failed halfway produces the same
//! transfer and the ledger accepts the repeated commit.
//!
//! A sale is recorded in this order: item delivered, coin banked, listing
//! dropped, mailbox entry removed. A banked coin therefore marks a sale whose
//! item already went out, and a refund is only considered while the coin is
//! not banked.

use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use super::Market;
use crate::error::{MarketError, MarketResult};
use crate::identity::Address;
use crate::keys;
use crate::token::{TokenClass, TokenFlow, TransferMessage};
use crate::traits::{RandomSource, ReplicatedStore, TimeProvider, TokenEngine};

/// Outcome of settling one mailbox entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Settlement {
    /// The entry was already consumed.
    Skipped,
    /// A plain transfer was imported into the wallet under `key`.
    Received { key: String },
    /// Payment accepted and the item sent to the buyer.
    Completed { item: String, buyer: String },
    /// Payment returned to the buyer because the item could not be sent.
    Refunded { item: String, buyer: String },
    /// The entry could not be imported and was removed.
    Discarded { key: String, reason: String },
}

fn derived_salt(payment: &TokenFlow, purpose: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(purpose.as_bytes());
    if let Some(tx) = &payment.pending {
        hasher.update(tx.hash().as_bytes());
    }
    hasher.update(payment.token_id.as_bytes());
    hex::encode(hasher.finalize())
}

impl<S, E, R, C> Market<S, E, R, C>
where
    S: ReplicatedStore,
    E: TokenEngine,
    R: RandomSource,
    C: TimeProvider,
{
    /// Settle the mailbox entry at `key`.
    ///
    /// Transient failures (oracle, substrate) and a missing directory record
    /// are returned as errors and the entry stays in the mailbox for a later
    /// rescan. Entries that can never be imported are removed.
    pub async fn settle_entry(&self, key: &str) -> MarketResult<Settlement> {
        let _guard = self.lock().await;

        let flow = match self.collections.mailbox_get(key) {
            Ok(Some(flow)) => flow,
            Ok(None) => {
                debug!("Mailbox entry {} already consumed", key);
                return Ok(Settlement::Skipped);
            }
            Err(MarketError::Serialization(reason)) => return self.discard(key, reason),
            Err(e) => return Err(e),
        };

        let message = if flow.is_coin() {
            self.engine.extract_message(&flow)
        } else {
            None
        };
        match message {
            Some(message) => self.settle_payment(key, &flow, message).await,
            None => self.receive_plain(key, &flow).await,
        }
    }

    fn discard(&self, key: &str, reason: String) -> MarketResult<Settlement> {
        warn!("Discarding mailbox entry {}: {}", key, reason);
        self.collections.mailbox_remove(key)?;
        Ok(Settlement::Discarded {
            key: key.to_string(),
            reason,
        })
    }

    /// Import a delivered flow against this peer's nametag.
    async fn import(&self, flow: &TokenFlow) -> MarketResult<TokenFlow> {
        let nametag = self
            .collections
            .wallet_get(&keys::nametag_key(self.name()))?;
        self.engine
            .import_received(flow, self.identity.secret(), nametag.as_ref())
            .await
    }

    /// Wallet key a received token is stored under.
    fn wallet_key_for(&self, token: &TokenFlow, fallback: &str) -> String {
        match token.token_class {
            TokenClass::Coin => keys::coin_key(&token.token_id),
            TokenClass::Item => token
                .item_data()
                .map_or_else(|| fallback.to_string(), |d| keys::market_item_key(&d.name)),
            TokenClass::Nametag => fallback.to_string(),
        }
    }

    async fn receive_plain(&self, key: &str, flow: &TokenFlow) -> MarketResult<Settlement> {
        let token = match self.import(flow).await {
            Ok(token) => token,
            Err(e) if e.is_retryable() => return Err(e),
            Err(e) => return self.discard(key, e.to_string()),
        };
        let wallet_key = self.wallet_key_for(&token, key);
        self.collections.wallet_put(&wallet_key, &token)?;
        self.collections.mailbox_remove(key)?;

        info!("Received {:?} token {} into wallet", token.token_class, token.token_id);
        Ok(Settlement::Received { key: wallet_key })
    }

    async fn settle_payment(
        &self,
        key: &str,
        payment: &TokenFlow,
        message: TransferMessage,
    ) -> MarketResult<Settlement> {
        let TransferMessage { item, back_ref } = message;
        let Some(buyer) = self.collections.lookup_username(&back_ref)? else {
            return Err(MarketError::UnknownOwner(format!(
                "Payer {back_ref} of {item} not in directory yet"
            )));
        };

        let coin = match self.import(payment).await {
            Ok(coin) => coin,
            Err(e) if e.is_retryable() => return Err(e),
            Err(e) => return self.discard(key, e.to_string()),
        };

        // A previous run got as far as banking the coin; only cleanup remains.
        let coin_key = keys::coin_key(&coin.token_id);
        if self.collections.wallet_get(&coin_key)?.as_ref() == Some(&coin) {
            debug!("Payment {} already settled, clearing mailbox", coin.token_id);
            self.clear_sold_listing(&item).await?;
            self.collections.mailbox_remove(key)?;
            return Ok(Settlement::Completed { item, buyer });
        }

        match self.send_item(&item, &buyer, &back_ref, payment).await {
            Ok(()) => {
                self.collections.wallet_put(&coin_key, &coin)?;
                self.clear_sold_listing(&item).await?;
                self.collections.mailbox_remove(key)?;
                info!(
                    "Sold '{}' to {} for coin {} ({})",
                    item, buyer, coin.token_id, coin.token_value
                );
                Ok(Settlement::Completed { item, buyer })
            }
            Err(e) if e.is_retryable() => Err(e),
            Err(e) => {
                warn!("Cannot deliver '{}' to {}: {}; refunding", item, buyer, e);
                self.refund(&coin, &buyer, &back_ref, payment).await?;
                self.collections.mailbox_remove(key)?;
                Ok(Settlement::Refunded { item, buyer })
            }
        }
    }

    /// Transfer the listing for `item` to the buyer. The listing itself is
    /// left in place until the coin is banked.
    async fn send_item(
        &self,
        item: &str,
        buyer: &str,
        back_ref: &Address,
        payment: &TokenFlow,
    ) -> MarketResult<()> {
        let Some(listing) = self.collections.listing_get(item)? else {
            return Err(MarketError::NotFound(format!("Item {item} no longer listed")));
        };
        let salt = derived_salt(payment, "item");
        if self.sent_by_us(&listing, &salt) {
            // The buyer received it on an earlier run and listed it again.
            debug!("Item '{}' already went to {} for this payment", item, buyer);
            return Ok(());
        }
        let tx = self
            .engine
            .create_transfer(&listing, back_ref.as_str(), &salt, self.identity.secret(), None)
            .await?;
        let sent = self.engine.apply_tx(&listing, tx)?;
        self.collections
            .deliver(buyer, &keys::market_item_key(item), &sent)
    }

    fn sent_by_us(&self, token: &TokenFlow, salt: &str) -> bool {
        let me = self.identity.address();
        token
            .proof_chain
            .iter()
            .any(|step| step.transfer.salt == salt && &step.transfer.sender == me)
    }

    /// Drop the listing for `item` if it is our copy of an already spent token.
    async fn clear_sold_listing(&self, item: &str) -> MarketResult<()> {
        let Some(listing) = self.collections.listing_get(item)? else {
            return Ok(());
        };
        if listing.current_owner() != self.identity.address() {
            return Ok(());
        }
        let status = self.engine.status(&listing, self.identity.secret()).await?;
        if !status.unspent {
            self.collections.listing_remove(item)?;
        }
        Ok(())
    }

    async fn refund(
        &self,
        coin: &TokenFlow,
        buyer: &str,
        back_ref: &Address,
        payment: &TokenFlow,
    ) -> MarketResult<()> {
        let tx = self
            .engine
            .create_transfer(
                coin,
                back_ref.as_str(),
                &derived_salt(payment, "refund"),
                self.identity.secret(),
                None,
            )
            .await?;
        let returned = self.engine.apply_tx(coin, tx)?;
        self.collections
            .deliver(buyer, &keys::coin_key(&coin.token_id), &returned)
    }
}
