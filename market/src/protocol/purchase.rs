use tracing::{debug, error, info, warn};

use super::Market;
use crate::error::{MarketError, MarketResult};
use crate::identity::Address;
use crate::keys;
use crate::token::{TokenFlow, TokenValue, TransferMessage};
use crate::traits::{RandomSource, ReplicatedStore, TimeProvider, TokenEngine};

/// What a successful purchase delivered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PurchaseReceipt {
    pub item: String,
    pub seller: String,
    pub coin_id: String,
    pub value: TokenValue,
}

impl<S, E, R, C> Market<S, E, R, C>
where
    S: ReplicatedStore,
    E: TokenEngine,
    R: RandomSource,
    C: TimeProvider,
{
    /// First coin in the wallet the oracle reports as owned and unspent.
    async fn select_coin(&self) -> MarketResult<Option<(String, TokenFlow)>> {
        for (key, token) in self.collections.wallet_entries()? {
            if !token.is_coin() {
                continue;
            }
            let status = self.engine.status(&token, self.identity.secret()).await?;
            if status.is_spendable() {
                return Ok(Some((key, token)));
            }
            debug!("Skipping stale coin {} ({:?})", token.token_id, status);
        }
        Ok(None)
    }

    fn resolve_owner(&self, owner: &Address) -> MarketResult<String> {
        self.collections
            .lookup_username(owner)?
            .ok_or_else(|| MarketError::UnknownOwner(format!("No directory record for {owner}")))
    }

    /// Deliver every payment parked in the wallet by a purchase whose
    /// delivery failed. Returns how many went out.
    pub async fn redeliver_payments(&self) -> MarketResult<usize> {
        let _guard = self.lock().await;
        self.redeliver_parked()
    }

    pub(crate) fn has_parked_payments(&self) -> MarketResult<bool> {
        Ok(self
            .collections
            .wallet_entries()?
            .iter()
            .any(|(key, _)| keys::parse_payment_key(key).is_some()))
    }

    fn redeliver_parked(&self) -> MarketResult<usize> {
        let mut delivered = 0;
        for (key, payment) in self.collections.wallet_entries()? {
            let Some((token_id, seller)) = keys::parse_payment_key(&key) else {
                continue;
            };
            self.collections
                .deliver(seller, &keys::coin_key(token_id), &payment)?;
            self.collections.wallet_remove(&key)?;
            info!("Redelivered payment {} to {}", token_id, seller);
            delivered += 1;
        }
        Ok(delivered)
    }

    /// Pay for a listed item with one coin.
    ///
    /// The coin is delivered to the seller's mailbox; the item arrives in
    /// this peer's mailbox later, once the seller's settlement runs. Every
    /// failure before the spend is committed leaves all maps untouched. A
    /// committed payment that cannot be delivered stays parked in the wallet
    /// and goes out with the next purchase or rescan.
    pub async fn purchase(&self, item_name: &str) -> MarketResult<PurchaseReceipt> {
        let _guard = self.lock().await;
        if let Err(e) = self.redeliver_parked() {
            warn!("Parked payments still undelivered: {}", e);
        }

        let Some(listing) = self.collections.listing_get(item_name)? else {
            return Err(MarketError::NotFound(format!("Item {item_name} not listed")));
        };
        let Some((coin_key, coin)) = self.select_coin().await? else {
            return Err(MarketError::NoFunds(item_name.to_string()));
        };
        let seller = self.resolve_owner(listing.current_owner())?;

        if self.store().is_online(&seller) == Some(false) {
            return Err(MarketError::SellerOffline(format!(
                "Owner {seller} of {item_name} is offline"
            )));
        }

        let message = TransferMessage {
            item: item_name.to_string(),
            back_ref: self.identity.address().clone(),
        };
        let salt = self.random.random_hex_256();
        let tx = self
            .engine
            .create_transfer(
                &coin,
                &self.engine.nametag_ref(&seller),
                &salt,
                self.identity.secret(),
                Some(message),
            )
            .await?;
        let payment = self.engine.apply_tx(&coin, tx)?;

        // The spend is committed: from here on the signed payment must stay
        // reachable until the seller's mailbox has it.
        let parked_key = keys::payment_key(&coin.token_id, &seller);
        let parked = match self.collections.wallet_put(&parked_key, &payment) {
            Ok(()) => true,
            Err(e) => {
                warn!("Could not park payment {}: {}", coin.token_id, e);
                false
            }
        };

        let delivery_key = keys::coin_key(&coin.token_id);
        if let Err(e) = self.collections.deliver(&seller, &delivery_key, &payment) {
            if parked {
                warn!(
                    "Payment for '{}' not delivered to {}: {}; parked for redelivery",
                    item_name, seller, e
                );
                if let Err(e) = self.collections.wallet_remove(&coin_key) {
                    warn!("Spent coin {} still in wallet: {}", coin.token_id, e);
                }
            } else {
                let exported = self.engine.export_flow(&payment).unwrap_or_default();
                error!(
                    "Payment for '{}' committed but neither delivered to {} nor parked: {}; flow: {}",
                    item_name, seller, e, exported
                );
            }
            return Err(e);
        }

        for key in [&coin_key, &parked_key] {
            if let Err(e) = self.collections.wallet_remove(key) {
                warn!(
                    "Coin {} delivered but {} still in wallet (stale copy): {}",
                    coin.token_id, key, e
                );
            }
        }

        info!(
            "Paid {} with coin {} for '{}'",
            seller, coin.token_id, item_name
        );
        Ok(PurchaseReceipt {
            item: item_name.to_string(),
            seller,
            coin_id: coin.token_id,
            value: coin.token_value,
        })
    }
}
