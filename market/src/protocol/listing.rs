use tracing::{info, warn};

use super::Market;
use crate::error::{MarketError, MarketResult};
use crate::keys;
use crate::token::TokenFlow;
use crate::traits::{RandomSource, ReplicatedStore, TimeProvider, TokenEngine};

impl<S, E, R, C> Market<S, E, R, C>
where
    S: ReplicatedStore,
    E: TokenEngine,
    R: RandomSource,
    C: TimeProvider,
{
    /// Oracle check that this peer may still spend `token`. The wallet and
    /// marketplace are caches; only the oracle is authoritative.
    async fn ensure_spendable(&self, item_name: &str, token: &TokenFlow) -> MarketResult<()> {
        let status = self.engine.status(token, self.identity.secret()).await?;
        if !status.owned {
            return Err(MarketError::NotOwned(format!(
                "Item {item_name} not owned by {}",
                self.name()
            )));
        }
        if !status.unspent {
            return Err(MarketError::NotSpendable(format!(
                "Item {item_name} not spendable by {}",
                self.name()
            )));
        }
        Ok(())
    }

    /// Move an owned item from the wallet into the marketplace.
    pub async fn list_item(&self, item_name: &str) -> MarketResult<()> {
        let _guard = self.lock().await;
        let wallet_key = keys::market_item_key(item_name);
        let Some(token) = self.collections.wallet_get(&wallet_key)? else {
            return Err(MarketError::NotFound(format!("Item {item_name} not in wallet")));
        };
        self.ensure_spendable(item_name, &token).await?;

        self.collections.listing_put(item_name, &token)?;
        self.collections
            .register_owner(token.current_owner(), self.name())?;
        if !self.collections.wallet_remove(&wallet_key)? {
            warn!("Item {} vanished from wallet while listing", item_name);
        }

        info!("Listed item '{}'", item_name);
        Ok(())
    }

    /// Take one of this peer's listings off the marketplace and back into the
    /// wallet.
    pub async fn unlist_item(&self, item_name: &str) -> MarketResult<()> {
        let _guard = self.lock().await;
        let Some(token) = self.collections.listing_get(item_name)? else {
            return Err(MarketError::NotFound(format!("Item {item_name} not listed")));
        };
        self.ensure_spendable(item_name, &token).await?;

        self.collections
            .wallet_put(&keys::market_item_key(item_name), &token)?;
        self.collections.listing_remove(item_name)?;

        info!("Unlisted item '{}'", item_name);
        Ok(())
    }
}
