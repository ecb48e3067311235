use tracing::debug;

use super::Market;
use crate::error::MarketResult;
use crate::token::{ItemData, TokenFlow, TokenValue};
use crate::traits::{RandomSource, ReplicatedStore, TimeProvider, TokenEngine};
use crate::viewers::ViewerHandle;

/// Snapshot of this peer's wallet.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Inventory {
    pub coins: Vec<TokenFlow>,
    pub items: Vec<TokenFlow>,
    /// Exact sum of coin values.
    pub balance: TokenValue,
}

impl<S, E, R, C> Market<S, E, R, C>
where
    S: ReplicatedStore,
    E: TokenEngine,
    R: RandomSource,
    C: TimeProvider,
{
    /// Metadata of every item currently listed, in no particular order.
    pub fn get_market_list(&self) -> MarketResult<Vec<ItemData>> {
        Ok(self
            .collections
            .listings()?
            .into_iter()
            .filter_map(|(key, token)| {
                let data = token.item_data();
                if data.is_none() {
                    debug!("Listing {} is not an item, hiding it", key);
                }
                data
            })
            .collect())
    }

    /// Coins and items held in the wallet. Payments parked for redelivery
    /// are already spent and count towards neither.
    pub fn get_inventory_list(&self) -> MarketResult<Inventory> {
        let mut inventory = Inventory::default();
        for (_, token) in self.collections.wallet_entries()? {
            if token.pending.is_some() {
                continue;
            }
            if token.is_coin() {
                inventory.coins.push(token);
            } else if token.is_item() {
                inventory.items.push(token);
            }
        }
        inventory.balance = inventory.coins.iter().map(|c| &c.token_value).sum();
        Ok(inventory)
    }

    /// Receive the market list every time the marketplace changes.
    pub fn register_market_viewer<F>(&self, viewer: F) -> ViewerHandle
    where
        F: Fn(&Vec<ItemData>) + Send + Sync + 'static,
    {
        self.market_viewers.register(viewer)
    }

    /// Receive an inventory snapshot every time the wallet changes.
    pub fn register_inventory_viewer<F>(&self, viewer: F) -> ViewerHandle
    where
        F: Fn(&Inventory) + Send + Sync + 'static,
    {
        self.inventory_viewers.register(viewer)
    }

    pub(crate) fn push_market_view(&self) -> MarketResult<()> {
        if self.market_viewers.has_viewers() {
            let list = self.get_market_list()?;
            self.market_viewers.notify(&list);
        }
        Ok(())
    }

    pub(crate) fn push_inventory_view(&self) -> MarketResult<()> {
        if self.inventory_viewers.has_viewers() {
            let inventory = self.get_inventory_list()?;
            self.inventory_viewers.notify(&inventory);
        }
        Ok(())
    }
}
