use tracing::info;

use super::Market;
use crate::config::DEFAULT_TOKEN_VALUE;
use crate::error::MarketResult;
use crate::keys;
use crate::token::{ItemData, TokenClass, TokenFlow, TokenValue};
use crate::traits::{MintRequest, RandomSource, ReplicatedStore, TimeProvider, TokenEngine};

impl<S, E, R, C> Market<S, E, R, C>
where
    S: ReplicatedStore,
    E: TokenEngine,
    R: RandomSource,
    C: TimeProvider,
{
    async fn mint_fresh(
        &self,
        class: TokenClass,
        immutable_data: Option<serde_json::Value>,
    ) -> MarketResult<TokenFlow> {
        let request = MintRequest {
            token_id: self.random.random_hex_256(),
            token_class: class,
            token_value: TokenValue::from(DEFAULT_TOKEN_VALUE),
            immutable_data,
            nonce: self.random.random_hex_256(),
            salt: self.random.random_hex_256(),
        };
        self.engine.mint(request, self.identity.secret()).await
    }

    async fn mint_item(&self, name: &str, description: &str) -> MarketResult<TokenFlow> {
        let data = ItemData::new_at(name, description, &self.time).to_value()?;
        self.mint_fresh(TokenClass::Item, Some(data)).await
    }

    /// Mint a coin of the default value into the wallet.
    pub async fn add_coin(&self) -> MarketResult<TokenFlow> {
        let _guard = self.lock().await;
        let coin = self.mint_fresh(TokenClass::Coin, None).await?;
        self.collections
            .wallet_put(&keys::coin_key(&coin.token_id), &coin)?;
        info!("Minted coin {} ({})", coin.token_id, coin.token_value);
        Ok(coin)
    }

    /// Mint an item straight onto the marketplace, listed by this peer.
    pub async fn add_market_item(&self, name: &str, description: &str) -> MarketResult<TokenFlow> {
        let _guard = self.lock().await;
        let item = self.mint_item(name, description).await?;
        self.collections.listing_put(name, &item)?;
        self.collections
            .register_owner(item.current_owner(), self.name())?;
        info!("Minted and listed item '{}'", name);
        Ok(item)
    }

    /// Mint an item into the wallet without listing it.
    pub async fn add_item(&self, name: &str, description: &str) -> MarketResult<TokenFlow> {
        let _guard = self.lock().await;
        let item = self.mint_item(name, description).await?;
        self.collections
            .wallet_put(&keys::market_item_key(name), &item)?;
        info!("Minted item '{}' into wallet", name);
        Ok(item)
    }
}
