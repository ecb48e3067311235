//! Marketplace protocols for one peer.
//!
//! [`Market`] owns the peer's identity and collection set and runs the
//! identity bootstrap, listing, purchase and settlement protocols against
//! its collaborators. It is generic over the substrate, the token engine,
//! randomness and time so the same code runs over the relay in production
//! and over mocks in tests.
//!
//! Every state-changing operation holds the peer's protocol lock for its
//! whole run, so protocol steps of one peer never interleave with each
//! other even when called from several tasks.

#[cfg(test)]
pub(crate) mod fixtures;
mod identity;
mod listing;
mod minting;
mod purchase;
mod settlement;
mod views;

pub use purchase::PurchaseReceipt;
pub use settlement::Settlement;
pub use views::Inventory;

use tokio::sync::{Mutex, MutexGuard};
use tracing::info;

use crate::collections::CollectionSet;
use crate::error::MarketResult;
use crate::identity::{Identity, Secret};
use crate::token::ItemData;
use crate::traits::{RandomSource, ReplicatedStore, TimeProvider, TokenEngine};
use crate::viewers::ViewerRegistry;

pub struct Market<S, E, R, C>
where
    S: ReplicatedStore,
    E: TokenEngine,
    R: RandomSource,
    C: TimeProvider,
{
    collections: CollectionSet<S>,
    engine: E,
    random: R,
    time: C,
    identity: Identity,
    protocol_lock: Mutex<()>,
    market_viewers: ViewerRegistry<Vec<ItemData>>,
    inventory_viewers: ViewerRegistry<Inventory>,
}

impl<S, E, R, C> Market<S, E, R, C>
where
    S: ReplicatedStore,
    E: TokenEngine,
    R: RandomSource,
    C: TimeProvider,
{
    /// Build a market for the peer named `name`. Nothing is written until
    /// [`Market::initialize`] runs.
    pub fn new(
        store: S,
        engine: E,
        random: R,
        time: C,
        name: &str,
        secret: Secret,
    ) -> MarketResult<Self> {
        let identity = Identity::derive(&engine, name, secret)?;
        let collections = CollectionSet::new(store, identity.address(), identity.display_name());
        info!(
            "Market session for '{}' at address {}",
            identity.display_name(),
            identity.address()
        );
        Ok(Self {
            collections,
            engine,
            random,
            time,
            identity,
            protocol_lock: Mutex::new(()),
            market_viewers: ViewerRegistry::new(),
            inventory_viewers: ViewerRegistry::new(),
        })
    }

    pub const fn identity(&self) -> &Identity {
        &self.identity
    }

    pub fn name(&self) -> &str {
        self.identity.display_name()
    }

    pub const fn collections(&self) -> &CollectionSet<S> {
        &self.collections
    }

    pub const fn engine(&self) -> &E {
        &self.engine
    }

    pub const fn store(&self) -> &S {
        self.collections.store()
    }

    async fn lock(&self) -> MutexGuard<'_, ()> {
        self.protocol_lock.lock().await
    }

    /// Publish this peer's presence.
    pub fn set_online(&self, online: bool) -> MarketResult<()> {
        self.store().set_presence(online)
    }

    /// Cancel viewers, mark presence offline and release the substrate.
    pub async fn shutdown(&self) -> MarketResult<()> {
        let _guard = self.lock().await;
        self.market_viewers.clear();
        self.inventory_viewers.clear();
        let presence = self.store().set_presence(false);
        self.store().close().await?;
        info!("Market session for '{}' closed", self.name());
        presence
    }
}
