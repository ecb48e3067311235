use serde_json::json;
use tracing::{debug, info};

use super::Market;
use crate::error::MarketResult;
use crate::keys;
use crate::traits::{RandomSource, ReplicatedStore, TimeProvider, TokenEngine};

impl<S, E, R, C> Market<S, E, R, C>
where
    S: ReplicatedStore,
    E: TokenEngine,
    R: RandomSource,
    C: TimeProvider,
{
    /// Claim this peer's nametag and publish its directory records.
    ///
    /// Idempotent: returns `false` without writing anything if the nametag is
    /// already in the wallet. The wallet, not the directory, is checked so a
    /// lagging `users` map cannot trigger a second mint.
    pub async fn initialize(&self) -> MarketResult<bool> {
        let _guard = self.lock().await;
        let name = self.identity.display_name();
        let address = self.identity.address();
        let tag_key = keys::nametag_key(name);

        if self.collections.wallet_contains(&tag_key)? {
            debug!("Nametag for '{}' already in wallet, skipping init", name);
            return Ok(false);
        }

        let nametag = self
            .engine
            .create_nametag(name, json!({ "dest_ref": address }), self.identity.secret())
            .await?;
        self.collections.wallet_put(&tag_key, &nametag)?;
        self.collections.publish_user(name, address)?;

        info!("Initialized identity '{}' ({})", name, address);
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use crate::config::collections;
    use crate::engine::{MemoryLedger, SignedTokenEngine};
    use crate::identity::Secret;
    use crate::mocks::{MockRandom, MockStore, MockTime, SharedStoreHandle};
    use crate::protocol::Market;
    use crate::traits::ReplicatedStore;

    #[tokio::test]
    async fn test_initialize_twice_writes_once() {
        let shared = SharedStoreHandle::new();
        let store = shared.create_party_view("alice");
        let market = Market::new(
            store.clone(),
            SignedTokenEngine::new(MemoryLedger::new()),
            MockRandom::new("alice"),
            MockTime::default(),
            "alice",
            Secret::new("alice-secret"),
        )
        .unwrap();

        assert!(market.initialize().await.unwrap());
        let writes = shared.write_count();
        assert!(!market.initialize().await.unwrap());
        assert_eq!(shared.write_count(), writes);

        assert_eq!(shared.collection(collections::USERS).len(), 2);
        let wallet = store
            .entries(market.collections().wallet_name())
            .unwrap();
        assert_eq!(wallet.len(), 1);
        assert_eq!(wallet[0].0, "nametag_alice");
    }

    #[tokio::test]
    async fn test_name_taken_by_another_secret_fails() {
        let ledger = MemoryLedger::new();
        let first = Market::new(
            MockStore::new("alice"),
            SignedTokenEngine::new(ledger.clone()),
            MockRandom::new("a"),
            MockTime::default(),
            "alice",
            Secret::new("one"),
        )
        .unwrap();
        let second = Market::new(
            MockStore::new("alice"),
            SignedTokenEngine::new(ledger),
            MockRandom::new("b"),
            MockTime::default(),
            "alice",
            Secret::new("two"),
        )
        .unwrap();

        first.initialize().await.unwrap();
        assert!(second.initialize().await.is_err());
    }
}
