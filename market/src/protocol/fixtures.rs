//! Shared setup for protocol unit tests.

use crate::engine::SignedTokenEngine;
use crate::identity::Secret;
use crate::mocks::{MockLedger, MockRandom, MockStore, MockTime, SharedStoreHandle};
use crate::protocol::Market;

pub(crate) type TestMarket = Market<MockStore, SignedTokenEngine<MockLedger>, MockRandom, MockTime>;

/// Peers sharing one mock substrate and one ledger.
#[derive(Default)]
pub(crate) struct Room {
    pub shared: SharedStoreHandle,
    pub ledger: MockLedger,
}

impl Room {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn peer(&self, name: &str) -> TestMarket {
        Market::new(
            self.shared.create_party_view(name),
            SignedTokenEngine::new(self.ledger.clone()),
            MockRandom::new(name),
            MockTime::default(),
            name,
            Secret::new(format!("{name}-secret")),
        )
        .unwrap()
    }

    /// A peer that has claimed its nametag.
    pub async fn join(&self, name: &str) -> TestMarket {
        let market = self.peer(name);
        market.initialize().await.unwrap();
        market
    }
}
