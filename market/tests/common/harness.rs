//! Multi-peer test harness for integration testing.
//!
//! Every peer gets its own view of one shared mock substrate and an engine
//! over one shared ledger, so replication is instantaneous and spends are
//! globally exclusive. Dispatchers are pumped explicitly by [`MarketHarness::settle`],
//! which makes multi-peer scenarios deterministic.

use std::collections::HashMap;
use std::sync::Arc;

use market::config::collections;
use market::dispatcher::{DispatchReport, Dispatcher};
use market::engine::SignedTokenEngine;
use market::mocks::{MockLedger, MockRandom, MockStore, MockTime, SharedStoreHandle};
use market::protocol::{Market, Settlement};
use market::token::{TokenFlow, TokenValue};
use market::{keys, MarketError, Secret};

pub type PeerMarket = Market<MockStore, SignedTokenEngine<MockLedger>, MockRandom, MockTime>;
pub type PeerDispatcher = Dispatcher<MockStore, SignedTokenEngine<MockLedger>, MockRandom, MockTime>;

/// One running peer.
pub struct PeerContext {
    pub name: String,
    pub market: Arc<PeerMarket>,
    pub store: MockStore,
    dispatcher: PeerDispatcher,
}

/// Everything the peers' dispatchers did during one [`MarketHarness::settle`].
#[derive(Debug, Default)]
pub struct SettleReport {
    pub settlements: Vec<(String, Settlement)>,
    pub errors: Vec<(String, MarketError)>,
}

impl SettleReport {
    pub fn completed(&self) -> usize {
        self.count(|s| matches!(s, Settlement::Completed { .. }))
    }

    pub fn refunded(&self) -> usize {
        self.count(|s| matches!(s, Settlement::Refunded { .. }))
    }

    pub fn count(&self, predicate: impl Fn(&Settlement) -> bool) -> usize {
        self.settlements.iter().filter(|(_, s)| predicate(s)).count()
    }
}

/// Where a copy of an item lives at one moment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Holding {
    Listed { owner: String },
    Wallet { peer: String },
    Mailbox { peer: String },
}

pub struct MarketHarness {
    shared: SharedStoreHandle,
    ledger: MockLedger,
    peers: Vec<PeerContext>,
}

#[allow(dead_code)]
impl MarketHarness {
    /// Start one initialized, online peer per name.
    pub async fn new(names: &[&str]) -> Self {
        let mut harness = Self {
            shared: SharedStoreHandle::new(),
            ledger: MockLedger::new(),
            peers: Vec::with_capacity(names.len()),
        };
        for name in names {
            harness.add_peer(name).await;
        }
        harness
    }

    /// A market for `name` on the shared substrate, not yet initialized.
    ///
    /// Calling this twice with the same name gives two devices of one peer:
    /// same address, same wallet, separate protocol locks.
    pub fn device(&self, name: &str) -> PeerMarket {
        Market::new(
            self.shared.create_party_view(name),
            SignedTokenEngine::new(self.ledger.clone()),
            MockRandom::new(&format!("{name}-{}", self.peers.len())),
            MockTime::default(),
            name,
            Secret::new(format!("{name}-secret")),
        )
        .unwrap()
    }

    pub async fn add_peer(&mut self, name: &str) -> Arc<PeerMarket> {
        let market = Arc::new(self.device(name));
        let dispatcher = Dispatcher::attach(market.clone()).unwrap();
        market.initialize().await.unwrap();
        market.set_online(true).unwrap();
        self.peers.push(PeerContext {
            name: name.to_string(),
            store: self.shared.create_party_view(name),
            market: market.clone(),
            dispatcher,
        });
        market
    }

    pub fn peer(&self, name: &str) -> &PeerContext {
        self.peers
            .iter()
            .find(|p| p.name == name)
            .unwrap_or_else(|| panic!("no peer named {name}"))
    }

    pub fn market(&self, name: &str) -> &PeerMarket {
        &self.peer(name).market
    }

    pub fn shared(&self) -> &SharedStoreHandle {
        &self.shared
    }

    pub fn ledger(&self) -> &MockLedger {
        &self.ledger
    }

    /// Pump every dispatcher until a full round does no work.
    pub async fn settle(&mut self) -> SettleReport {
        let mut report = SettleReport::default();
        for _ in 0..100 {
            let mut idle = true;
            for peer in &mut self.peers {
                let DispatchReport {
                    processed,
                    settlements,
                    errors,
                } = peer.dispatcher.pump().await;
                idle &= processed == 0;
                report
                    .settlements
                    .extend(settlements.into_iter().map(|s| (peer.name.clone(), s)));
                report
                    .errors
                    .extend(errors.into_iter().map(|e| (peer.name.clone(), e)));
            }
            if idle {
                return report;
            }
        }
        panic!("dispatchers did not go quiet within 100 rounds");
    }

    /// Re-queue every mailbox entry, as the periodic rescan does.
    pub fn rescan(&mut self) {
        for peer in &mut self.peers {
            peer.dispatcher.rescan_mailbox().unwrap();
        }
    }

    pub fn balance(&self, name: &str) -> TokenValue {
        self.market(name).get_inventory_list().unwrap().balance
    }

    /// Sum of every peer's coin balance.
    pub fn total_balance(&self) -> TokenValue {
        self.peers.iter().map(|p| self.balance(&p.name)).sum()
    }

    pub fn owns_item(&self, name: &str, item: &str) -> bool {
        self.market(name)
            .get_inventory_list()
            .unwrap()
            .items
            .iter()
            .filter_map(TokenFlow::item_data)
            .any(|data| data.name == item)
    }

    /// Every place a copy of `item` currently sits.
    pub fn holdings(&self, item: &str) -> Vec<Holding> {
        let key = keys::market_item_key(item);
        let names: HashMap<String, String> = self
            .peers
            .iter()
            .map(|p| {
                (
                    p.market.identity().address().to_string(),
                    p.name.clone(),
                )
            })
            .collect();
        let mut holdings = Vec::new();

        if let Some(value) = self.shared.collection(collections::MARKETPLACE).get(&key) {
            let flow = TokenFlow::from_value(value).unwrap();
            let owner = flow.current_owner().to_string();
            holdings.push(Holding::Listed {
                owner: names.get(&owner).cloned().unwrap_or(owner),
            });
        }
        for peer in &self.peers {
            let wallet = peer.market.collections().wallet_name().to_string();
            if self.shared.collection(&wallet).contains_key(&key) {
                holdings.push(Holding::Wallet {
                    peer: peer.name.clone(),
                });
            }
            let mailbox = peer.market.collections().mailbox_name().to_string();
            if self.shared.collection(&mailbox).contains_key(&key) {
                holdings.push(Holding::Mailbox {
                    peer: peer.name.clone(),
                });
            }
        }
        holdings
    }

    pub fn mailbox_len(&self, name: &str) -> usize {
        let mailbox = self.market(name).collections().mailbox_name().to_string();
        self.shared.collection(&mailbox).len()
    }
}
