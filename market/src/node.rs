//! Market node lifecycle: attach, sync, initialize, serve, and shutdown.
//!
//! [`MarketNode`] wires a [`Market`] to its [`Dispatcher`] the way a running
//! peer needs it: notifications are subscribed before the initial sync so
//! nothing that arrives during sync is missed, the identity is initialized
//! once the replica is trustworthy, and the dispatcher loop runs on its own
//! task until [`MarketNode::shutdown`].

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::dispatcher::Dispatcher;
use crate::error::MarketResult;
use crate::protocol::Market;
use crate::traits::{RandomSource, ReplicatedStore, TimeProvider, TokenEngine};

/// Snapshot of a running node for the status endpoint and the CLI.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NodeStatus {
    pub status: &'static str,
    pub service: &'static str,
    pub name: String,
    pub address: String,
    pub online_peers: Vec<String>,
    pub peer_count: usize,
    pub listings: usize,
    pub coins: usize,
    pub items: usize,
    pub balance: String,
    pub uptime_secs: u64,
    pub version: &'static str,
}

pub struct MarketNode<S, E, R, C>
where
    S: ReplicatedStore,
    E: TokenEngine,
    R: RandomSource,
    C: TimeProvider,
{
    market: Arc<Market<S, E, R, C>>,
    shutdown: CancellationToken,
    dispatcher: Option<JoinHandle<()>>,
    started_at: Instant,
}

impl<S, E, R, C> MarketNode<S, E, R, C>
where
    S: ReplicatedStore,
    E: TokenEngine,
    R: RandomSource,
    C: TimeProvider,
{
    /// Bring a peer online.
    ///
    /// Waits up to `sync_timeout` for the substrate's initial sync; if the
    /// substrate has no such signal or it does not arrive in time, the peer
    /// initializes anyway and accepts the race.
    pub async fn start(market: Market<S, E, R, C>, sync_timeout: Duration) -> MarketResult<Self> {
        let market = Arc::new(market);
        let mut dispatcher = Dispatcher::attach(market.clone())?;

        match tokio::time::timeout(sync_timeout, market.store().wait_synced()).await {
            Ok(Ok(true)) => info!("Initial sync complete"),
            Ok(Ok(false)) => info!("Substrate has no sync signal, initializing immediately"),
            Ok(Err(e)) => warn!("Waiting for sync failed, initializing anyway: {}", e),
            Err(_) => warn!(
                "No sync within {}s, initializing on a possibly stale replica",
                sync_timeout.as_secs()
            ),
        }

        market.initialize().await?;
        market.set_online(true)?;
        dispatcher.rescan_mailbox()?;

        let shutdown = CancellationToken::new();
        let handle = tokio::spawn(dispatcher.run(shutdown.clone()));
        info!("Node '{}' started", market.name());

        Ok(Self {
            market,
            shutdown,
            dispatcher: Some(handle),
            started_at: Instant::now(),
        })
    }

    pub const fn market(&self) -> &Arc<Market<S, E, R, C>> {
        &self.market
    }

    /// Token cancelled when the node shuts down, for tasks tied to its life.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    pub fn status(&self) -> MarketResult<NodeStatus> {
        node_status(&self.market, self.started_at)
    }

    /// Stop the dispatcher, mark presence offline and close the substrate.
    pub async fn shutdown(mut self) -> MarketResult<()> {
        self.shutdown.cancel();
        if let Some(handle) = self.dispatcher.take() {
            if let Err(e) = handle.await {
                error!("Dispatcher task failed: {}", e);
            }
        }
        self.market.shutdown().await
    }
}

/// Build a status report for `market`.
pub fn node_status<S, E, R, C>(
    market: &Market<S, E, R, C>,
    started_at: Instant,
) -> MarketResult<NodeStatus>
where
    S: ReplicatedStore,
    E: TokenEngine,
    R: RandomSource,
    C: TimeProvider,
{
    let inventory = market.get_inventory_list()?;
    let online_peers = market.store().online_peers();
    Ok(NodeStatus {
        status: "ok",
        service: "market-node",
        name: market.name().to_string(),
        address: market.identity().address().to_string(),
        peer_count: online_peers.len(),
        online_peers,
        listings: market.get_market_list()?.len(),
        coins: inventory.coins.len(),
        items: inventory.items.len(),
        balance: inventory.balance.to_string(),
        uptime_secs: started_at.elapsed().as_secs(),
        version: env!("CARGO_PKG_VERSION"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{MemoryLedger, SignedTokenEngine};
    use crate::identity::Secret;
    use crate::mocks::{MockRandom, MockStore, MockTime, SharedStoreHandle};

    fn market(
        store: MockStore,
        name: &str,
    ) -> Market<MockStore, SignedTokenEngine<MemoryLedger>, MockRandom, MockTime> {
        Market::new(
            store,
            SignedTokenEngine::new(MemoryLedger::new()),
            MockRandom::new(name),
            MockTime::default(),
            name,
            Secret::new(name),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_start_initializes_and_goes_online() {
        let shared = SharedStoreHandle::new();
        let store = shared.create_party_view("alice");
        let node = MarketNode::start(market(store.clone(), "alice"), Duration::from_secs(1))
            .await
            .unwrap();

        assert_eq!(store.is_online("alice"), Some(true));
        let status = node.status().unwrap();
        assert_eq!(status.name, "alice");
        assert_eq!(status.online_peers, vec!["alice".to_string()]);

        node.shutdown().await.unwrap();
        assert_eq!(store.is_online("alice"), Some(false));
        assert!(store.is_closed());
    }

    #[tokio::test]
    async fn test_start_without_sync_signal_still_initializes() {
        let store = MockStore::new("bob").without_sync_signal();
        let node = MarketNode::start(market(store.clone(), "bob"), Duration::from_millis(50))
            .await
            .unwrap();
        assert!(node
            .market()
            .collections()
            .wallet_contains("nametag_bob")
            .unwrap());
        node.shutdown().await.unwrap();
    }
}
