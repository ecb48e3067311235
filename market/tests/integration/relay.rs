//! End-to-end trade between real nodes over a loopback relay.

use std::sync::Arc;
use std::time::Duration;

use market::engine::SignedTokenEngine;
use market::protocol::Market;
use market::relay::{RelayLedger, RelayServer, RelayStore};
use market::traits::{ReplicatedStore, SystemTimeProvider, ThreadRng};
use market::{MarketError, MarketNode, Secret, TokenValue};
use tokio_util::sync::CancellationToken;

type RelayNode = MarketNode<RelayStore, SignedTokenEngine<RelayLedger>, ThreadRng, SystemTimeProvider>;

async fn start_node(addr: &str, name: &str) -> RelayNode {
    let store = RelayStore::connect(addr, "market", name).await.unwrap();
    let market = Market::new(
        store.clone(),
        SignedTokenEngine::new(RelayLedger::new(store)),
        ThreadRng::new(),
        SystemTimeProvider::new(),
        name,
        Secret::new(format!("{name}-secret")),
    )
    .unwrap();
    MarketNode::start(market, Duration::from_secs(5)).await.unwrap()
}

async fn eventually<F: Fn() -> bool>(what: &str, condition: F) {
    for _ in 0..500 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("timed out waiting for {what}");
}

#[tokio::test]
async fn test_trade_over_relay() {
    let shutdown = CancellationToken::new();
    let relay = Arc::new(RelayServer::new());
    let (addr, _) = relay
        .clone()
        .spawn("127.0.0.1:0", shutdown.clone())
        .await
        .unwrap();
    let addr = addr.to_string();

    let sam = start_node(&addr, "sam").await;
    let bea = start_node(&addr, "bea").await;
    sam.market().add_market_item("sword", "sharp").await.unwrap();
    bea.market().add_coin().await.unwrap();

    eventually("listing to replicate", || {
        bea.market().get_market_list().unwrap().len() == 1
    })
    .await;
    eventually("seller directory record", || {
        bea.market()
            .collections()
            .lookup_username(sam.market().identity().address())
            .unwrap()
            .is_some()
    })
    .await;

    bea.market().purchase("sword").await.unwrap();
    eventually("item to arrive", || {
        bea.market().get_inventory_list().unwrap().items.len() == 1
    })
    .await;
    eventually("seller proceeds", || {
        sam.market().get_inventory_list().unwrap().balance == TokenValue::from(10)
    })
    .await;
    assert!(bea.market().get_market_list().unwrap().is_empty());
    // The coin and the item were each spent once.
    assert_eq!(relay.ledger().spent_count(), 2);

    let status = relay.status();
    assert_eq!(status.clients, 2);

    sam.shutdown().await.unwrap();
    bea.shutdown().await.unwrap();
    shutdown.cancel();
}

#[tokio::test]
async fn test_disconnected_seller_reads_as_offline() {
    let shutdown = CancellationToken::new();
    let (addr, _) = Arc::new(RelayServer::new())
        .spawn("127.0.0.1:0", shutdown.clone())
        .await
        .unwrap();
    let addr = addr.to_string();

    let sam = start_node(&addr, "sam").await;
    let bea = start_node(&addr, "bea").await;
    sam.market().add_market_item("sword", "sharp").await.unwrap();
    bea.market().add_coin().await.unwrap();
    eventually("listing to replicate", || {
        bea.market().get_market_list().unwrap().len() == 1
    })
    .await;
    eventually("seller presence", || {
        bea.market().store().is_online("sam") == Some(true)
    })
    .await;

    sam.shutdown().await.unwrap();
    eventually("seller to go offline", || {
        bea.market().store().is_online("sam") == Some(false)
    })
    .await;

    let err = bea.market().purchase("sword").await.unwrap_err();
    assert!(matches!(err, MarketError::SellerOffline(_)));
    assert_eq!(
        bea.market().get_inventory_list().unwrap().balance,
        TokenValue::from(10)
    );

    bea.shutdown().await.unwrap();
    shutdown.cancel();
}
