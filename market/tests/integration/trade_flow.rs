//! Happy-path trades between peers.

use market::traits::TokenEngine;
use market::{MarketError, Settlement, TokenValue};

use crate::common::{Holding, MarketHarness};

#[tokio::test]
async fn test_initialize_is_idempotent_across_restarts() {
    let harness = MarketHarness::new(&["alice"]).await;
    let writes = harness.shared().write_count();

    assert!(!harness.market("alice").initialize().await.unwrap());
    // A second device of the same peer finds the nametag in the shared wallet.
    let device = harness.device("alice");
    assert!(!device.initialize().await.unwrap());
    assert_eq!(harness.shared().write_count(), writes);
}

#[tokio::test]
async fn test_full_trade_moves_item_and_coin() {
    let mut harness = MarketHarness::new(&["sam", "bea"]).await;
    harness
        .market("sam")
        .add_market_item("sword", "sharp")
        .await
        .unwrap();
    harness.market("bea").add_coin().await.unwrap();
    harness.settle().await;
    assert_eq!(harness.market("bea").get_market_list().unwrap().len(), 1);

    let receipt = harness.market("bea").purchase("sword").await.unwrap();
    assert_eq!(receipt.seller, "sam");
    // Paid, but nothing arrives until the seller's dispatcher runs.
    assert!(!harness.owns_item("bea", "sword"));
    assert_eq!(harness.mailbox_len("sam"), 1);

    let report = harness.settle().await;
    assert!(report.errors.is_empty(), "{:?}", report.errors);
    assert!(report.settlements.contains(&(
        "sam".to_string(),
        Settlement::Completed {
            item: "sword".into(),
            buyer: "bea".into()
        }
    )));

    assert!(harness.owns_item("bea", "sword"));
    assert_eq!(
        harness.holdings("sword"),
        vec![Holding::Wallet { peer: "bea".into() }]
    );
    assert_eq!(harness.balance("sam"), TokenValue::from(10));
    assert!(harness.balance("bea").is_zero());
    assert!(harness.market("bea").get_market_list().unwrap().is_empty());
    assert_eq!(harness.mailbox_len("sam"), 0);
    assert_eq!(harness.mailbox_len("bea"), 0);
}

#[tokio::test]
async fn test_bought_item_can_be_relisted_and_resold() {
    let mut harness = MarketHarness::new(&["sam", "bea", "cal"]).await;
    harness
        .market("sam")
        .add_market_item("lamp", "brass")
        .await
        .unwrap();
    harness.market("bea").add_coin().await.unwrap();
    harness.market("cal").add_coin().await.unwrap();

    harness.market("bea").purchase("lamp").await.unwrap();
    harness.settle().await;
    harness.market("bea").list_item("lamp").await.unwrap();
    assert_eq!(
        harness.holdings("lamp"),
        vec![Holding::Listed { owner: "bea".into() }]
    );

    let receipt = harness.market("cal").purchase("lamp").await.unwrap();
    assert_eq!(receipt.seller, "bea");
    harness.settle().await;

    assert!(harness.owns_item("cal", "lamp"));
    assert_eq!(
        harness.holdings("lamp"),
        vec![Holding::Wallet { peer: "cal".into() }]
    );
    assert_eq!(harness.balance("sam"), TokenValue::from(10));
    assert_eq!(harness.balance("bea"), TokenValue::from(10));
    assert!(harness.balance("cal").is_zero());
}

#[tokio::test]
async fn test_unlisted_item_cannot_be_bought() {
    let mut harness = MarketHarness::new(&["sam", "bea"]).await;
    harness.market("sam").add_item("vase", "blue").await.unwrap();
    harness.market("sam").list_item("vase").await.unwrap();
    harness.market("sam").unlist_item("vase").await.unwrap();
    harness.market("bea").add_coin().await.unwrap();
    harness.settle().await;

    let err = harness.market("bea").purchase("vase").await.unwrap_err();
    assert!(matches!(err, MarketError::NotFound(_)));
    assert!(harness.owns_item("sam", "vase"));
}

#[tokio::test]
async fn test_exported_flow_reimports_unchanged() {
    let harness = MarketHarness::new(&["bea"]).await;
    let market = harness.market("bea");
    let coin = market.add_coin().await.unwrap();

    let exported = market.engine().export_flow(&coin).unwrap();
    let imported = market.engine().import_flow(&exported).unwrap();
    assert_eq!(imported, coin);
    assert_eq!(market.engine().export_flow(&imported).unwrap(), exported);
}

#[tokio::test]
async fn test_purchase_without_coins_changes_nothing() {
    let mut harness = MarketHarness::new(&["sam", "bea"]).await;
    harness
        .market("sam")
        .add_market_item("sword", "sharp")
        .await
        .unwrap();
    harness.settle().await;
    let writes = harness.shared().write_count();

    let err = harness.market("bea").purchase("sword").await.unwrap_err();
    assert!(matches!(err, MarketError::NoFunds(_)));
    assert_eq!(harness.shared().write_count(), writes);
    assert_eq!(
        harness.holdings("sword"),
        vec![Holding::Listed { owner: "sam".into() }]
    );
    assert_eq!(harness.ledger().commit_count(), 0);
}
