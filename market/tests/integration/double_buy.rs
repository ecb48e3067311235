//! Competing purchases of one item and competing spends of one coin.

use std::time::Duration;

use market::{MarketError, Settlement, TokenValue};

use crate::common::{Holding, MarketHarness};

#[tokio::test]
async fn test_two_buyers_one_item_refunds_the_loser() {
    let mut harness = MarketHarness::new(&["sam", "bea", "cal"]).await;
    harness
        .market("sam")
        .add_market_item("sword", "sharp")
        .await
        .unwrap();
    harness.market("bea").add_coin().await.unwrap();
    harness.market("cal").add_coin().await.unwrap();
    harness.settle().await;
    let before = harness.total_balance();

    // Both pay before the seller settles either payment.
    harness.market("bea").purchase("sword").await.unwrap();
    harness.market("cal").purchase("sword").await.unwrap();
    assert_eq!(harness.mailbox_len("sam"), 2);

    let report = harness.settle().await;
    assert!(report.errors.is_empty(), "{:?}", report.errors);
    assert_eq!(report.completed(), 1);
    assert_eq!(report.refunded(), 1);

    let winner = if harness.owns_item("bea", "sword") { "bea" } else { "cal" };
    let loser = if winner == "bea" { "cal" } else { "bea" };
    assert_eq!(
        harness.holdings("sword"),
        vec![Holding::Wallet {
            peer: winner.into()
        }]
    );
    assert!(!harness.owns_item(loser, "sword"));
    assert_eq!(harness.balance(loser), TokenValue::from(10));
    assert!(harness.balance(winner).is_zero());
    assert_eq!(harness.balance("sam"), TokenValue::from(10));
    assert_eq!(harness.total_balance(), before);
    assert!(report.settlements.iter().any(|(peer, s)| peer == loser
        && matches!(s, Settlement::Received { .. })));
}

#[tokio::test]
async fn test_concurrent_purchases_on_one_peer_spend_the_coin_once() {
    let mut harness = MarketHarness::new(&["sam", "bea"]).await;
    let sam = harness.market("sam");
    sam.add_market_item("sword", "sharp").await.unwrap();
    sam.add_market_item("shield", "round").await.unwrap();
    harness.market("bea").add_coin().await.unwrap();
    harness.settle().await;

    let bea = harness.market("bea");
    let (first, second) = tokio::join!(bea.purchase("sword"), bea.purchase("shield"));
    let outcomes = [first, second];
    assert_eq!(outcomes.iter().filter(|r| r.is_ok()).count(), 1);
    assert!(outcomes
        .iter()
        .any(|r| matches!(r, Err(MarketError::NoFunds(_)))));
    assert_eq!(harness.ledger().commit_count(), 1);
}

#[tokio::test]
async fn test_two_devices_racing_one_coin_commit_once() {
    let mut harness = MarketHarness::new(&["sam", "bea"]).await;
    let sam = harness.market("sam");
    sam.add_market_item("sword", "sharp").await.unwrap();
    sam.add_market_item("shield", "round").await.unwrap();
    harness.market("bea").add_coin().await.unwrap();
    harness.settle().await;

    // Separate protocol locks, shared wallet: only the ledger stops the race.
    let phone = harness.device("bea");
    harness
        .ledger()
        .set_commit_delay(Duration::from_millis(50));
    let (first, second) = tokio::join!(
        harness.market("bea").purchase("sword"),
        phone.purchase("shield")
    );
    harness.ledger().set_commit_delay(Duration::ZERO);

    let outcomes = [first, second];
    assert_eq!(outcomes.iter().filter(|r| r.is_ok()).count(), 1);
    assert!(outcomes
        .iter()
        .any(|r| matches!(r, Err(MarketError::NotSpendable(_)))));
    assert_eq!(harness.ledger().commit_count(), 1);
    assert_eq!(harness.ledger().rejected_count(), 1);

    let report = harness.settle().await;
    assert_eq!(report.completed(), 1);
    assert_eq!(harness.balance("sam"), TokenValue::from(10));
}
