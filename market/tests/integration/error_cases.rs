//! Failures along the trade path and recovery from them.

use market::mocks::MockStoreFailure;
use market::traits::ReplicatedStore;
use market::{MarketError, Settlement, TokenValue};

use crate::common::MarketHarness;

async fn listed_and_funded(names: &[&str]) -> MarketHarness {
    let mut harness = MarketHarness::new(names).await;
    harness
        .market("sam")
        .add_market_item("sword", "sharp")
        .await
        .unwrap();
    harness.market("bea").add_coin().await.unwrap();
    harness.settle().await;
    harness
}

#[tokio::test]
async fn test_oracle_outage_leaves_payment_for_rescan() {
    let mut harness = listed_and_funded(&["sam", "bea"]).await;
    harness.market("bea").purchase("sword").await.unwrap();

    harness.ledger().set_unavailable(true);
    let report = harness.settle().await;
    assert_eq!(report.completed(), 0);
    assert!(report
        .errors
        .iter()
        .any(|(peer, e)| peer == "sam" && matches!(e, MarketError::OracleUnavailable(_))));
    assert_eq!(harness.mailbox_len("sam"), 1);

    harness.ledger().set_unavailable(false);
    harness.rescan();
    let report = harness.settle().await;
    assert_eq!(report.completed(), 1);
    assert!(harness.owns_item("bea", "sword"));
    assert_eq!(harness.balance("sam"), TokenValue::from(10));
}

#[tokio::test]
async fn test_offline_seller_is_not_paid() {
    let harness = listed_and_funded(&["sam", "bea"]).await;
    harness.market("sam").set_online(false).unwrap();

    let err = harness.market("bea").purchase("sword").await.unwrap_err();
    assert!(matches!(err, MarketError::SellerOffline(_)));
    assert_eq!(harness.balance("bea"), TokenValue::from(10));
    assert_eq!(harness.mailbox_len("sam"), 0);
    assert_eq!(harness.ledger().commit_count(), 0);
}

#[tokio::test]
async fn test_failed_delivery_after_commit_is_redelivered() {
    let mut harness = listed_and_funded(&["sam", "bea"]).await;
    harness
        .shared()
        .set_fail_mode(Some(MockStoreFailure::WritesOn("recipient_sam".into())));

    let err = harness.market("bea").purchase("sword").await.unwrap_err();
    assert!(matches!(err, MarketError::SubstrateUnavailable(_)));
    harness.shared().set_fail_mode(None);

    // The spend is committed; the payment waits in bea's wallet, not lost.
    assert_eq!(harness.ledger().commit_count(), 1);
    assert_eq!(harness.balance("bea"), TokenValue::zero());
    assert_eq!(harness.mailbox_len("sam"), 0);

    harness.rescan();
    let report = harness.settle().await;
    assert!(report.errors.is_empty(), "{:?}", report.errors);
    assert_eq!(report.completed(), 1);
    assert!(harness.owns_item("bea", "sword"));
    assert_eq!(harness.balance("sam"), TokenValue::from(10));
    assert_eq!(harness.total_balance(), TokenValue::from(10));
    assert_eq!(harness.ledger().rejected_count(), 0);
}

#[tokio::test]
async fn test_item_delivery_failure_is_retried_without_double_spend() {
    let mut harness = listed_and_funded(&["sam", "bea"]).await;
    harness.market("bea").purchase("sword").await.unwrap();

    harness
        .shared()
        .set_fail_mode(Some(MockStoreFailure::WritesOn("recipient_bea".into())));
    let report = harness.settle().await;
    assert_eq!(report.completed(), 0);
    assert_eq!(harness.mailbox_len("sam"), 1);

    harness.shared().set_fail_mode(None);
    harness.rescan();
    let report = harness.settle().await;
    assert!(report.errors.is_empty(), "{:?}", report.errors);
    assert_eq!(report.completed(), 1);
    assert!(harness.owns_item("bea", "sword"));
    assert_eq!(harness.ledger().rejected_count(), 0);
}

#[tokio::test]
async fn test_payment_from_unknown_buyer_waits_for_directory() {
    let mut harness = listed_and_funded(&["sam", "bea"]).await;
    harness.market("bea").purchase("sword").await.unwrap();

    let bea_address = harness.market("bea").identity().address().clone();
    let record = harness
        .shared()
        .collection("users")
        .get(&market::keys::address_key(&bea_address))
        .cloned()
        .unwrap();
    harness
        .market("sam")
        .store()
        .delete("users", &market::keys::address_key(&bea_address))
        .unwrap();

    let report = harness.settle().await;
    assert!(report
        .errors
        .iter()
        .any(|(_, e)| matches!(e, MarketError::UnknownOwner(_))));
    assert_eq!(harness.mailbox_len("sam"), 1);

    harness
        .market("sam")
        .store()
        .set("users", &market::keys::address_key(&bea_address), record)
        .unwrap();
    harness.rescan();
    let report = harness.settle().await;
    assert!(report.settlements.contains(&(
        "sam".to_string(),
        Settlement::Completed {
            item: "sword".into(),
            buyer: "bea".into()
        }
    )));
}

#[tokio::test]
async fn test_listing_a_spent_item_is_refused() {
    let mut harness = listed_and_funded(&["sam", "bea"]).await;
    harness.market("bea").purchase("sword").await.unwrap();
    harness.settle().await;

    // sam never had a wallet copy; bea's item is fine to list but not twice.
    let err = harness.market("sam").list_item("sword").await.unwrap_err();
    assert!(matches!(err, MarketError::NotFound(_)));
    harness.market("bea").list_item("sword").await.unwrap();
    let err = harness.market("bea").list_item("sword").await.unwrap_err();
    assert!(matches!(err, MarketError::NotFound(_)));
}
