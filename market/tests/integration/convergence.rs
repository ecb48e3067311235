//! Whole-market invariants after many trades settle.

use std::sync::Arc;

use parking_lot::Mutex;

use market::TokenValue;

use crate::common::{Holding, MarketHarness};

const PEERS: [&str; 4] = ["ann", "ben", "cat", "dan"];

#[tokio::test]
async fn test_every_item_has_one_holder_and_value_is_conserved() {
    let mut harness = MarketHarness::new(&PEERS).await;
    for (i, seller) in PEERS.iter().enumerate() {
        harness
            .market(seller)
            .add_market_item(&format!("item{i}"), "thing")
            .await
            .unwrap();
        for _ in 0..2 {
            harness.market(seller).add_coin().await.unwrap();
        }
    }
    harness.settle().await;
    let total = harness.total_balance();
    assert_eq!(total, TokenValue::from(80));

    // Everyone buys from a different seller each round; sellers settle only
    // between rounds.
    for round in 0..2 {
        for (b, buyer) in PEERS.iter().enumerate() {
            let target = format!("item{}", (b + round + 1) % PEERS.len());
            let _ = harness.market(buyer).purchase(&target).await;
        }
        let report = harness.settle().await;
        assert!(report.errors.is_empty(), "{:?}", report.errors);

        // Put everything bought back on sale for the next round.
        for peer in PEERS {
            let items = harness.market(peer).get_inventory_list().unwrap().items;
            for data in items.iter().filter_map(|t| t.item_data()) {
                harness.market(peer).list_item(&data.name).await.unwrap();
            }
        }
        harness.settle().await;
    }

    for i in 0..PEERS.len() {
        let holdings = harness.holdings(&format!("item{i}"));
        assert_eq!(holdings.len(), 1, "item{i} held by {holdings:?}");
        assert!(!matches!(holdings[0], Holding::Mailbox { .. }));
    }
    for peer in PEERS {
        assert_eq!(harness.mailbox_len(peer), 0, "{peer} has unsettled mail");
    }
    assert_eq!(harness.total_balance(), total);
}

#[tokio::test]
async fn test_viewers_see_settled_state() {
    let mut harness = MarketHarness::new(&["sam", "bea"]).await;
    let seen_items = Arc::new(Mutex::new(Vec::new()));
    let sink = seen_items.clone();
    let _handle = harness.market("bea").register_inventory_viewer(move |inv| {
        sink.lock().push(inv.items.len());
    });
    let listings = Arc::new(Mutex::new(Vec::new()));
    let sink = listings.clone();
    let _market_handle = harness.market("bea").register_market_viewer(move |items| {
        sink.lock().push(items.len());
    });

    harness
        .market("sam")
        .add_market_item("sword", "sharp")
        .await
        .unwrap();
    harness.market("bea").add_coin().await.unwrap();
    harness.settle().await;
    assert_eq!(listings.lock().last(), Some(&1));

    harness.market("bea").purchase("sword").await.unwrap();
    harness.settle().await;

    assert_eq!(seen_items.lock().last(), Some(&1));
    assert_eq!(listings.lock().last(), Some(&0));
}
