//! Reactive dispatcher: turns change notifications into serial work.
//!
//! Observation never runs protocol code directly. Notifications from the
//! marketplace, wallet and mailbox streams are turned into [`WorkItem`]s on a
//! per-peer queue, and the queue is processed one item at a time, so no
//! protocol step re-enters the maps while another is mid-flight.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::MAILBOX_RESCAN_SECS;
use crate::error::{MarketError, MarketResult};
use crate::protocol::{Market, Settlement};
use crate::traits::{
    ChangeAction, ChangeBatch, ChangeStream, RandomSource, ReplicatedStore, TimeProvider,
    TokenEngine,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkItem {
    RefreshMarket,
    RefreshInventory,
    Settle(String),
    /// Retry delivery of payments parked in the wallet.
    Redeliver,
}

/// What one [`Dispatcher::pump`] call did.
#[derive(Debug, Default)]
pub struct DispatchReport {
    pub processed: usize,
    pub settlements: Vec<Settlement>,
    pub errors: Vec<MarketError>,
}

impl DispatchReport {
    pub fn is_idle(&self) -> bool {
        self.processed == 0
    }
}

pub struct Dispatcher<S, E, R, C>
where
    S: ReplicatedStore,
    E: TokenEngine,
    R: RandomSource,
    C: TimeProvider,
{
    market: Arc<Market<S, E, R, C>>,
    marketplace: ChangeStream,
    wallet: ChangeStream,
    mailbox: ChangeStream,
    queue: VecDeque<WorkItem>,
}

impl<S, E, R, C> Dispatcher<S, E, R, C>
where
    S: ReplicatedStore,
    E: TokenEngine,
    R: RandomSource,
    C: TimeProvider,
{
    /// Subscribe to the peer's three observed collections and queue the
    /// mailbox backlog that arrived while the peer was away.
    pub fn attach(market: Arc<Market<S, E, R, C>>) -> MarketResult<Self> {
        let collections = market.collections();
        let mut dispatcher = Self {
            marketplace: collections.observe_marketplace()?,
            wallet: collections.observe_wallet()?,
            mailbox: collections.observe_mailbox()?,
            queue: VecDeque::new(),
            market,
        };
        let backlog = dispatcher.rescan_mailbox()?;
        if backlog > 0 {
            info!("Queued {} mailbox entries from before attach", backlog);
        }
        Ok(dispatcher)
    }

    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    fn enqueue(&mut self, item: WorkItem) {
        if !self.queue.contains(&item) {
            self.queue.push_back(item);
        }
    }

    /// Queue a settlement for every entry currently in the mailbox, and a
    /// redelivery if payments are parked. Returns the mailbox entry count.
    pub fn rescan_mailbox(&mut self) -> MarketResult<usize> {
        if self.market.has_parked_payments()? {
            self.enqueue(WorkItem::Redeliver);
        }
        let keys = self.market.collections().mailbox_keys()?;
        let count = keys.len();
        for key in keys {
            self.enqueue(WorkItem::Settle(key));
        }
        Ok(count)
    }

    fn absorb_marketplace(&mut self, batch: ChangeBatch) {
        if !batch.changes.is_empty() {
            self.enqueue(WorkItem::RefreshMarket);
        }
    }

    fn absorb_wallet(&mut self, batch: ChangeBatch) {
        if !batch.changes.is_empty() {
            self.enqueue(WorkItem::RefreshInventory);
        }
    }

    fn absorb_mailbox(&mut self, batch: ChangeBatch) {
        for change in batch.changes {
            // Deletes are our own consumption echoing back.
            if change.action != ChangeAction::Delete {
                self.enqueue(WorkItem::Settle(change.key));
            }
        }
    }

    /// Move every notification already delivered into the queue.
    fn drain_notifications(&mut self) {
        while let Ok(batch) = self.marketplace.try_recv() {
            self.absorb_marketplace(batch);
        }
        while let Ok(batch) = self.wallet.try_recv() {
            self.absorb_wallet(batch);
        }
        while let Ok(batch) = self.mailbox.try_recv() {
            self.absorb_mailbox(batch);
        }
    }

    async fn process(&self, item: &WorkItem) -> MarketResult<Option<Settlement>> {
        match item {
            WorkItem::RefreshMarket => self.market.push_market_view().map(|()| None),
            WorkItem::RefreshInventory => self.market.push_inventory_view().map(|()| None),
            WorkItem::Settle(key) => self.market.settle_entry(key).await.map(Some),
            WorkItem::Redeliver => self.market.redeliver_payments().await.map(|_| None),
        }
    }

    async fn handle(&mut self, item: WorkItem, report: &mut DispatchReport) {
        report.processed += 1;
        match self.process(&item).await {
            Ok(Some(settlement)) => {
                debug!("Settled {:?}: {:?}", item, settlement);
                report.settlements.push(settlement);
            }
            Ok(None) => {}
            Err(e) => {
                if e.is_retryable() || matches!(e, MarketError::UnknownOwner(_)) {
                    warn!("{:?} failed, left for rescan: {}", item, e);
                } else {
                    warn!("{:?} failed: {}", item, e);
                }
                report.errors.push(e);
            }
        }
    }

    /// Process queued work until no notification or work item is pending.
    ///
    /// Never waits for new notifications, so tests can step peers
    /// deterministically.
    pub async fn pump(&mut self) -> DispatchReport {
        let mut report = DispatchReport::default();
        loop {
            self.drain_notifications();
            let Some(item) = self.queue.pop_front() else {
                break;
            };
            self.handle(item, &mut report).await;
        }
        report
    }

    /// Serve notifications until `shutdown` is cancelled.
    pub async fn run(mut self, shutdown: CancellationToken) {
        let mut rescan = tokio::time::interval(Duration::from_secs(MAILBOX_RESCAN_SECS));
        rescan.tick().await;
        info!("Dispatcher running for '{}'", self.market.name());

        loop {
            if shutdown.is_cancelled() {
                break;
            }
            if let Some(item) = self.queue.pop_front() {
                let mut report = DispatchReport::default();
                self.handle(item, &mut report).await;
                self.drain_notifications();
                continue;
            }

            tokio::select! {
                _ = shutdown.cancelled() => break,
                Some(batch) = self.marketplace.recv() => self.absorb_marketplace(batch),
                Some(batch) = self.wallet.recv() => self.absorb_wallet(batch),
                Some(batch) = self.mailbox.recv() => self.absorb_mailbox(batch),
                _ = rescan.tick() => {
                    if let Err(e) = self.rescan_mailbox() {
                        warn!("Mailbox rescan failed: {}", e);
                    }
                }
            }
        }
        info!("Dispatcher for '{}' stopped", self.market.name());
    }
}
