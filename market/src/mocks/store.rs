//! Mock replicated store for testing.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use tokio::sync::mpsc;

use crate::error::{MarketError, MarketResult};
use crate::traits::{ChangeAction, ChangeBatch, ChangeStream, KeyChange, ReplicatedStore};

/// Types of failures that can be simulated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockStoreFailure {
    /// Fail all operations.
    All,
    /// Fail only reads (get/entries).
    Reads,
    /// Fail only writes (set/delete).
    Writes,
    /// Fail writes to one collection.
    WritesOn(String),
}

#[derive(Debug, Default)]
struct MockStoreInner {
    /// collection -> key -> value
    maps: RwLock<HashMap<String, BTreeMap<String, Value>>>,
    observers: Mutex<Vec<(String, mpsc::UnboundedSender<ChangeBatch>)>>,
    presence: RwLock<HashMap<String, bool>>,
    fail_mode: RwLock<Option<MockStoreFailure>>,
    writes: AtomicUsize,
    closed: AtomicBool,
}

/// Mock replicated store.
///
/// Every view created from the same [`SharedStoreHandle`] sees the same
/// maps, so replication is instantaneous. Each view carries the name of the
/// peer using it, which is what its presence is published under.
///
/// For single-peer unit tests use `MockStore::new("alice")`.
#[derive(Debug, Clone)]
pub struct MockStore {
    inner: Arc<MockStoreInner>,
    peer_name: String,
    synced: bool,
}

/// Handle to shared storage for creating peer views.
#[derive(Debug, Clone, Default)]
pub struct SharedStoreHandle {
    inner: Arc<MockStoreInner>,
}

impl SharedStoreHandle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a view of the shared store for one peer.
    pub fn create_party_view(&self, peer_name: impl Into<String>) -> MockStore {
        MockStore {
            inner: self.inner.clone(),
            peer_name: peer_name.into(),
            synced: true,
        }
    }

    /// Simulate failures on every view.
    pub fn set_fail_mode(&self, mode: Option<MockStoreFailure>) {
        *self.inner.fail_mode.write() = mode;
    }

    /// Force a peer's presence, as if its awareness state arrived.
    pub fn set_presence_of(&self, peer_name: &str, online: bool) {
        self.inner
            .presence
            .write()
            .insert(peer_name.to_string(), online);
    }

    /// Number of successful set/delete calls across all views.
    pub fn write_count(&self) -> usize {
        self.inner.writes.load(Ordering::SeqCst)
    }

    /// Copy of one collection (for test assertions).
    pub fn collection(&self, collection: &str) -> BTreeMap<String, Value> {
        self.inner
            .maps
            .read()
            .get(collection)
            .cloned()
            .unwrap_or_default()
    }
}

impl MockStore {
    pub fn new(peer_name: impl Into<String>) -> Self {
        SharedStoreHandle::new().create_party_view(peer_name)
    }

    /// A view whose `wait_synced` reports no sync signal.
    pub fn without_sync_signal(mut self) -> Self {
        self.synced = false;
        self
    }

    pub fn peer_name(&self) -> &str {
        &self.peer_name
    }

    pub fn set_fail_mode(&self, mode: Option<MockStoreFailure>) {
        *self.inner.fail_mode.write() = mode;
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    fn check(&self, collection: &str, is_write: bool) -> MarketResult<()> {
        let fail = match &*self.inner.fail_mode.read() {
            None => false,
            Some(MockStoreFailure::All) => true,
            Some(MockStoreFailure::Reads) => !is_write,
            Some(MockStoreFailure::Writes) => is_write,
            Some(MockStoreFailure::WritesOn(c)) => is_write && c == collection,
        };
        if fail {
            let op = if is_write { "write" } else { "read" };
            return Err(MarketError::SubstrateUnavailable(format!(
                "MockStore: simulated {op} failure on {collection}"
            )));
        }
        Ok(())
    }

    fn notify(&self, collection: &str, change: KeyChange) {
        let batch = ChangeBatch {
            collection: collection.to_string(),
            changes: vec![change],
        };
        let mut observers = self.inner.observers.lock();
        observers.retain(|(observed, tx)| {
            if observed != collection {
                return !tx.is_closed();
            }
            tx.send(batch.clone()).is_ok()
        });
    }
}

#[async_trait]
impl ReplicatedStore for MockStore {
    fn get(&self, collection: &str, key: &str) -> MarketResult<Option<Value>> {
        self.check(collection, false)?;
        Ok(self
            .inner
            .maps
            .read()
            .get(collection)
            .and_then(|m| m.get(key).cloned()))
    }

    fn set(&self, collection: &str, key: &str, value: Value) -> MarketResult<()> {
        self.check(collection, true)?;
        let existed = self
            .inner
            .maps
            .write()
            .entry(collection.to_string())
            .or_default()
            .insert(key.to_string(), value)
            .is_some();
        self.inner.writes.fetch_add(1, Ordering::SeqCst);
        let action = if existed {
            ChangeAction::Update
        } else {
            ChangeAction::Add
        };
        self.notify(collection, KeyChange::new(key, action));
        Ok(())
    }

    fn delete(&self, collection: &str, key: &str) -> MarketResult<bool> {
        self.check(collection, true)?;
        let removed = self
            .inner
            .maps
            .write()
            .get_mut(collection)
            .and_then(|m| m.remove(key))
            .is_some();
        if removed {
            self.inner.writes.fetch_add(1, Ordering::SeqCst);
            self.notify(collection, KeyChange::new(key, ChangeAction::Delete));
        }
        Ok(removed)
    }

    fn entries(&self, collection: &str) -> MarketResult<Vec<(String, Value)>> {
        self.check(collection, false)?;
        Ok(self
            .inner
            .maps
            .read()
            .get(collection)
            .map(|m| m.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
            .unwrap_or_default())
    }

    fn observe(&self, collection: &str) -> MarketResult<ChangeStream> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.inner
            .observers
            .lock()
            .push((collection.to_string(), tx));
        Ok(rx)
    }

    fn is_online(&self, peer_name: &str) -> Option<bool> {
        self.inner.presence.read().get(peer_name).copied()
    }

    fn online_peers(&self) -> Vec<String> {
        let mut peers: Vec<String> = self
            .inner
            .presence
            .read()
            .iter()
            .filter(|(_, online)| **online)
            .map(|(name, _)| name.clone())
            .collect();
        peers.sort();
        peers
    }

    fn set_presence(&self, online: bool) -> MarketResult<()> {
        self.inner
            .presence
            .write()
            .insert(self.peer_name.clone(), online);
        Ok(())
    }

    async fn wait_synced(&self) -> MarketResult<bool> {
        Ok(self.synced)
    }

    async fn close(&self) -> MarketResult<()> {
        self.inner.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}
