//! Replication substrate abstraction for testable shared-map operations.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;

use crate::error::MarketResult;

/// Kind of change observed on a single key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeAction {
    Add,
    Update,
    Delete,
}

/// A change to one key of a collection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyChange {
    pub key: String,
    pub action: ChangeAction,
}

impl KeyChange {
    pub fn new(key: impl Into<String>, action: ChangeAction) -> Self {
        Self {
            key: key.into(),
            action,
        }
    }
}

/// Changes to one collection delivered together.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeBatch {
    pub collection: String,
    pub changes: Vec<KeyChange>,
}

/// Stream of change batches for one observed collection.
pub type ChangeStream = mpsc::UnboundedReceiver<ChangeBatch>;

/// Abstraction over an eventually-consistent replicated document made of
/// named maps with per-key last-writer-wins merge.
///
/// Reads and writes act on the local replica and never block on the
/// network; propagation to other peers happens in the background. This
/// trait enables testing of protocol code without a running relay.
#[async_trait]
pub trait ReplicatedStore: Send + Sync + Clone + 'static {
    /// Read a key from the local replica.
    fn get(&self, collection: &str, key: &str) -> MarketResult<Option<Value>>;

    /// Write a key; observers of the collection are notified.
    fn set(&self, collection: &str, key: &str, value: Value) -> MarketResult<()>;

    /// Remove a key. Returns `false` if it was already absent.
    fn delete(&self, collection: &str, key: &str) -> MarketResult<bool>;

    /// Snapshot of every entry in a collection, in unspecified order.
    fn entries(&self, collection: &str) -> MarketResult<Vec<(String, Value)>>;

    fn contains(&self, collection: &str, key: &str) -> MarketResult<bool> {
        Ok(self.get(collection, key)?.is_some())
    }

    /// Subscribe to add/update/delete batches on a collection.
    fn observe(&self, collection: &str) -> MarketResult<ChangeStream>;

    /// Presence of a peer: `None` when the substrate has no data for it.
    fn is_online(&self, _peer_name: &str) -> Option<bool> {
        None
    }

    /// Names of peers currently marked online.
    fn online_peers(&self) -> Vec<String> {
        Vec::new()
    }

    /// Publish this peer's own presence.
    fn set_presence(&self, _online: bool) -> MarketResult<()> {
        Ok(())
    }

    /// Resolve once the initial sync completed.
    ///
    /// Returns `false` if the substrate has no such signal.
    async fn wait_synced(&self) -> MarketResult<bool> {
        Ok(false)
    }

    /// Release the connection to the substrate.
    async fn close(&self) -> MarketResult<()> {
        Ok(())
    }
}
