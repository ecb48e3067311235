use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::MarketResult;
use crate::traits::SpendLedger;

#[derive(Debug, Default)]
struct LedgerState {
    tokens: HashSet<String>,
    /// state hash -> hash of the transfer that spent it
    spent: HashMap<String, String>,
}

/// Serializable copy of a ledger, used for relay persistence.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerSnapshot {
    pub tokens: Vec<String>,
    pub spent: Vec<(String, String)>,
}

/// In-process spend ledger.
///
/// Clones share the same state, so every peer in one process (or every
/// connection of one relay) sees the same spends.
#[derive(Debug, Clone, Default)]
pub struct MemoryLedger {
    state: Arc<Mutex<LedgerState>>,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_snapshot(snapshot: LedgerSnapshot) -> Self {
        let state = LedgerState {
            tokens: snapshot.tokens.into_iter().collect(),
            spent: snapshot.spent.into_iter().collect(),
        };
        Self {
            state: Arc::new(Mutex::new(state)),
        }
    }

    pub fn snapshot(&self) -> LedgerSnapshot {
        let state = self.state.lock();
        let mut tokens: Vec<String> = state.tokens.iter().cloned().collect();
        tokens.sort();
        let mut spent: Vec<(String, String)> = state
            .spent
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        spent.sort();
        LedgerSnapshot { tokens, spent }
    }

    pub fn spent_count(&self) -> usize {
        self.state.lock().spent.len()
    }

    pub fn token_count(&self) -> usize {
        self.state.lock().tokens.len()
    }

    pub(crate) fn register_sync(&self, token_id: &str) -> bool {
        self.state.lock().tokens.insert(token_id.to_string())
    }

    pub(crate) fn commit_sync(&self, state_hash: &str, transfer_hash: &str) -> bool {
        let mut state = self.state.lock();
        match state.spent.get(state_hash) {
            Some(existing) => {
                let same = existing == transfer_hash;
                debug!(
                    "Spend of state {} already recorded ({})",
                    state_hash,
                    if same { "same transfer" } else { "conflicting transfer" }
                );
                same
            }
            None => {
                state
                    .spent
                    .insert(state_hash.to_string(), transfer_hash.to_string());
                true
            }
        }
    }

    pub(crate) fn is_spent_sync(&self, state_hash: &str) -> bool {
        self.state.lock().spent.contains_key(state_hash)
    }

    pub(crate) fn is_committed_sync(&self, state_hash: &str, transfer_hash: &str) -> bool {
        self.state
            .lock()
            .spent
            .get(state_hash)
            .is_some_and(|committed| committed == transfer_hash)
    }
}

#[async_trait]
impl SpendLedger for MemoryLedger {
    async fn register_token(&self, token_id: &str) -> MarketResult<bool> {
        Ok(self.register_sync(token_id))
    }

    async fn commit_spend(&self, state_hash: &str, transfer_hash: &str) -> MarketResult<bool> {
        Ok(self.commit_sync(state_hash, transfer_hash))
    }

    async fn is_spent(&self, state_hash: &str) -> MarketResult<bool> {
        Ok(self.is_spent_sync(state_hash))
    }

    async fn is_committed(&self, state_hash: &str, transfer_hash: &str) -> MarketResult<bool> {
        Ok(self.is_committed_sync(state_hash, transfer_hash))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_second_conflicting_spend_is_rejected() {
        let ledger = MemoryLedger::new();
        assert!(ledger.commit_spend("s1", "tx-a").await.unwrap());
        assert!(!ledger.commit_spend("s1", "tx-b").await.unwrap());
        assert!(ledger.is_spent("s1").await.unwrap());
        assert!(!ledger.is_spent("s2").await.unwrap());

        assert!(ledger.is_committed("s1", "tx-a").await.unwrap());
        assert!(!ledger.is_committed("s1", "tx-b").await.unwrap());
        assert!(!ledger.is_committed("s2", "tx-a").await.unwrap());
    }

    #[tokio::test]
    async fn test_recommitting_same_transfer_is_idempotent() {
        let ledger = MemoryLedger::new();
        assert!(ledger.commit_spend("s1", "tx-a").await.unwrap());
        assert!(ledger.commit_spend("s1", "tx-a").await.unwrap());
        assert_eq!(ledger.spent_count(), 1);
    }

    #[tokio::test]
    async fn test_token_ids_are_unique() {
        let ledger = MemoryLedger::new();
        assert!(ledger.register_token("t1").await.unwrap());
        assert!(!ledger.register_token("t1").await.unwrap());
    }

    #[tokio::test]
    async fn test_clones_share_state_and_snapshot_restores() {
        let ledger = MemoryLedger::new();
        let view = ledger.clone();
        ledger.register_token("t1").await.unwrap();
        ledger.commit_spend("s1", "tx").await.unwrap();
        assert!(view.is_spent("s1").await.unwrap());

        let restored = MemoryLedger::from_snapshot(view.snapshot());
        assert_eq!(restored.token_count(), 1);
        assert!(restored.is_spent("s1").await.unwrap());
    }
}
