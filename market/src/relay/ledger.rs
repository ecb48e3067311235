use async_trait::async_trait;

use super::client::RelayStore;
use super::wire::LedgerOp;
use crate::error::MarketResult;
use crate::traits::SpendLedger;

/// Spend ledger hosted by the relay, reached over a peer's relay connection.
///
/// Every call is one round-trip bounded by the store's oracle timeout; a
/// timeout or lost connection surfaces as `OracleUnavailable` and the
/// caller may retry, since re-committing the same transfer succeeds.
#[derive(Debug, Clone)]
pub struct RelayLedger {
    store: RelayStore,
}

impl RelayLedger {
    pub const fn new(store: RelayStore) -> Self {
        Self { store }
    }
}

#[async_trait]
impl SpendLedger for RelayLedger {
    async fn register_token(&self, token_id: &str) -> MarketResult<bool> {
        self.store
            .ledger_request(LedgerOp::Register {
                token_id: token_id.to_string(),
            })
            .await
    }

    async fn commit_spend(&self, state_hash: &str, transfer_hash: &str) -> MarketResult<bool> {
        self.store
            .ledger_request(LedgerOp::Commit {
                state_hash: state_hash.to_string(),
                transfer_hash: transfer_hash.to_string(),
            })
            .await
    }

    async fn is_spent(&self, state_hash: &str) -> MarketResult<bool> {
        self.store
            .ledger_request(LedgerOp::IsSpent {
                state_hash: state_hash.to_string(),
            })
            .await
    }

    async fn is_committed(&self, state_hash: &str, transfer_hash: &str) -> MarketResult<bool> {
        self.store
            .ledger_request(LedgerOp::IsCommitted {
                state_hash: state_hash.to_string(),
                transfer_hash: transfer_hash.to_string(),
            })
            .await
    }
}
