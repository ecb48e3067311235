//! Spend ledger abstraction: the mutual-exclusion point for token spends.

use async_trait::async_trait;

use crate::error::MarketResult;

/// Authoritative record of which token ids exist and which token states
/// have been spent.
#[async_trait]
pub trait SpendLedger: Send + Sync + Clone + 'static {
    /// Record a newly minted token id. Returns `false` if it already exists.
    async fn register_token(&self, token_id: &str) -> MarketResult<bool>;

    /// Mark a state as spent by a transfer. Returns `false` if the state was
    /// already spent by a different transfer; re-committing the same transfer
    /// succeeds so a timed-out request can be retried.
    async fn commit_spend(&self, state_hash: &str, transfer_hash: &str) -> MarketResult<bool>;

    async fn is_spent(&self, state_hash: &str) -> MarketResult<bool>;

    /// Whether `state_hash` was spent by exactly `transfer_hash`. A signed
    /// transfer the ledger never accepted transfers nothing.
    async fn is_committed(&self, state_hash: &str, transfer_hash: &str) -> MarketResult<bool>;
}
