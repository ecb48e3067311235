//! Mock spend ledger with injectable outages.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::engine::MemoryLedger;
use crate::error::{MarketError, MarketResult};
use crate::traits::SpendLedger;

#[derive(Debug, Default)]
struct Controls {
    unavailable: AtomicBool,
    commit_delay_ms: AtomicU64,
    commits: AtomicUsize,
    rejected: AtomicUsize,
}

/// [`MemoryLedger`] whose oracle can be taken offline or slowed down.
#[derive(Debug, Clone, Default)]
pub struct MockLedger {
    ledger: MemoryLedger,
    controls: Arc<Controls>,
}

impl MockLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every call fails with `OracleUnavailable` while set.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.controls
            .unavailable
            .store(unavailable, Ordering::SeqCst);
    }

    /// Delay applied before each spend commit, so concurrent spends overlap.
    pub fn set_commit_delay(&self, delay: Duration) {
        self.controls
            .commit_delay_ms
            .store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    /// Successful spend commits.
    pub fn commit_count(&self) -> usize {
        self.controls.commits.load(Ordering::SeqCst)
    }

    /// Spend commits refused because the state was already spent.
    pub fn rejected_count(&self) -> usize {
        self.controls.rejected.load(Ordering::SeqCst)
    }

    pub const fn inner(&self) -> &MemoryLedger {
        &self.ledger
    }

    fn check(&self, op: &str) -> MarketResult<()> {
        if self.controls.unavailable.load(Ordering::SeqCst) {
            return Err(MarketError::OracleUnavailable(format!(
                "MockLedger: simulated outage during {op}"
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl SpendLedger for MockLedger {
    async fn register_token(&self, token_id: &str) -> MarketResult<bool> {
        self.check("register_token")?;
        self.ledger.register_token(token_id).await
    }

    async fn commit_spend(&self, state_hash: &str, transfer_hash: &str) -> MarketResult<bool> {
        self.check("commit_spend")?;
        let delay = self.controls.commit_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        let committed = self.ledger.commit_spend(state_hash, transfer_hash).await?;
        let counter = if committed {
            &self.controls.commits
        } else {
            &self.controls.rejected
        };
        counter.fetch_add(1, Ordering::SeqCst);
        Ok(committed)
    }

    async fn is_spent(&self, state_hash: &str) -> MarketResult<bool> {
        self.check("is_spent")?;
        self.ledger.is_spent(state_hash).await
    }

    async fn is_committed(&self, state_hash: &str, transfer_hash: &str) -> MarketResult<bool> {
        self.check("is_committed")?;
        self.ledger.is_committed(state_hash, transfer_hash).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_outage_surfaces_oracle_unavailable() {
        let ledger = MockLedger::new();
        ledger.set_unavailable(true);
        let err = ledger.is_spent("s").await.unwrap_err();
        assert!(err.is_retryable());

        ledger.set_unavailable(false);
        assert!(!ledger.is_spent("s").await.unwrap());
    }

    #[tokio::test]
    async fn test_counts_commits_and_rejections() {
        let ledger = MockLedger::new();
        ledger.commit_spend("s", "a").await.unwrap();
        ledger.commit_spend("s", "b").await.unwrap();
        assert_eq!(ledger.commit_count(), 1);
        assert_eq!(ledger.rejected_count(), 1);
    }
}
