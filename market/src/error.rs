/// Domain-specific error types for the marketplace library.
///
/// Every protocol operation surfaces one of these to its caller. Only
/// [`MarketError::OracleUnavailable`] and [`MarketError::SubstrateUnavailable`]
/// are transient; everything else reports a semantic conflict.
#[derive(Debug, thiserror::Error)]
pub enum MarketError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Not owned: {0}")]
    NotOwned(String),

    #[error("Not spendable: {0}")]
    NotSpendable(String),

    #[error("No spendable coin available for {0}")]
    NoFunds(String),

    #[error("Unknown owner: {0}")]
    UnknownOwner(String),

    #[error("Seller offline: {0}")]
    SellerOffline(String),

    #[error("Token oracle unavailable: {0}")]
    OracleUnavailable(String),

    #[error("Replication substrate unavailable: {0}")]
    SubstrateUnavailable(String),

    #[error("Serialization failed: {0}")]
    Serialization(String),

    #[error("Cryptographic operation failed: {0}")]
    Crypto(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl MarketError {
    /// Whether retrying the whole operation later may succeed.
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::OracleUnavailable(_) | Self::SubstrateUnavailable(_)
        )
    }

    /// Short machine-readable name of the error kind, for CLI and status output.
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "NotFound",
            Self::NotOwned(_) => "NotOwned",
            Self::NotSpendable(_) => "NotSpendable",
            Self::NoFunds(_) => "NoFunds",
            Self::UnknownOwner(_) => "UnknownOwner",
            Self::SellerOffline(_) => "SellerOffline",
            Self::OracleUnavailable(_) => "OracleUnavailable",
            Self::SubstrateUnavailable(_) => "SubstrateUnavailable",
            Self::Serialization(_) => "Serialization",
            Self::Crypto(_) => "Crypto",
            Self::InvalidState(_) => "InvalidState",
            Self::Config(_) => "Config",
            Self::Other(_) => "Other",
        }
    }
}

impl From<serde_json::Error> for MarketError {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}

/// Convenience type alias.
pub type MarketResult<T> = Result<T, MarketError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_transport_errors_are_retryable() {
        assert!(MarketError::OracleUnavailable("timeout".into()).is_retryable());
        assert!(MarketError::SubstrateUnavailable("closed".into()).is_retryable());

        assert!(!MarketError::NoFunds("sword".into()).is_retryable());
        assert!(!MarketError::NotSpendable("coin".into()).is_retryable());
        assert!(!MarketError::SellerOffline("alice".into()).is_retryable());
    }

    #[test]
    fn test_kind_and_display_carry_identifier() {
        let err = MarketError::NotFound("market_item_sword".into());
        assert_eq!(err.kind(), "NotFound");
        assert!(err.to_string().contains("market_item_sword"));
    }
}
