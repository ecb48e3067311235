//! Token engine abstraction: minting, transfers and the ownership oracle.

use async_trait::async_trait;
use serde_json::Value;

use crate::error::MarketResult;
use crate::identity::{Address, Secret};
use crate::token::{TokenClass, TokenFlow, TokenValue, Transfer, TransferMessage};

/// Parameters of a mint.
#[derive(Debug, Clone)]
pub struct MintRequest {
    pub token_id: String,
    pub token_class: TokenClass,
    pub token_value: TokenValue,
    pub immutable_data: Option<Value>,
    pub nonce: String,
    pub salt: String,
}

/// Oracle answer for one token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TokenStatus {
    pub owned: bool,
    pub unspent: bool,
}

impl TokenStatus {
    pub const fn is_spendable(&self) -> bool {
        self.owned && self.unspent
    }
}

/// Abstraction over the token engine and its authoritative status oracle.
///
/// Async methods may reach the oracle over the network and surface
/// `OracleUnavailable` on transport failure.
#[async_trait]
pub trait TokenEngine: Send + Sync + Clone + 'static {
    /// Address derived from a secret.
    fn pubkey_of(&self, secret: &Secret) -> Address;

    /// Transfer destination addressing the holder of `name`'s nametag.
    fn nametag_ref(&self, name: &str) -> String;

    async fn mint(&self, request: MintRequest, secret: &Secret) -> MarketResult<TokenFlow>;

    /// Mint the nametag token binding `name` to the secret's address.
    async fn create_nametag(
        &self,
        name: &str,
        data: Value,
        secret: &Secret,
    ) -> MarketResult<TokenFlow>;

    /// Ask the oracle whether `secret` owns `token` and its state is unspent.
    async fn status(&self, token: &TokenFlow, secret: &Secret) -> MarketResult<TokenStatus>;

    /// Sign a transfer of `token` and record the spend with the oracle.
    async fn create_transfer(
        &self,
        token: &TokenFlow,
        dest_ref: &str,
        salt: &str,
        secret: &Secret,
        message: Option<TransferMessage>,
    ) -> MarketResult<Transfer>;

    /// Attach a transfer to a flow, producing what gets delivered.
    fn apply_tx(&self, token: &TokenFlow, tx: Transfer) -> MarketResult<TokenFlow>;

    /// Settle a delivered flow into the recipient's ownership, resolving
    /// nametag destinations against the recipient's own nametag flow.
    ///
    /// Asks the oracle whether the pending transfer is the committed spend
    /// of its source state; anything else fails with `NotSpendable`.
    async fn import_received(
        &self,
        flow: &TokenFlow,
        secret: &Secret,
        nametag: Option<&TokenFlow>,
    ) -> MarketResult<TokenFlow>;

    /// Payment message carried by a delivered flow.
    fn extract_message(&self, flow: &TokenFlow) -> Option<TransferMessage> {
        flow.message().cloned()
    }

    fn export_flow(&self, token: &TokenFlow) -> MarketResult<String> {
        token.to_json()
    }

    fn import_flow(&self, serialized: &str) -> MarketResult<TokenFlow> {
        TokenFlow::from_json(serialized)
    }
}
