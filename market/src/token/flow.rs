use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};

use super::item::ItemData;
use super::value::TokenValue;
use crate::error::{MarketError, MarketResult};
use crate::identity::Address;

/// Process-wide token classes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenClass {
    /// A marketplace item.
    Item,
    /// A fungible coin used for payment.
    Coin,
    /// A self-issued token binding a display name to an address.
    Nametag,
}

/// The address a token's next transfer must be signed by.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OwnerChallenge {
    pub address: Address,
}

/// Current state of a token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenState {
    pub challenge: OwnerChallenge,
    /// Hex nonce making every state of a token distinct.
    pub nonce: String,
}

/// Payment correlation embedded in a coin transfer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferMessage {
    /// Name of the item being paid for.
    pub item: String,
    /// Address of the payer, used for delivery or refund.
    pub back_ref: Address,
}

/// A signed transfer of one token state to a destination.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transfer {
    /// Hash of the state being spent.
    pub source_state: String,
    /// Raw address or `nametag_<tokenId>` reference.
    pub dest_ref: String,
    pub salt: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<TransferMessage>,
    /// Address of the signer (the owner of the source state).
    pub sender: Address,
    /// Hex Ed25519 signature over [`Transfer::signing_payload`].
    pub signature: String,
}

impl Transfer {
    /// Bytes covered by the transfer signature.
    pub fn signing_payload(
        token_id: &str,
        source_state: &str,
        dest_ref: &str,
        salt: &str,
        message: Option<&TransferMessage>,
    ) -> MarketResult<Vec<u8>> {
        let message = message.map(serde_json::to_string).transpose()?;
        Ok(format!(
            "transfer|{token_id}|{source_state}|{dest_ref}|{salt}|{}",
            message.unwrap_or_default()
        )
        .into_bytes())
    }

    /// Hash identifying this transfer in the spend ledger.
    pub fn hash(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.source_state.as_bytes());
        hasher.update(self.dest_ref.as_bytes());
        hasher.update(self.salt.as_bytes());
        hasher.update(self.signature.as_bytes());
        hex::encode(hasher.finalize())
    }
}

/// A settled transition in a token's history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProofStep {
    pub transfer: Transfer,
    pub recipient: Address,
}

/// Signed genesis record produced at mint time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MintProof {
    pub minter: Address,
    /// Nonce of the genesis state.
    pub nonce: String,
    pub salt: String,
    pub signature: String,
}

/// A token plus enough history to be re-verified independently.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenFlow {
    pub token_id: String,
    pub token_class: TokenClass,
    pub token_value: TokenValue,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub immutable_data: Option<Value>,
    pub state: TokenState,
    pub genesis: MintProof,
    #[serde(default)]
    pub proof_chain: Vec<ProofStep>,
    /// A signed transfer not yet imported by its recipient.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pending: Option<Transfer>,
}

impl TokenFlow {
    pub const fn current_owner(&self) -> &Address {
        &self.state.challenge.address
    }

    /// Hash of the current state; this is what the ledger marks as spent.
    pub fn state_hash(&self) -> String {
        state_hash(&self.token_id, &self.state)
    }

    pub fn is_item(&self) -> bool {
        self.token_class == TokenClass::Item
    }

    pub fn is_coin(&self) -> bool {
        self.token_class == TokenClass::Coin
    }

    /// Item metadata, if this is an item carrying well-formed immutable data.
    pub fn item_data(&self) -> Option<ItemData> {
        if !self.is_item() {
            return None;
        }
        self.immutable_data
            .as_ref()
            .and_then(|v| ItemData::from_value(v).ok())
    }

    /// Message of the pending transfer, if any.
    pub fn message(&self) -> Option<&TransferMessage> {
        self.pending.as_ref().and_then(|t| t.message.as_ref())
    }

    pub fn to_value(&self) -> MarketResult<Value> {
        serde_json::to_value(self)
            .map_err(|e| MarketError::Serialization(format!("Failed to encode token flow: {e}")))
    }

    pub fn from_value(value: &Value) -> MarketResult<Self> {
        Self::deserialize(value)
            .map_err(|e| MarketError::Serialization(format!("Failed to decode token flow: {e}")))
    }

    pub fn to_json(&self) -> MarketResult<String> {
        serde_json::to_string(self)
            .map_err(|e| MarketError::Serialization(format!("Failed to export token flow: {e}")))
    }

    pub fn from_json(data: &str) -> MarketResult<Self> {
        serde_json::from_str(data)
            .map_err(|e| MarketError::Serialization(format!("Failed to import token flow: {e}")))
    }
}

/// Hash of a token state, bound to the token id.
pub fn state_hash(token_id: &str, state: &TokenState) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token_id.as_bytes());
    hasher.update(b"|");
    hasher.update(state.challenge.address.as_str().as_bytes());
    hasher.update(b"|");
    hasher.update(state.nonce.as_bytes());
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_flow() -> TokenFlow {
        TokenFlow {
            token_id: "aa".repeat(32),
            token_class: TokenClass::Item,
            token_value: TokenValue::from(10),
            immutable_data: Some(serde_json::json!({
                "name": "sword",
                "description": "sharp",
                "created_at": 1_704_067_200u64
            })),
            state: TokenState {
                challenge: OwnerChallenge {
                    address: Address::new("01"),
                },
                nonce: "bb".repeat(32),
            },
            genesis: MintProof {
                minter: Address::new("01"),
                nonce: "bb".repeat(32),
                salt: "cc".repeat(32),
                signature: "dd".repeat(64),
            },
            proof_chain: Vec::new(),
            pending: None,
        }
    }

    #[test]
    fn test_json_export_import_is_lossless() {
        let flow = sample_flow();
        let exported = flow.to_json().unwrap();
        let imported = TokenFlow::from_json(&exported).unwrap();
        assert_eq!(imported, flow);
        assert_eq!(imported.to_json().unwrap(), exported);
    }

    #[test]
    fn test_state_hash_changes_with_owner() {
        let flow = sample_flow();
        let mut moved = flow.clone();
        moved.state.challenge.address = Address::new("02");
        assert_ne!(flow.state_hash(), moved.state_hash());
    }

    #[test]
    fn test_item_data_projection() {
        let flow = sample_flow();
        let data = flow.item_data().unwrap();
        assert_eq!(data.name, "sword");

        let mut coin = flow;
        coin.token_class = TokenClass::Coin;
        assert!(coin.item_data().is_none());
    }

    #[test]
    fn test_malformed_value_is_a_serialization_error() {
        let err = TokenFlow::from_value(&serde_json::json!({"token_id": 5})).unwrap_err();
        assert!(matches!(err, MarketError::Serialization(_)));
    }
}
