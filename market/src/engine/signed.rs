//! Ed25519-signed token engine backed by a [`SpendLedger`].
//!
//! Ownership of a token is the address in its current state. Spending a
//! state requires a signature by that address and a successful commit in
//! the ledger, which is the only place two competing spends are ordered.

use async_trait::async_trait;
use ed25519_dalek::{Signer, Verifier};
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::config::{key_prefix, NAMETAG_DOMAIN};
use crate::error::{MarketError, MarketResult};
use crate::identity::{Address, Secret};
use crate::token::{
    MintProof, OwnerChallenge, ProofStep, TokenClass, TokenFlow, TokenState, TokenValue,
    Transfer, TransferMessage,
};
use crate::traits::{MintRequest, SpendLedger, TokenEngine, TokenStatus};

fn sha256_hex(parts: &[&[u8]]) -> String {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part);
    }
    hex::encode(hasher.finalize())
}

fn signing_key(secret: &Secret) -> ed25519_dalek::SigningKey {
    let seed: [u8; 32] = Sha256::digest(secret.expose()).into();
    ed25519_dalek::SigningKey::from_bytes(&seed)
}

fn sign_hex(secret: &Secret, payload: &[u8]) -> String {
    hex::encode(signing_key(secret).sign(payload).to_bytes())
}

fn verify_hex(signer: &Address, payload: &[u8], signature: &str) -> MarketResult<()> {
    let key_bytes: [u8; 32] = hex::decode(signer.as_str())
        .map_err(|e| MarketError::Crypto(format!("Invalid signer address: {e}")))?
        .try_into()
        .map_err(|_| MarketError::Crypto(format!("Invalid signer address length: {signer}")))?;
    let verifying_key = ed25519_dalek::VerifyingKey::from_bytes(&key_bytes)
        .map_err(|e| MarketError::Crypto(format!("Invalid signer public key: {e}")))?;
    let sig_bytes: [u8; 64] = hex::decode(signature)
        .map_err(|e| MarketError::Crypto(format!("Invalid signature encoding: {e}")))?
        .try_into()
        .map_err(|v: Vec<u8>| {
            MarketError::Crypto(format!(
                "Invalid signature length: expected 64, got {}",
                v.len()
            ))
        })?;
    let signature = ed25519_dalek::Signature::from_bytes(&sig_bytes);
    verifying_key
        .verify(payload, &signature)
        .map_err(|e| MarketError::Crypto(format!("Signature verification failed: {e}")))
}

fn mint_payload(
    token_id: &str,
    class: TokenClass,
    value: &TokenValue,
    data: Option<&Value>,
    nonce: &str,
    salt: &str,
) -> MarketResult<Vec<u8>> {
    let data = data.map(serde_json::to_string).transpose()?;
    let class = serde_json::to_string(&class)?;
    Ok(format!(
        "mint|{token_id}|{class}|{value}|{}|{nonce}|{salt}",
        data.unwrap_or_default()
    )
    .into_bytes())
}

/// Token id of the nametag for `name`. Deterministic, so the ledger's token
/// uniqueness makes a name claimable once.
pub fn nametag_token_id(name: &str) -> String {
    sha256_hex(&[NAMETAG_DOMAIN.as_bytes(), name.as_bytes()])
}

/// Token engine signing with keys derived from peer secrets.
#[derive(Debug, Clone)]
pub struct SignedTokenEngine<L: SpendLedger> {
    ledger: L,
}

impl<L: SpendLedger> SignedTokenEngine<L> {
    pub const fn new(ledger: L) -> Self {
        Self { ledger }
    }

    pub const fn ledger(&self) -> &L {
        &self.ledger
    }

    /// Check the mint signature of a flow against its recorded minter.
    pub fn verify_genesis(&self, flow: &TokenFlow) -> MarketResult<()> {
        let payload = mint_payload(
            &flow.token_id,
            flow.token_class,
            &flow.token_value,
            flow.immutable_data.as_ref(),
            &flow.genesis.nonce,
            &flow.genesis.salt,
        )?;
        verify_hex(&flow.genesis.minter, &payload, &flow.genesis.signature)
    }

    /// Address a transfer destination resolves to.
    fn resolve_destination(
        &self,
        dest_ref: &str,
        nametag: Option<&TokenFlow>,
    ) -> MarketResult<Address> {
        let Some(tag_id) = dest_ref.strip_prefix(key_prefix::NAMETAG) else {
            return Ok(Address::new(dest_ref));
        };
        let Some(tag) = nametag else {
            return Err(MarketError::NotFound(format!(
                "Nametag token required to receive {dest_ref}"
            )));
        };
        if tag.token_class != TokenClass::Nametag || tag.token_id != tag_id {
            return Err(MarketError::NotOwned(format!(
                "Nametag {} does not match destination {dest_ref}",
                tag.token_id
            )));
        }
        self.verify_genesis(tag)?;
        Ok(tag.current_owner().clone())
    }
}

#[async_trait]
impl<L: SpendLedger> TokenEngine for SignedTokenEngine<L> {
    fn pubkey_of(&self, secret: &Secret) -> Address {
        Address::new(hex::encode(signing_key(secret).verifying_key().to_bytes()))
    }

    fn nametag_ref(&self, name: &str) -> String {
        format!("{}{}", key_prefix::NAMETAG, nametag_token_id(name))
    }

    async fn mint(&self, request: MintRequest, secret: &Secret) -> MarketResult<TokenFlow> {
        let minter = self.pubkey_of(secret);
        let payload = mint_payload(
            &request.token_id,
            request.token_class,
            &request.token_value,
            request.immutable_data.as_ref(),
            &request.nonce,
            &request.salt,
        )?;
        let signature = sign_hex(secret, &payload);

        if !self.ledger.register_token(&request.token_id).await? {
            return Err(MarketError::InvalidState(format!(
                "Token {} already exists",
                request.token_id
            )));
        }
        debug!("Minted {:?} token {}", request.token_class, request.token_id);

        Ok(TokenFlow {
            token_id: request.token_id,
            token_class: request.token_class,
            token_value: request.token_value,
            immutable_data: request.immutable_data,
            state: TokenState {
                challenge: OwnerChallenge {
                    address: minter.clone(),
                },
                nonce: request.nonce.clone(),
            },
            genesis: MintProof {
                minter,
                nonce: request.nonce,
                salt: request.salt,
                signature,
            },
            proof_chain: Vec::new(),
            pending: None,
        })
    }

    async fn create_nametag(
        &self,
        name: &str,
        data: Value,
        secret: &Secret,
    ) -> MarketResult<TokenFlow> {
        let address = self.pubkey_of(secret);
        let token_id = nametag_token_id(name);
        let nonce = sha256_hex(&[b"nametag-nonce|".as_slice(), token_id.as_bytes()]);
        let salt = sha256_hex(&[b"nametag-salt|".as_slice(), token_id.as_bytes(), address.as_str().as_bytes()]);
        let request = MintRequest {
            token_id,
            token_class: TokenClass::Nametag,
            token_value: TokenValue::zero(),
            immutable_data: Some(json!({
                "name": name,
                "data": data,
            })),
            nonce,
            salt,
        };
        self.mint(request, secret).await.map_err(|e| match e {
            MarketError::InvalidState(_) => {
                MarketError::InvalidState(format!("Nametag '{name}' is already claimed"))
            }
            other => other,
        })
    }

    async fn status(&self, token: &TokenFlow, secret: &Secret) -> MarketResult<TokenStatus> {
        let me = self.pubkey_of(secret);
        let owned = token.pending.is_none() && token.current_owner() == &me;
        let unspent = !self.ledger.is_spent(&token.state_hash()).await?;
        Ok(TokenStatus { owned, unspent })
    }

    async fn create_transfer(
        &self,
        token: &TokenFlow,
        dest_ref: &str,
        salt: &str,
        secret: &Secret,
        message: Option<TransferMessage>,
    ) -> MarketResult<Transfer> {
        if token.pending.is_some() {
            return Err(MarketError::InvalidState(format!(
                "Token {} has an unsettled transfer",
                token.token_id
            )));
        }
        let sender = self.pubkey_of(secret);
        if token.current_owner() != &sender {
            return Err(MarketError::NotOwned(format!(
                "Token {} is not owned by {sender}",
                token.token_id
            )));
        }

        let source_state = token.state_hash();
        let payload = Transfer::signing_payload(
            &token.token_id,
            &source_state,
            dest_ref,
            salt,
            message.as_ref(),
        )?;
        let tx = Transfer {
            source_state,
            dest_ref: dest_ref.to_string(),
            salt: salt.to_string(),
            message,
            sender,
            signature: sign_hex(secret, &payload),
        };

        if !self.ledger.commit_spend(&tx.source_state, &tx.hash()).await? {
            return Err(MarketError::NotSpendable(format!(
                "Token {} state was already spent",
                token.token_id
            )));
        }
        debug!("Committed spend of token {} to {}", token.token_id, dest_ref);
        Ok(tx)
    }

    fn apply_tx(&self, token: &TokenFlow, tx: Transfer) -> MarketResult<TokenFlow> {
        if tx.source_state != token.state_hash() {
            return Err(MarketError::InvalidState(format!(
                "Transfer does not spend the current state of token {}",
                token.token_id
            )));
        }
        let mut flow = token.clone();
        flow.pending = Some(tx);
        Ok(flow)
    }

    async fn import_received(
        &self,
        flow: &TokenFlow,
        secret: &Secret,
        nametag: Option<&TokenFlow>,
    ) -> MarketResult<TokenFlow> {
        let me = self.pubkey_of(secret);
        let Some(tx) = &flow.pending else {
            if flow.current_owner() == &me {
                return Ok(flow.clone());
            }
            return Err(MarketError::NotOwned(format!(
                "Token {} carries no transfer to {me}",
                flow.token_id
            )));
        };

        if tx.sender != *flow.current_owner() {
            return Err(MarketError::Crypto(format!(
                "Transfer of token {} not signed by its owner",
                flow.token_id
            )));
        }
        if tx.source_state != flow.state_hash() {
            return Err(MarketError::InvalidState(format!(
                "Transfer of token {} spends a different state",
                flow.token_id
            )));
        }
        let payload = Transfer::signing_payload(
            &flow.token_id,
            &tx.source_state,
            &tx.dest_ref,
            &tx.salt,
            tx.message.as_ref(),
        )?;
        verify_hex(&tx.sender, &payload, &tx.signature)?;

        let recipient = self.resolve_destination(&tx.dest_ref, nametag)?;
        if recipient != me {
            return Err(MarketError::NotOwned(format!(
                "Token {} is addressed to {recipient}",
                flow.token_id
            )));
        }
        if !self.ledger.is_committed(&tx.source_state, &tx.hash()).await? {
            return Err(MarketError::NotSpendable(format!(
                "Transfer of token {} is not the committed spend of its state",
                flow.token_id
            )));
        }

        let mut settled = flow.clone();
        settled.pending = None;
        settled.state = TokenState {
            challenge: OwnerChallenge {
                address: me.clone(),
            },
            nonce: sha256_hex(&[tx.salt.as_bytes(), tx.source_state.as_bytes()]),
        };
        settled.proof_chain.push(ProofStep {
            transfer: tx.clone(),
            recipient: me,
        });
        Ok(settled)
    }
}
