//! Peer identity: a secret, the address derived from it, and a display name.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{MarketError, MarketResult};
use crate::traits::TokenEngine;

/// Public address of a token owner (hex-encoded verifying key).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Address(String);

impl Address {
    pub fn new(hex: impl Into<String>) -> Self {
        Self(hex.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Secret material a peer signs with. Never printed.
#[derive(Clone, PartialEq, Eq)]
pub struct Secret(String);

impl Secret {
    pub fn new(secret: impl Into<String>) -> Self {
        Self(secret.into())
    }

    pub fn expose(&self) -> &[u8] {
        self.0.as_bytes()
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret(..)")
    }
}

/// Identity of the local peer for the lifetime of a session.
#[derive(Debug, Clone)]
pub struct Identity {
    secret: Secret,
    display_name: String,
    address: Address,
}

impl Identity {
    /// Derive an identity; the address comes from the engine's key derivation.
    pub fn derive<E: TokenEngine>(
        engine: &E,
        display_name: impl Into<String>,
        secret: Secret,
    ) -> MarketResult<Self> {
        let display_name = display_name.into();
        if display_name.is_empty() || display_name.chars().any(char::is_whitespace) {
            return Err(MarketError::Config(format!(
                "invalid display name '{display_name}'"
            )));
        }
        let address = engine.pubkey_of(&secret);
        Ok(Self {
            secret,
            display_name,
            address,
        })
    }

    pub const fn secret(&self) -> &Secret {
        &self.secret
    }

    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    pub const fn address(&self) -> &Address {
        &self.address
    }
}
