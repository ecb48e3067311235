use std::fmt;
use std::iter::Sum;
use std::str::FromStr;

use primitive_types::U256;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::MarketError;

/// Exact token quantity, carried on the wire as a decimal string.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TokenValue(U256);

impl TokenValue {
    pub fn zero() -> Self {
        Self(U256::zero())
    }

    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }
}

impl From<u64> for TokenValue {
    fn from(v: u64) -> Self {
        Self(U256::from(v))
    }
}

impl FromStr for TokenValue {
    type Err = MarketError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        U256::from_dec_str(s)
            .map(Self)
            .map_err(|e| MarketError::Serialization(format!("invalid token value '{s}': {e:?}")))
    }
}

impl fmt::Display for TokenValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Serialize for TokenValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0.to_string())
    }
}

impl<'de> Deserialize<'de> for TokenValue {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Saturates at `U256::MAX`; wallets never get near it.
impl Sum for TokenValue {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        Self(iter.fold(U256::zero(), |acc, v| acc.saturating_add(v.0)))
    }
}

impl<'a> Sum<&'a TokenValue> for TokenValue {
    fn sum<I: Iterator<Item = &'a Self>>(iter: I) -> Self {
        iter.copied().sum()
    }
}
