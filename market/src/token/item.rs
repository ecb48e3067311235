use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{MarketError, MarketResult};
use crate::traits::TimeProvider;

/// Public metadata minted into an item token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemData {
    pub name: String,
    pub description: String,
    /// Unix timestamp when the item was minted.
    #[serde(default)]
    pub created_at: u64,
}

impl ItemData {
    /// Create item metadata stamped with the provider's current time.
    pub fn new_at<T: TimeProvider>(
        name: impl Into<String>,
        description: impl Into<String>,
        time: &T,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            created_at: time.now_unix(),
        }
    }

    pub fn to_value(&self) -> MarketResult<Value> {
        serde_json::to_value(self)
            .map_err(|e| MarketError::Serialization(format!("Failed to encode item data: {e}")))
    }

    pub fn from_value(value: &Value) -> MarketResult<Self> {
        Self::deserialize(value)
            .map_err(|e| MarketError::Serialization(format!("Failed to decode item data: {e}")))
    }
}
