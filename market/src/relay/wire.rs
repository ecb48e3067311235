//! Relay wire format: newline-delimited JSON frames over TCP.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::MAX_FRAME_BYTES;
use crate::error::{MarketError, MarketResult};

/// One key of a room at a given version. `value: None` is a tombstone.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntryRecord {
    pub collection: String,
    pub key: String,
    #[serde(default)]
    pub value: Option<Value>,
    pub version: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum LedgerOp {
    Register { token_id: String },
    Commit { state_hash: String, transfer_hash: String },
    IsSpent { state_hash: String },
    IsCommitted { state_hash: String, transfer_hash: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    /// Must be the first frame of a connection.
    Join { room: String, peer: String },
    Set {
        seq: u64,
        collection: String,
        key: String,
        value: Value,
    },
    Delete {
        seq: u64,
        collection: String,
        key: String,
    },
    Presence { online: bool },
    Ledger { request_id: u64, #[serde(flatten)] op: LedgerOp },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerFrame {
    Snapshot {
        entries: Vec<EntryRecord>,
        presence: Vec<(String, bool)>,
    },
    Synced,
    Changed {
        #[serde(flatten)]
        entry: EntryRecord,
        /// Sequence number of the write, only on the copy sent back to its author.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        echo: Option<u64>,
    },
    PresenceChanged { peer: String, online: bool },
    LedgerReply {
        request_id: u64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        ok: Option<bool>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    Error { message: String },
}

/// Serialize a frame as one line.
pub fn encode_frame<T: Serialize>(frame: &T) -> MarketResult<Vec<u8>> {
    let mut line = serde_json::to_vec(frame)
        .map_err(|e| MarketError::Serialization(format!("Failed to encode frame: {e}")))?;
    line.push(b'\n');
    Ok(line)
}

/// Parse one line (without its newline) into a frame.
pub fn decode_frame<T: DeserializeOwned>(line: &str) -> MarketResult<T> {
    if line.len() > MAX_FRAME_BYTES {
        return Err(MarketError::Serialization(format!(
            "Frame of {} bytes exceeds limit of {MAX_FRAME_BYTES}",
            line.len()
        )));
    }
    serde_json::from_str(line)
        .map_err(|e| MarketError::Serialization(format!("Failed to decode frame: {e}")))
}
