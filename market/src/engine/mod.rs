//! Token engine implementations.

pub mod memory_ledger;
pub mod signed;

pub use memory_ledger::{LedgerSnapshot, MemoryLedger};
pub use signed::{nametag_token_id, SignedTokenEngine};
