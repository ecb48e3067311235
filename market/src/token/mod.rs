pub mod flow;
pub mod item;
pub mod value;

pub use flow::{
    state_hash, MintProof, OwnerChallenge, ProofStep, TokenClass, TokenFlow, TokenState, Transfer,
    TransferMessage,
};
pub use item::ItemData;
pub use value::TokenValue;
