//! Trait abstractions for dependency injection and testability.
//!
//! The marketplace core is generic over its collaborators: the replication
//! substrate, the token engine (and the ledger behind it), randomness and
//! time. Production and mock implementations plug in at these seams.

pub mod engine;
pub mod ledger;
pub mod random;
pub mod store;
pub mod time;

pub use engine::{MintRequest, TokenEngine, TokenStatus};
pub use ledger::SpendLedger;
pub use random::RandomSource;
pub use store::{ChangeAction, ChangeBatch, ChangeStream, KeyChange, ReplicatedStore};
pub use time::TimeProvider;

// Re-export default implementations
pub use random::ThreadRng;
pub use time::SystemTimeProvider;
