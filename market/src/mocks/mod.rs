//! Mock implementations for testing.
//!
//! In-process stand-ins for the replication substrate, the spend ledger,
//! randomness and time, so protocol code can be exercised without a relay.

pub mod ledger;
pub mod random;
pub mod store;
pub mod time;

pub use ledger::MockLedger;
pub use random::MockRandom;
pub use store::{MockStore, MockStoreFailure, SharedStoreHandle};
pub use time::MockTime;
