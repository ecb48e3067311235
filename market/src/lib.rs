pub mod collections;
pub mod config;
pub mod dispatcher;
pub mod engine;
pub mod error;
pub mod identity;
pub mod keys;
pub mod node;
pub mod protocol;
pub mod relay;
pub mod status;
pub mod token;
pub mod traits;
pub mod viewers;

#[cfg(any(test, feature = "test-support"))]
pub mod mocks;

pub use collections::CollectionSet;
pub use config::MarketConfig;
pub use dispatcher::{DispatchReport, Dispatcher, WorkItem};
pub use engine::{MemoryLedger, SignedTokenEngine};
pub use error::{MarketError, MarketResult};
pub use identity::{Address, Identity, Secret};
pub use node::{MarketNode, NodeStatus};
pub use protocol::{Inventory, Market, PurchaseReceipt, Settlement};
pub use relay::{RelayLedger, RelayServer, RelayStore};
pub use token::{ItemData, TokenFlow, TokenValue};
pub use traits::{RandomSource, ReplicatedStore, SpendLedger, TimeProvider, TokenEngine};
pub use viewers::ViewerHandle;
