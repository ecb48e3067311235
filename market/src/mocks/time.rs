//! Controllable clock for tests.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::traits::TimeProvider;

/// 2024-01-01T00:00:00Z
const EPOCH_2024: u64 = 1_704_067_200;

/// Clock that only moves when told to. Clones share the same reading.
#[derive(Debug, Clone)]
pub struct MockTime {
    now: Arc<AtomicU64>,
}

impl MockTime {
    pub fn at(timestamp: u64) -> Self {
        Self {
            now: Arc::new(AtomicU64::new(timestamp)),
        }
    }

    pub fn advance(&self, seconds: u64) {
        self.now.fetch_add(seconds, Ordering::SeqCst);
    }
}

impl Default for MockTime {
    fn default() -> Self {
        Self::at(EPOCH_2024)
    }
}

impl TimeProvider for MockTime {
    fn now_unix(&self) -> u64 {
        self.now.load(Ordering::SeqCst)
    }
}
