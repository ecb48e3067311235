//! Deterministic random source for tests.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use sha2::{Digest, Sha256};

use crate::traits::RandomSource;

/// Random source producing a reproducible stream per label.
///
/// Bytes are `sha256(label | counter)` blocks. Give each peer its own label
/// so token ids minted by different peers never collide.
#[derive(Debug, Clone)]
pub struct MockRandom {
    label: String,
    counter: Arc<AtomicU64>,
}

impl MockRandom {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            counter: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Number of 32-byte blocks drawn so far.
    pub fn draws(&self) -> u64 {
        self.counter.load(Ordering::SeqCst)
    }
}

impl Default for MockRandom {
    fn default() -> Self {
        Self::new("mock")
    }
}

impl RandomSource for MockRandom {
    fn fill_bytes(&self, dest: &mut [u8]) {
        for chunk in dest.chunks_mut(32) {
            let n = self.counter.fetch_add(1, Ordering::SeqCst);
            let mut hasher = Sha256::new();
            hasher.update(self.label.as_bytes());
            hasher.update(n.to_be_bytes());
            let block = hasher.finalize();
            chunk.copy_from_slice(&block[..chunk.len()]);
        }
    }
}
