//! Random source abstraction for token ids, nonces and salts.

use rand::RngCore;

/// Trait for providing random bytes.
///
/// Token ids, state nonces and transfer salts all come from here, so tests
/// can make them deterministic.
pub trait RandomSource: Send + Sync + 'static {
    /// Fill the destination buffer with random bytes.
    fn fill_bytes(&self, dest: &mut [u8]);

    fn random_bytes_32(&self) -> [u8; 32] {
        let mut bytes = [0u8; 32];
        self.fill_bytes(&mut bytes);
        bytes
    }

    /// 256 random bits, hex-encoded (64 characters).
    fn random_hex_256(&self) -> String {
        hex::encode(self.random_bytes_32())
    }
}

/// Production implementation using the thread-local RNG.
#[derive(Debug, Clone, Copy, Default)]
pub struct ThreadRng;

impl RandomSource for ThreadRng {
    fn fill_bytes(&self, dest: &mut [u8]) {
        rand::thread_rng().fill_bytes(dest);
    }
}

impl ThreadRng {
    pub const fn new() -> Self {
        Self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_random_hex_is_64_chars() {
        let hex = ThreadRng::new().random_hex_256();
        assert_eq!(hex.len(), 64);
        assert!(hex.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_thread_rng_produces_different_values() {
        let rng = ThreadRng::new();
        assert_ne!(rng.random_hex_256(), rng.random_hex_256());
    }
}
