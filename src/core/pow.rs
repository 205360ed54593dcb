//! Proof-of-work verification
//!
//! The hash input is the 64-byte pre-hash followed by the 8-byte
//! little-endian nonce. The digest function itself is pluggable.

use crate::core::block::{Prehash, PREHASH_LEN};
use crate::core::{Nonce, Target};
use blake2::{Blake2s256, Digest};

/// Byte length of the proof-of-work hash input
pub const POW_INPUT_LEN: usize = PREHASH_LEN + 8;

/// The chain's proof-of-work digest
pub trait PowHasher: Send + Sync {
    /// Hash a 72-byte proof-of-work input
    fn hash(&self, input: &[u8; POW_INPUT_LEN]) -> [u8; 32];
}

/// Blake2s-256 digest
#[derive(Debug, Clone, Copy, Default)]
pub struct Blake2sPow;

impl PowHasher for Blake2sPow {
    fn hash(&self, input: &[u8; POW_INPUT_LEN]) -> [u8; 32] {
        let mut hasher = Blake2s256::new();
        hasher.update(input);
        hasher.finalize().into()
    }
}

/// Build the hash input for a candidate solution
pub fn pow_input(prehash: &Prehash, nonce: Nonce) -> [u8; POW_INPUT_LEN] {
    let mut input = [0u8; POW_INPUT_LEN];
    input[..PREHASH_LEN].copy_from_slice(prehash.as_bytes());
    input[PREHASH_LEN..].copy_from_slice(&nonce.to_le_bytes());
    input
}

/// Check a submitted nonce against a job target
pub fn check_nonce(
    hasher: &dyn PowHasher,
    prehash: &Prehash,
    nonce: Nonce,
    target: &Target,
) -> bool {
    let hash = hasher.hash(&pow_input(prehash, nonce));
    target.is_met_by(&hash)
}

/// Scan `count` nonces from `start` for one that meets `target`
pub fn search_nonce(
    hasher: &dyn PowHasher,
    prehash: &Prehash,
    target: &Target,
    start: u64,
    count: u64,
) -> Option<Nonce> {
    let mut input = pow_input(prehash, Nonce(start));
    for i in 0..count {
        let nonce = Nonce(start.wrapping_add(i));
        input[PREHASH_LEN..].copy_from_slice(&nonce.to_le_bytes());
        if target.is_met_by(&hasher.hash(&input)) {
            return Some(nonce);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Hasher returning a fixed digest
    struct FixedHasher([u8; 32]);

    impl PowHasher for FixedHasher {
        fn hash(&self, _input: &[u8; POW_INPUT_LEN]) -> [u8; 32] {
            self.0
        }
    }

    #[test]
    fn test_pow_input_layout() {
        let prehash = Prehash([0xAA; PREHASH_LEN]);
        let input = pow_input(&prehash, Nonce(0x0102));
        assert!(input[..PREHASH_LEN].iter().all(|&b| b == 0xAA));
        assert_eq!(&input[PREHASH_LEN..], &[0x02, 0x01, 0, 0, 0, 0, 0, 0]);
    }

    #[test]
    fn test_check_nonce_uses_target() {
        let prehash = Prehash([0u8; PREHASH_LEN]);
        let target = Target::from_difficulty(0.5);

        let mut low = [0xFFu8; 32];
        low[31] = 0x10;
        assert!(check_nonce(&FixedHasher(low), &prehash, Nonce(1), &target));

        let mut high = [0u8; 32];
        high[31] = 0x80;
        assert!(!check_nonce(&FixedHasher(high), &prehash, Nonce(1), &target));
    }

    #[test]
    fn test_search_finds_valid_nonce() {
        let hasher = Blake2sPow;
        let prehash = Prehash::random();
        let target = Target::from_difficulty(1.0 / 64.0);
        let nonce = search_nonce(&hasher, &prehash, &target, 0, 1 << 20).unwrap();
        assert!(check_nonce(&hasher, &prehash, nonce, &target));
    }
}
