//! Target type for mining difficulty
//!
//! Difficulties are per-hash success probabilities `p ∈ (0, 1]`. The target is
//! `p` scaled onto a 256-bit integer, so a smaller `p` yields a numerically
//! smaller (harder) target.

use crate::error::{Error, Result};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

/// Byte length of a full proof-of-work target
pub const TARGET_LEN: usize = 32;

/// Byte length of the target prefix sent to miners
pub const WIRE_TARGET_LEN: usize = 8;

/// Represents a 256-bit mining target, stored big-endian (byte 0 is the most
/// significant)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Target(pub [u8; TARGET_LEN]);

impl Target {
    /// The easiest possible target, accepted by every hash
    pub const MAX: Target = Target([0xFF; TARGET_LEN]);

    /// Create a new Target from big-endian bytes
    pub fn from_bytes(bytes: [u8; TARGET_LEN]) -> Self {
        Self(bytes)
    }

    /// Derive the target for a per-hash success probability
    pub fn from_difficulty(difficulty: f64) -> Self {
        let digits = scaled_digits(difficulty, TARGET_LEN);
        let mut bytes = [0u8; TARGET_LEN];
        bytes.copy_from_slice(&digits);
        Self(bytes)
    }

    /// Rebuild the target a miner sees from the `mining.notify` value: the
    /// little-endian wire bytes become the most significant big-endian bytes.
    /// Above the wire floor every hash accepted by the result is accepted by
    /// the full target of the same difficulty.
    pub fn from_wire_hex(hex_str: &str) -> Result<Self> {
        let mut prefix = hex::decode(hex_str)
            .map_err(|e| Error::target(format!("Invalid hex: {}", e)))?;
        if prefix.len() != WIRE_TARGET_LEN {
            return Err(Error::target(format!(
                "Expected {} bytes, got {}",
                WIRE_TARGET_LEN,
                prefix.len()
            )));
        }
        prefix.reverse();
        let mut bytes = [0u8; TARGET_LEN];
        bytes[..WIRE_TARGET_LEN].copy_from_slice(&prefix);
        Ok(Self(bytes))
    }

    /// Create a Target from a big-endian hex string
    pub fn from_hex(hex_str: &str) -> Result<Self> {
        let bytes = hex::decode(hex_str)
            .map_err(|e| Error::target(format!("Invalid hex: {}", e)))?;

        if bytes.len() != TARGET_LEN {
            return Err(Error::target(format!(
                "Expected {} bytes, got {}",
                TARGET_LEN,
                bytes.len()
            )));
        }

        let mut array = [0u8; TARGET_LEN];
        array.copy_from_slice(&bytes);
        Ok(Self(array))
    }

    /// Get the target as bytes
    pub fn as_bytes(&self) -> &[u8; TARGET_LEN] {
        &self.0
    }

    /// Convert to hex string
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Check whether a proof-of-work digest meets this target.
    ///
    /// Digests are laid out least significant byte first, so the comparison
    /// walks the digest from index 31 down against the target from index 0
    /// up. A digest equal to the target is accepted.
    pub fn is_met_by(&self, hash: &[u8; TARGET_LEN]) -> bool {
        for (hash_byte, target_byte) in hash.iter().rev().zip(self.0.iter()) {
            match hash_byte.cmp(target_byte) {
                std::cmp::Ordering::Less => return true,
                std::cmp::Ordering::Greater => return false,
                std::cmp::Ordering::Equal => continue,
            }
        }
        true
    }
}

/// Target for `difficulty` as sent in `mining.notify`: derived at 8-byte
/// precision with its own floor of `256^-8`, least significant byte first.
pub fn wire_target_hex(difficulty: f64) -> String {
    let mut digits = scaled_digits(difficulty, WIRE_TARGET_LEN);
    if digits.iter().all(|&b| b == 0) {
        digits[WIRE_TARGET_LEN - 1] = 1;
    }
    digits.reverse();
    hex::encode(digits)
}

/// Scale `difficulty` onto `len` big-endian base-256 digits.
///
/// Digits are produced most significant first with the fractional remainder
/// carried down. A digit can exceed 255 part way through; those overflows are
/// pushed back into the more significant byte once all digits are known.
fn scaled_digits(difficulty: f64, len: usize) -> Vec<u8> {
    let floor = 256f64.powi(-(len as i32));
    let p = if difficulty.is_finite() {
        difficulty.clamp(floor, 1.0)
    } else {
        1.0
    };

    let mut wide = vec![0u32; len];
    let mut carry = 0.0f64;
    for digit in wide.iter_mut() {
        let value = 256.0 * carry + p * 255.0;
        let whole = value.floor();
        *digit = whole as u32;
        carry = value - whole;
    }

    let mut out = vec![0u8; len];
    let mut overflow = 0u32;
    for i in (0..len).rev() {
        let value = wide[i] + overflow;
        out[i] = (value & 0xFF) as u8;
        overflow = value >> 8;
    }
    if overflow > 0 {
        return vec![0xFF; len];
    }
    out
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl Serialize for Target {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Target {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Target::from_hex(&s).map_err(serde::de::Error::custom)
    }
}
