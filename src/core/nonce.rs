//! Nonce type for proof-of-work solutions

use crate::error::{Error, Result};
use byteorder::{ByteOrder, LittleEndian};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Number of hex digits in a submitted nonce
pub const NONCE_HEX_LEN: usize = 16;

/// A 64-bit nonce, transmitted as 16 hex digits in little-endian byte order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Nonce(pub u64);

impl Nonce {
    /// Create a new nonce
    pub fn new(value: u64) -> Self {
        Self(value)
    }

    /// Get the nonce value
    pub fn value(&self) -> u64 {
        self.0
    }

    /// Convert to little-endian bytes
    pub fn to_le_bytes(&self) -> [u8; 8] {
        let mut buf = [0u8; 8];
        LittleEndian::write_u64(&mut buf, self.0);
        buf
    }

    /// Parse a submitted nonce. Anything other than exactly 16 hex digits is
    /// a protocol violation.
    pub fn from_hex(hex_str: &str) -> Result<Self> {
        if hex_str.len() != NONCE_HEX_LEN {
            return Err(Error::nonce(format!(
                "Expected {} hex digits, got {}",
                NONCE_HEX_LEN,
                hex_str.len()
            )));
        }
        let bytes =
            hex::decode(hex_str).map_err(|e| Error::nonce(format!("Invalid hex: {}", e)))?;
        Ok(Self(LittleEndian::read_u64(&bytes)))
    }

    /// Encode as 16 little-endian hex digits
    pub fn to_hex(&self) -> String {
        hex::encode(self.to_le_bytes())
    }
}

impl fmt::Display for Nonce {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl From<u64> for Nonce {
    fn from(value: u64) -> Self {
        Self(value)
    }
}
