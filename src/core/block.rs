//! Candidate blocks, pre-hashes and solved work
//!
//! Block contents are opaque to the pool: the header is kept as the encoded
//! bytes handed over by the block producer and only hashed, never parsed.

use crate::core::Nonce;
use crate::error::{Error, Result};
use blake2::{Blake2s256, Digest};
use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

/// Byte length of a header pre-hash
pub const PREHASH_LEN: usize = 64;

/// The 64-byte pre-hash a miner combines with its nonce
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Prehash(pub [u8; PREHASH_LEN]);

impl Prehash {
    /// Random pre-hash for synthetic probation jobs
    pub fn random() -> Self {
        let mut bytes = [0u8; PREHASH_LEN];
        rand::rng().fill(&mut bytes[..]);
        Self(bytes)
    }

    /// Parse from a hex string
    pub fn from_hex(hex_str: &str) -> Result<Self> {
        let bytes = hex::decode(hex_str)
            .map_err(|e| Error::protocol(format!("Invalid pre-hash hex: {}", e)))?;
        if bytes.len() != PREHASH_LEN {
            return Err(Error::protocol(format!(
                "Expected {} pre-hash bytes, got {}",
                PREHASH_LEN,
                bytes.len()
            )));
        }
        let mut array = [0u8; PREHASH_LEN];
        array.copy_from_slice(&bytes);
        Ok(Self(array))
    }

    /// Convert to hex string
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Get the pre-hash as bytes
    pub fn as_bytes(&self) -> &[u8; PREHASH_LEN] {
        &self.0
    }
}

impl fmt::Debug for Prehash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Prehash({}..)", &self.to_hex()[..16])
    }
}

impl Serialize for Prehash {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Prehash {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Prehash::from_hex(&s).map_err(serde::de::Error::custom)
    }
}

/// Hash identifying a mined block
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlockHash(pub [u8; 32]);

impl BlockHash {
    /// Convert to hex string
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Display for BlockHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl Serialize for BlockHash {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for BlockHash {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        let bytes = hex::decode(&s).map_err(serde::de::Error::custom)?;
        let array: [u8; 32] = bytes
            .try_into()
            .map_err(|_| serde::de::Error::custom("block hash must be 32 bytes"))?;
        Ok(Self(array))
    }
}

/// A block template produced by the chain
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateBlock {
    /// Encoded header without its nonce
    #[serde(with = "hex_bytes")]
    pub header: Vec<u8>,
    /// Height the block would occupy
    pub height: u64,
    /// Per-hash success probability required by the chain
    pub difficulty: f64,
    /// Parent block hash, when known
    #[serde(default)]
    pub prev_hash: Option<String>,
}

impl CandidateBlock {
    /// The fixed block behind every probation job. Solutions against it are
    /// never submitted anywhere.
    pub fn synthetic() -> Self {
        Self {
            header: Vec::new(),
            height: 0,
            difficulty: 1.0,
            prev_hash: None,
        }
    }

    /// Hash of the header sealed with `nonce`
    pub fn hash_with_nonce(&self, nonce: Nonce) -> BlockHash {
        let mut hasher = Blake2s256::new();
        hasher.update(&self.header);
        hasher.update(nonce.to_le_bytes());
        BlockHash(hasher.finalize().into())
    }
}

/// New chain work as published on the `putwork` topic
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkPackage {
    pub block: CandidateBlock,
    pub prehash: Prehash,
}

/// A solved real job as published on the `submitwork` topic
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SolvedWork {
    pub block: CandidateBlock,
    pub prehash: Prehash,
    pub nonce: Nonce,
    pub hash: BlockHash,
    pub found_at: DateTime<Utc>,
}

impl SolvedWork {
    /// Seal a candidate block with its winning nonce
    pub fn new(block: CandidateBlock, prehash: Prehash, nonce: Nonce) -> Self {
        let hash = block.hash_with_nonce(nonce);
        Self {
            block,
            prehash,
            nonce,
            hash,
            found_at: Utc::now(),
        }
    }
}

mod hex_bytes {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(deserializer)?;
        hex::decode(s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_random_prehash_differs() {
        assert_ne!(Prehash::random(), Prehash::random());
    }

    #[test]
    fn test_prehash_hex_length() {
        let prehash = Prehash::random();
        assert_eq!(Prehash::from_hex(&prehash.to_hex()).unwrap(), prehash);
        assert!(Prehash::from_hex("00ff").is_err());
    }

    #[test]
    fn test_block_hash_depends_on_nonce() {
        let block = CandidateBlock {
            header: vec![1, 2, 3],
            height: 10,
            difficulty: 1e-6,
            prev_hash: None,
        };
        assert_ne!(
            block.hash_with_nonce(Nonce(1)),
            block.hash_with_nonce(Nonce(2))
        );
        let solved = SolvedWork::new(block.clone(), Prehash::random(), Nonce(1));
        assert_eq!(solved.hash, block.hash_with_nonce(Nonce(1)));
    }

    #[test]
    fn test_work_package_json() {
        let package = WorkPackage {
            block: CandidateBlock {
                header: vec![0xab, 0xcd],
                height: 3,
                difficulty: 0.5,
                prev_hash: Some("00".into()),
            },
            prehash: Prehash([7u8; PREHASH_LEN]),
        };
        let json = serde_json::to_value(&package).unwrap();
        assert_eq!(json["block"]["header"], "abcd");
        let back: WorkPackage = serde_json::from_value(json).unwrap();
        assert_eq!(back, package);
    }
}
