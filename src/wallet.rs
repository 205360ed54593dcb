//! Pool wallet: address format and transfer signing
//!
//! Addresses are `H` followed by the hex of the first 20 bytes of the
//! Blake2s-256 digest of an ed25519 public key.

use crate::{Error, Result};
use blake2::{Blake2s256, Digest};
use ed25519_dalek::{Signer, SigningKey};
use rand::Rng;
use serde::{Deserialize, Serialize};

/// Prefix shared by every address
pub const ADDRESS_PREFIX: char = 'H';

/// Hex digits following the prefix
const ADDRESS_HEX_LEN: usize = 40;

/// Smallest transferable unit per coin
pub const NANO_PER_COIN: f64 = 1e9;

/// Check that `address` is a well-formed account address
pub fn is_valid_address(address: &str) -> bool {
    match address.strip_prefix(ADDRESS_PREFIX) {
        Some(body) => body.len() == ADDRESS_HEX_LEN && body.chars().all(|c| c.is_ascii_hexdigit()),
        None => false,
    }
}

/// Convert a coin amount to nano units, rounding to nine decimals
pub fn to_nano(amount: f64) -> u64 {
    if amount <= 0.0 {
        return 0;
    }
    (amount * NANO_PER_COIN).round() as u64
}

/// Convert nano units back to coins
pub fn from_nano(nano: u64) -> f64 {
    nano as f64 / NANO_PER_COIN
}

/// A signed payout transfer, ready for the transaction pool
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedTransfer {
    pub from: String,
    pub to: String,
    /// Amount in nano units
    pub amount: u64,
    /// Fee in nano units
    pub fee: u64,
    pub nonce: u64,
    /// Hex public key of the sender
    pub public_key: String,
    /// Hex ed25519 signature over the transfer body
    pub signature: String,
    /// Hex Blake2s-256 digest of the transfer body
    pub hash: String,
}

impl SignedTransfer {
    /// Canonical bytes covered by the signature
    pub fn signing_bytes(from: &str, to: &str, amount: u64, fee: u64, nonce: u64) -> Vec<u8> {
        let mut body = Vec::with_capacity(from.len() + to.len() + 26);
        body.extend_from_slice(from.as_bytes());
        body.push(0);
        body.extend_from_slice(to.as_bytes());
        body.push(0);
        body.extend_from_slice(&amount.to_le_bytes());
        body.extend_from_slice(&fee.to_le_bytes());
        body.extend_from_slice(&nonce.to_le_bytes());
        body
    }
}

/// Capability to sign transfers from the pool account
pub trait TxSigner: Send + Sync {
    /// Address of the pool account
    fn address(&self) -> String;

    /// Sign a transfer of `amount` nano units to `to`
    fn sign_transfer(&self, to: &str, amount: u64, nonce: u64, fee: u64) -> Result<SignedTransfer>;
}

/// Signer backed by an in-memory ed25519 key
pub struct Ed25519Signer {
    key: SigningKey,
    address: String,
}

impl Ed25519Signer {
    /// Create a signer from a 32-byte seed
    pub fn from_seed(seed: [u8; 32]) -> Self {
        let key = SigningKey::from_bytes(&seed);
        let address = address_of(key.verifying_key().as_bytes());
        Self { key, address }
    }

    /// Create a signer from a hex encoded seed
    pub fn from_hex_seed(seed_hex: &str) -> Result<Self> {
        let bytes = hex::decode(seed_hex.trim())
            .map_err(|e| Error::crypto(format!("Invalid seed hex: {}", e)))?;
        let seed: [u8; 32] = bytes
            .try_into()
            .map_err(|_| Error::crypto("Wallet seed must be 32 bytes"))?;
        Ok(Self::from_seed(seed))
    }

    /// Generate a fresh random seed, hex encoded
    pub fn generate_seed_hex() -> String {
        let mut seed = [0u8; 32];
        rand::rng().fill(&mut seed[..]);
        hex::encode(seed)
    }
}

impl TxSigner for Ed25519Signer {
    fn address(&self) -> String {
        self.address.clone()
    }

    fn sign_transfer(&self, to: &str, amount: u64, nonce: u64, fee: u64) -> Result<SignedTransfer> {
        if !is_valid_address(to) {
            return Err(Error::crypto(format!("Invalid destination address: {}", to)));
        }
        let body = SignedTransfer::signing_bytes(&self.address, to, amount, fee, nonce);
        let signature = self.key.sign(&body);
        let hash: [u8; 32] = Blake2s256::digest(&body).into();

        Ok(SignedTransfer {
            from: self.address.clone(),
            to: to.to_string(),
            amount,
            fee,
            nonce,
            public_key: hex::encode(self.key.verifying_key().as_bytes()),
            signature: hex::encode(signature.to_bytes()),
            hash: hex::encode(hash),
        })
    }
}

fn address_of(public_key: &[u8; 32]) -> String {
    let digest = Blake2s256::digest(public_key);
    format!("{}{}", ADDRESS_PREFIX, hex::encode(&digest[..ADDRESS_HEX_LEN / 2]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ed25519_dalek::{Signature, Verifier, VerifyingKey};

    #[test]
    fn test_address_validation() {
        let signer = Ed25519Signer::from_seed([7u8; 32]);
        assert!(is_valid_address(&signer.address()));
        assert!(!is_valid_address("H123"));
        assert!(!is_valid_address("X0000000000000000000000000000000000000000"));
        assert!(!is_valid_address("Hzz00000000000000000000000000000000000000"));
    }

    #[test]
    fn test_signature_verifies() {
        let signer = Ed25519Signer::from_seed([1u8; 32]);
        let to = Ed25519Signer::from_seed([2u8; 32]).address();
        let tx = signer.sign_transfer(&to, 1_500_000_000, 4, 1).unwrap();

        assert_eq!(tx.nonce, 4);
        let key_bytes: [u8; 32] = hex::decode(&tx.public_key).unwrap().try_into().unwrap();
        let key = VerifyingKey::from_bytes(&key_bytes).unwrap();
        let sig_bytes: [u8; 64] = hex::decode(&tx.signature).unwrap().try_into().unwrap();
        let body = SignedTransfer::signing_bytes(&tx.from, &tx.to, tx.amount, tx.fee, tx.nonce);
        assert!(key.verify(&body, &Signature::from_bytes(&sig_bytes)).is_ok());
    }

    #[test]
    fn test_invalid_destination_is_rejected() {
        let signer = Ed25519Signer::from_seed([1u8; 32]);
        assert!(signer.sign_transfer("nowhere", 1, 0, 1).is_err());
    }

    #[test]
    fn test_seed_parsing() {
        let seed = Ed25519Signer::generate_seed_hex();
        assert_eq!(seed.len(), 64);
        assert!(Ed25519Signer::from_hex_seed(&seed).is_ok());
        assert!(Ed25519Signer::from_hex_seed("abcd").is_err());
    }

    #[test]
    fn test_nano_conversion() {
        assert_eq!(to_nano(1.5), 1_500_000_000);
        assert_eq!(to_nano(-2.0), 0);
        assert_eq!(to_nano(0.000000001), 1);
        assert_eq!(from_nano(2_000_000_000), 2.0);
    }
}
