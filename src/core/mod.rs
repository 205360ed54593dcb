//! Core proof-of-work types: targets, nonces, pre-hashes and blocks

pub mod block;
pub mod nonce;
pub mod pow;
pub mod target;

pub use block::{BlockHash, CandidateBlock, Prehash, SolvedWork, WorkPackage};
pub use nonce::Nonce;
pub use pow::{check_nonce, pow_input, search_nonce, Blake2sPow, PowHasher};
pub use target::{wire_target_hex, Target};
