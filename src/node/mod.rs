//! Chain node capabilities used by the pool
//!
//! The pool never validates blocks or transactions itself; it asks a node.
//! [`ChainNode`] is the seam, [`HttpNode`] talks to a node's REST API.

pub mod http;
pub mod retry;

pub use http::HttpNode;
pub use retry::RetryPolicy;

use crate::core::{SolvedWork, WorkPackage};
use crate::wallet::SignedTransfer;
use crate::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// On-chain account state
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub address: String,
    /// Balance in nano units
    pub balance: u64,
    /// Nonce of the last included transaction
    pub nonce: u64,
}

/// Where a block sits relative to the best chain
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockStatus {
    MainChain,
    SideChain,
    Rejected,
    Unknown,
}

impl BlockStatus {
    pub fn is_main_chain(&self) -> bool {
        matches!(self, BlockStatus::MainChain)
    }
}

/// Head of the best chain
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainTip {
    pub hash: String,
    pub height: u64,
}

/// Capabilities the pool needs from the chain
#[async_trait]
pub trait ChainNode: Send + Sync {
    /// Current candidate block and its pre-hash
    async fn get_work(&self) -> Result<WorkPackage>;

    /// Account state, `None` for an address the chain has never seen
    async fn get_account(&self, address: &str) -> Result<Option<Account>>;

    /// Nonce of the newest transaction from `address` waiting in the pool
    async fn pending_nonce(&self, address: &str) -> Result<Option<u64>>;

    /// Add transactions to the node's transaction pool, returning the ones it
    /// accepted
    async fn put_txs(&self, txs: &[SignedTransfer]) -> Result<Vec<SignedTransfer>>;

    /// Relay transactions to peers
    async fn broadcast_txs(&self, txs: &[SignedTransfer]) -> Result<()>;

    /// Hand a solved block to consensus
    async fn put_block(&self, solved: &SolvedWork) -> Result<()>;

    /// Relay a solved block to peers
    async fn broadcast_blocks(&self, solved: &SolvedWork) -> Result<()>;

    async fn get_block_status(&self, hash: &str) -> Result<BlockStatus>;

    async fn get_block_height(&self, hash: &str) -> Result<Option<u64>>;

    async fn get_blocks_tip(&self) -> Result<ChainTip>;
}
