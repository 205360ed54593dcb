//! Durable pool state
//!
//! Everything that must outlive a connection, or be shared with the collector
//! and the payout processor, goes through [`PoolStore`]. The record types here
//! are the rows of its collections.

pub mod memory;

pub use memory::MemoryStore;

use crate::core::{SolvedWork, WorkPackage};
use crate::pool::worker::WorkerStatus;
use crate::wallet::SignedTransfer;
use crate::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Snapshot of one worker, published by the engine on every release tick
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerRecord {
    /// Identity key, `ip_address_workerId`
    pub key: String,
    pub address: String,
    pub worker_id: String,
    pub ip: Option<String>,
    pub alive: bool,
    pub status: WorkerStatus,
    pub career: u32,
    pub hashrate: f64,
    pub hashshare: f64,
    /// Fee rate at the last measurement
    pub fee_rate: f64,
    /// `hashshare · fee_rate`
    pub fee: f64,
    /// `hashshare · (1 − fee_rate)`
    pub reward: f64,
    pub login_ms: u64,
    pub elapsed_ms: u64,
    pub elapsed: String,
}

/// Workers grouped by payout address
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MinerGroup {
    pub address: String,
    /// Live workers
    pub nodes: u32,
    /// Hashrate of the live workers
    pub hashrate: f64,
    /// Share of the pool hash-share
    pub hashshare: f64,
    pub fee: f64,
    pub reward: f64,
    pub elapsed_ms: u64,
    pub elapsed: String,
}

/// Pool wide totals
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PoolSummary {
    pub worker_count: u32,
    pub miner_count: u32,
    pub pool_hashrate: f64,
    pub pool_hashshare: f64,
    pub updated_at: Option<DateTime<Utc>>,
}

/// One payee's fraction of the next block reward
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RewardShare {
    pub address: String,
    pub reward: f64,
    pub fee: f64,
}

/// A mined block waiting for confirmations before it is paid out
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingPayout {
    pub block_hash: String,
    pub height: u64,
    /// Reward base captured when the block was found
    pub reward_base: Vec<RewardShare>,
    /// Transfers signed for this payout; empty until the first attempt
    #[serde(default)]
    pub transfers: Vec<SignedTransfer>,
    /// Carryover left after this payout, fixed when the transfers are signed
    #[serde(default)]
    pub next_carryover: Option<f64>,
    pub created_at: DateTime<Utc>,
}

/// A block found by the pool
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MinedBlock {
    pub hash: String,
    pub height: u64,
    pub prev_hash: Option<String>,
    /// `None` until the chain has been asked
    pub mainchain: Option<bool>,
    pub found_at: DateTime<Utc>,
}

/// Audit row written when a session ends
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Disconnection {
    pub key: String,
    pub address: String,
    pub worker_id: String,
    pub ip: Option<String>,
    pub reason: String,
    pub at: DateTime<Utc>,
}

/// Storage backend for pool state
#[async_trait]
pub trait PoolStore: Send + Sync {
    /// Record new chain work
    async fn put_work(&self, work: &WorkPackage) -> Result<()>;

    /// Record a solved real job
    async fn add_submit(&self, solved: &SolvedWork) -> Result<()>;

    async fn add_mined_block(&self, block: MinedBlock) -> Result<()>;

    /// Set the main-chain flag of a mined block
    async fn update_mined_block(&self, hash: &str, mainchain: bool) -> Result<()>;

    /// Mined blocks, highest first
    async fn mined_blocks(&self) -> Result<Vec<MinedBlock>>;

    /// Insert or replace worker snapshots
    async fn put_workers(&self, workers: Vec<WorkerRecord>) -> Result<()>;

    async fn get_worker(&self, key: &str) -> Result<Option<WorkerRecord>>;

    async fn workers(&self) -> Result<Vec<WorkerRecord>>;

    /// Mark a worker as no longer connected
    async fn off_worker(&self, key: &str) -> Result<()>;

    /// Drop disconnected workers holding no hash-share that were last seen
    /// before `idle_before_ms`. Returns how many were removed.
    async fn prune_workers(&self, idle_before_ms: u64) -> Result<usize>;

    /// Zero every stored worker's hash-share and start a new reward round.
    /// Returns the new round number.
    async fn reset_hashshare(&self) -> Result<u64>;

    /// Reward rounds started so far, by any engine sharing this store
    async fn round(&self) -> Result<u64>;

    async fn put_miners(&self, miners: Vec<MinerGroup>) -> Result<()>;

    async fn miners(&self) -> Result<Vec<MinerGroup>>;

    async fn put_summary(&self, summary: PoolSummary) -> Result<()>;

    async fn summary(&self) -> Result<PoolSummary>;

    async fn put_reward_base(&self, base: Vec<RewardShare>) -> Result<()>;

    async fn reward_base(&self) -> Result<Vec<RewardShare>>;

    async fn add_pending_payout(&self, payout: PendingPayout) -> Result<()>;

    /// Replace a pending payout, keyed by block hash
    async fn update_pending_payout(&self, payout: PendingPayout) -> Result<()>;

    async fn delete_pending_payout(&self, block_hash: &str) -> Result<()>;

    async fn pending_payouts(&self) -> Result<Vec<PendingPayout>>;

    /// Add to the offense score of `key`, returning the new score
    async fn add_blacklist_score(&self, key: &str, amount: f64) -> Result<f64>;

    async fn blacklist(&self) -> Result<HashMap<String, f64>>;

    /// Multiply every score by `factor`, dropping those that fall below
    /// `min_score`. Returns the number of scores kept.
    async fn decay_blacklist(&self, factor: f64, min_score: f64) -> Result<usize>;

    async fn add_disconnection(&self, record: Disconnection) -> Result<()>;

    async fn carryover(&self) -> Result<f64>;

    async fn set_carryover(&self, amount: f64) -> Result<()>;

    /// Make pending writes durable
    async fn flush(&self) -> Result<()> {
        Ok(())
    }
}
