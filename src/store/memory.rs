//! In-memory store with optional JSON snapshot persistence

use super::{
    Disconnection, MinedBlock, MinerGroup, PendingPayout, PoolStore, PoolSummary, RewardShare,
    WorkerRecord,
};
use crate::core::{SolvedWork, WorkPackage};
use crate::{Error, Result};
use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Works kept for audit
const MAX_WORKS: usize = 100;

/// Solved jobs kept for audit
const MAX_SUBMITS: usize = 1000;

/// Disconnections kept for audit
const MAX_DISCONNECTIONS: usize = 10_000;

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default)]
struct StoreState {
    works: VecDeque<WorkPackage>,
    submits: VecDeque<SolvedWork>,
    mined_blocks: Vec<MinedBlock>,
    workers: HashMap<String, WorkerRecord>,
    miners: Vec<MinerGroup>,
    summary: PoolSummary,
    reward_base: Vec<RewardShare>,
    pending_payouts: Vec<PendingPayout>,
    blacklist: HashMap<String, f64>,
    disconnections: VecDeque<Disconnection>,
    carryover: f64,
    round: u64,
}

fn push_capped<T>(queue: &mut VecDeque<T>, item: T, cap: usize) {
    queue.push_back(item);
    while queue.len() > cap {
        queue.pop_front();
    }
}

/// Store holding every collection in memory.
///
/// With a path the whole state is snapshotted to a JSON file by
/// [`PoolStore::flush`] and reloaded by [`MemoryStore::open`].
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: RwLock<StoreState>,
    path: Option<PathBuf>,
    write_lock: tokio::sync::Mutex<()>,
}

impl MemoryStore {
    /// Volatile store
    pub fn new() -> Self {
        Self::default()
    }

    /// Store backed by a snapshot file, loading it when it exists
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let state = if path.exists() {
            let data = std::fs::read(&path)?;
            let state: StoreState = serde_json::from_slice(&data).map_err(|e| {
                Error::store(format!("Corrupt snapshot {}: {}", path.display(), e))
            })?;
            info!(
                path = %path.display(),
                workers = state.workers.len(),
                pending = state.pending_payouts.len(),
                "Loaded store snapshot"
            );
            state
        } else {
            StoreState::default()
        };

        Ok(Self {
            state: RwLock::new(state),
            path: Some(path),
            write_lock: tokio::sync::Mutex::new(()),
        })
    }

    /// Snapshot file, if any
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Write the snapshot with async file IO. Snapshots are taken and written
    /// under `write_lock` so an older state never replaces a newer one.
    async fn persist(&self) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let _guard = self.write_lock.lock().await;
        let data = {
            let state = self.state.read();
            serde_json::to_vec(&*state)?
        };
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, data).await?;
        tokio::fs::rename(&tmp, path).await?;
        debug!(path = %path.display(), "Store snapshot written");
        Ok(())
    }
}

#[async_trait]
impl PoolStore for MemoryStore {
    async fn put_work(&self, work: &WorkPackage) -> Result<()> {
        push_capped(&mut self.state.write().works, work.clone(), MAX_WORKS);
        Ok(())
    }

    async fn add_submit(&self, solved: &SolvedWork) -> Result<()> {
        push_capped(&mut self.state.write().submits, solved.clone(), MAX_SUBMITS);
        Ok(())
    }

    async fn add_mined_block(&self, block: MinedBlock) -> Result<()> {
        let mut state = self.state.write();
        if !state.mined_blocks.iter().any(|b| b.hash == block.hash) {
            state.mined_blocks.push(block);
        }
        Ok(())
    }

    async fn update_mined_block(&self, hash: &str, mainchain: bool) -> Result<()> {
        let mut state = self.state.write();
        match state.mined_blocks.iter_mut().find(|b| b.hash == hash) {
            Some(block) => {
                block.mainchain = Some(mainchain);
                Ok(())
            }
            None => Err(Error::store(format!("Unknown mined block {}", hash))),
        }
    }

    async fn mined_blocks(&self) -> Result<Vec<MinedBlock>> {
        let mut blocks = self.state.read().mined_blocks.clone();
        blocks.sort_by(|a, b| b.height.cmp(&a.height));
        Ok(blocks)
    }

    async fn put_workers(&self, workers: Vec<WorkerRecord>) -> Result<()> {
        let mut state = self.state.write();
        for worker in workers {
            state.workers.insert(worker.key.clone(), worker);
        }
        Ok(())
    }

    async fn get_worker(&self, key: &str) -> Result<Option<WorkerRecord>> {
        Ok(self.state.read().workers.get(key).cloned())
    }

    async fn workers(&self) -> Result<Vec<WorkerRecord>> {
        Ok(self.state.read().workers.values().cloned().collect())
    }

    async fn off_worker(&self, key: &str) -> Result<()> {
        if let Some(worker) = self.state.write().workers.get_mut(key) {
            worker.alive = false;
        }
        Ok(())
    }

    async fn prune_workers(&self, idle_before_ms: u64) -> Result<usize> {
        let mut state = self.state.write();
        let before = state.workers.len();
        state.workers.retain(|_, w| {
            w.alive || w.hashshare > 0.0 || w.login_ms + w.elapsed_ms >= idle_before_ms
        });
        Ok(before - state.workers.len())
    }

    async fn reset_hashshare(&self) -> Result<u64> {
        let mut state = self.state.write();
        for worker in state.workers.values_mut() {
            worker.hashshare = 0.0;
            worker.fee = 0.0;
            worker.reward = 0.0;
        }
        state.round += 1;
        Ok(state.round)
    }

    async fn round(&self) -> Result<u64> {
        Ok(self.state.read().round)
    }

    async fn put_miners(&self, miners: Vec<MinerGroup>) -> Result<()> {
        self.state.write().miners = miners;
        Ok(())
    }

    async fn miners(&self) -> Result<Vec<MinerGroup>> {
        Ok(self.state.read().miners.clone())
    }

    async fn put_summary(&self, summary: PoolSummary) -> Result<()> {
        self.state.write().summary = summary;
        Ok(())
    }

    async fn summary(&self) -> Result<PoolSummary> {
        Ok(self.state.read().summary.clone())
    }

    async fn put_reward_base(&self, base: Vec<RewardShare>) -> Result<()> {
        self.state.write().reward_base = base;
        Ok(())
    }

    async fn reward_base(&self) -> Result<Vec<RewardShare>> {
        Ok(self.state.read().reward_base.clone())
    }

    async fn add_pending_payout(&self, payout: PendingPayout) -> Result<()> {
        let mut state = self.state.write();
        if state
            .pending_payouts
            .iter()
            .any(|p| p.block_hash == payout.block_hash)
        {
            return Err(Error::store(format!(
                "Payout for {} already pending",
                payout.block_hash
            )));
        }
        state.pending_payouts.push(payout);
        Ok(())
    }

    async fn update_pending_payout(&self, payout: PendingPayout) -> Result<()> {
        let mut state = self.state.write();
        match state
            .pending_payouts
            .iter_mut()
            .find(|p| p.block_hash == payout.block_hash)
        {
            Some(existing) => {
                *existing = payout;
                Ok(())
            }
            None => Err(Error::store(format!(
                "No pending payout for {}",
                payout.block_hash
            ))),
        }
    }

    async fn delete_pending_payout(&self, block_hash: &str) -> Result<()> {
        self.state
            .write()
            .pending_payouts
            .retain(|p| p.block_hash != block_hash);
        Ok(())
    }

    async fn pending_payouts(&self) -> Result<Vec<PendingPayout>> {
        Ok(self.state.read().pending_payouts.clone())
    }

    async fn add_blacklist_score(&self, key: &str, amount: f64) -> Result<f64> {
        let mut state = self.state.write();
        let score = state.blacklist.entry(key.to_string()).or_insert(0.0);
        *score += amount;
        Ok(*score)
    }

    async fn blacklist(&self) -> Result<HashMap<String, f64>> {
        Ok(self.state.read().blacklist.clone())
    }

    async fn decay_blacklist(&self, factor: f64, min_score: f64) -> Result<usize> {
        let mut state = self.state.write();
        state.blacklist.retain(|_, score| {
            *score *= factor;
            *score >= min_score
        });
        Ok(state.blacklist.len())
    }

    async fn add_disconnection(&self, record: Disconnection) -> Result<()> {
        push_capped(
            &mut self.state.write().disconnections,
            record,
            MAX_DISCONNECTIONS,
        );
        Ok(())
    }

    async fn carryover(&self) -> Result<f64> {
        Ok(self.state.read().carryover)
    }

    async fn set_carryover(&self, amount: f64) -> Result<()> {
        self.state.write().carryover = amount;
        Ok(())
    }

    async fn flush(&self) -> Result<()> {
        self.persist().await
    }
}

/// Flush `store` every `interval` until cancelled, then once more
pub async fn run_flush_loop(
    store: Arc<dyn PoolStore>,
    interval: Duration,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                if let Err(e) = store.flush().await {
                    warn!("Failed to flush store: {}", e);
                }
            }
        }
    }
    if let Err(e) = store.flush().await {
        warn!("Failed to flush store on shutdown: {}", e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::worker::WorkerStatus;
    use chrono::Utc;

    fn worker(key: &str, hashshare: f64) -> WorkerRecord {
        WorkerRecord {
            key: key.to_string(),
            address: "Haddr".to_string(),
            worker_id: "w".to_string(),
            ip: None,
            alive: true,
            status: WorkerStatus::Working,
            career: 1,
            hashrate: 10.0,
            hashshare,
            fee_rate: 0.01,
            fee: hashshare * 0.01,
            reward: hashshare * 0.99,
            login_ms: 0,
            elapsed_ms: 0,
            elapsed: "0s".to_string(),
        }
    }

    fn payout(hash: &str) -> PendingPayout {
        PendingPayout {
            block_hash: hash.to_string(),
            height: 7,
            reward_base: vec![],
            transfers: vec![],
            next_carryover: None,
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_off_worker_and_reset() {
        let store = MemoryStore::new();
        store
            .put_workers(vec![worker("a", 5.0), worker("b", 7.0)])
            .await
            .unwrap();
        store.off_worker("a").await.unwrap();
        assert_eq!(store.reset_hashshare().await.unwrap(), 1);
        assert_eq!(store.round().await.unwrap(), 1);

        let a = store.get_worker("a").await.unwrap().unwrap();
        assert!(!a.alive);
        assert_eq!(a.hashshare, 0.0);
        assert_eq!(store.get_worker("b").await.unwrap().unwrap().reward, 0.0);
    }

    #[tokio::test]
    async fn test_pending_payout_lifecycle() {
        let store = MemoryStore::new();
        store.add_pending_payout(payout("h1")).await.unwrap();
        assert!(store.add_pending_payout(payout("h1")).await.is_err());

        let mut updated = payout("h1");
        updated.next_carryover = Some(1.5);
        store.update_pending_payout(updated).await.unwrap();
        assert_eq!(
            store.pending_payouts().await.unwrap()[0].next_carryover,
            Some(1.5)
        );

        store.delete_pending_payout("h1").await.unwrap();
        assert!(store.pending_payouts().await.unwrap().is_empty());
        assert!(store.update_pending_payout(payout("h1")).await.is_err());
    }

    #[tokio::test]
    async fn test_blacklist_scores_accumulate() {
        let store = MemoryStore::new();
        assert_eq!(store.add_blacklist_score("1.2.3.4", 2.0).await.unwrap(), 2.0);
        assert_eq!(store.add_blacklist_score("1.2.3.4", 3.0).await.unwrap(), 5.0);
        assert_eq!(store.blacklist().await.unwrap()["1.2.3.4"], 5.0);

        store.add_blacklist_score("Hfaded", 0.015).await.unwrap();
        assert_eq!(store.decay_blacklist(0.5, 0.01).await.unwrap(), 1);
        assert_eq!(store.blacklist().await.unwrap()["1.2.3.4"], 2.5);
    }

    #[tokio::test]
    async fn test_snapshot_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state").join("pool.json");

        let store = MemoryStore::open(&path).unwrap();
        store.put_workers(vec![worker("a", 5.0)]).await.unwrap();
        store.set_carryover(0.25).await.unwrap();
        store.add_pending_payout(payout("h1")).await.unwrap();
        store.flush().await.unwrap();

        let reopened = MemoryStore::open(&path).unwrap();
        assert_eq!(reopened.get_worker("a").await.unwrap().unwrap().hashshare, 5.0);
        assert_eq!(reopened.carryover().await.unwrap(), 0.25);
        assert_eq!(reopened.pending_payouts().await.unwrap().len(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_concurrent_flushes_keep_latest_state() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pool.json");
        let store = Arc::new(MemoryStore::open(&path).unwrap());

        let mut tasks = tokio::task::JoinSet::new();
        for i in 0..16 {
            let store = store.clone();
            tasks.spawn(async move {
                store.set_carryover(i as f64).await.unwrap();
                store.flush().await.unwrap();
            });
        }
        while let Some(joined) = tasks.join_next().await {
            joined.unwrap();
        }
        store.set_carryover(99.0).await.unwrap();
        store.flush().await.unwrap();

        let reopened = MemoryStore::open(&path).unwrap();
        assert_eq!(reopened.carryover().await.unwrap(), 99.0);
        assert!(!path.with_extension("json.tmp").exists());
    }

    #[tokio::test]
    async fn test_prune_keeps_owed_and_live_workers() {
        let store = MemoryStore::new();
        let mut idle = worker("idle", 0.0);
        idle.alive = false;
        let mut owed = worker("owed", 3.0);
        owed.alive = false;
        let mut fresh = worker("fresh", 0.0);
        fresh.alive = false;
        fresh.login_ms = 5_000;
        store
            .put_workers(vec![idle, owed, fresh, worker("live", 0.0)])
            .await
            .unwrap();

        assert_eq!(store.prune_workers(1_000).await.unwrap(), 1);
        assert!(store.get_worker("idle").await.unwrap().is_none());
        assert_eq!(store.workers().await.unwrap().len(), 3);
    }

    #[test]
    fn test_corrupt_snapshot_is_an_error() {
        let file = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(file.path(), b"not json").unwrap();
        assert!(matches!(
            MemoryStore::open(file.path()),
            Err(Error::Store { .. })
        ));
    }

    #[tokio::test]
    async fn test_mined_blocks_sorted_by_height() {
        let store = MemoryStore::new();
        for (hash, height) in [("a", 1), ("b", 3), ("c", 2)] {
            store
                .add_mined_block(MinedBlock {
                    hash: hash.to_string(),
                    height,
                    prev_hash: None,
                    mainchain: None,
                    found_at: Utc::now(),
                })
                .await
                .unwrap();
        }
        store.update_mined_block("c", true).await.unwrap();
        let blocks = store.mined_blocks().await.unwrap();
        assert_eq!(
            blocks.iter().map(|b| b.height).collect::<Vec<_>>(),
            vec![3, 2, 1]
        );
        assert_eq!(blocks[1].mainchain, Some(true));
    }
}
