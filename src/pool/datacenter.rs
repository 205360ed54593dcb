//! Aggregation of worker snapshots
//!
//! The collector turns the per-worker records published by every engine into
//! per-address miner groups, pool totals and the reward base: each address's
//! fraction of the next block reward. Reward and fee fractions of the reward
//! base always sum to one, so a payout never distributes more than it earns.

use crate::config::PoolConfig;
use crate::store::{MinerGroup, PoolStore, PoolSummary, RewardShare, WorkerRecord};
use crate::utils::{format_elapsed, format_hash_rate, now_millis};
use crate::Result;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

/// Blacklist scores below this are forgotten
const FORGOTTEN_SCORE: f64 = 0.01;

/// Output of one collection pass
#[derive(Debug, Clone, PartialEq)]
pub struct Aggregate {
    pub summary: PoolSummary,
    /// Miner groups, highest hashrate first
    pub miners: Vec<MinerGroup>,
    pub reward_base: Vec<RewardShare>,
}

/// Group worker records by address and normalise by the pool hash-share.
///
/// Only live workers count towards nodes and hashrate; hash-share, fee and
/// reward include offline workers, whose contribution is still owed.
pub fn aggregate(workers: &[WorkerRecord]) -> Aggregate {
    let mut groups: HashMap<&str, MinerGroup> = HashMap::new();
    for worker in workers {
        let group = groups
            .entry(worker.address.as_str())
            .or_insert_with(|| MinerGroup {
                address: worker.address.clone(),
                nodes: 0,
                hashrate: 0.0,
                hashshare: 0.0,
                fee: 0.0,
                reward: 0.0,
                elapsed_ms: 0,
                elapsed: String::new(),
            });
        if worker.alive {
            group.nodes += 1;
            group.hashrate += worker.hashrate;
        }
        group.hashshare += worker.hashshare;
        group.fee += worker.fee;
        group.reward += worker.reward;
        group.elapsed_ms = group.elapsed_ms.max(worker.elapsed_ms);
    }

    let mut miners: Vec<MinerGroup> = groups.into_values().collect();
    let worker_count = miners.iter().map(|m| m.nodes).sum();
    let pool_hashrate = miners.iter().map(|m| m.hashrate).sum();
    let pool_hashshare: f64 = miners.iter().map(|m| m.hashshare).sum();

    for miner in miners.iter_mut() {
        miner.elapsed = format_elapsed(miner.elapsed_ms);
        if pool_hashshare > 0.0 {
            miner.hashshare /= pool_hashshare;
            miner.reward /= pool_hashshare;
            miner.fee /= pool_hashshare;
        }
    }
    miners.sort_by(|a, b| b.hashrate.total_cmp(&a.hashrate));

    let reward_base = if pool_hashshare > 0.0 {
        miners
            .iter()
            .map(|m| RewardShare {
                address: m.address.clone(),
                reward: m.reward,
                fee: m.fee,
            })
            .collect()
    } else {
        Vec::new()
    };

    Aggregate {
        summary: PoolSummary {
            worker_count,
            miner_count: miners.len() as u32,
            pool_hashrate,
            pool_hashshare,
            updated_at: Some(Utc::now()),
        },
        miners,
        reward_base,
    }
}

/// Periodic aggregation over the store
pub struct Collector {
    config: Arc<PoolConfig>,
    store: Arc<dyn PoolStore>,
}

impl Collector {
    pub fn new(config: Arc<PoolConfig>, store: Arc<dyn PoolStore>) -> Self {
        Self { config, store }
    }

    /// One pass: aggregate workers, write the results and age the blacklist
    pub async fn collect(&self) -> Result<Aggregate> {
        let retention = self.config.store.worker_retention.as_millis() as u64;
        let pruned = self
            .store
            .prune_workers(now_millis().saturating_sub(retention))
            .await?;
        if pruned > 0 {
            debug!(pruned, "Forgot idle workers");
        }

        let workers = self.store.workers().await?;
        let result = aggregate(&workers);

        self.store.put_miners(result.miners.clone()).await?;
        self.store.put_reward_base(result.reward_base.clone()).await?;
        self.store.put_summary(result.summary.clone()).await?;

        let kept = self
            .store
            .decay_blacklist(self.config.blacklist.decay, FORGOTTEN_SCORE)
            .await?;

        debug!(blacklisted = kept, "Blacklist aged");
        info!(
            "Done: Workers({}) Miners({}) PoolHashrate({})",
            result.summary.worker_count,
            result.summary.miner_count,
            format_hash_rate(result.summary.pool_hashrate)
        );
        Ok(result)
    }

    pub async fn run(self, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.config.intervals.collector);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    if let Err(e) = self.collect().await {
                        error!("Collection failed: {}", e);
                    }
                }
            }
        }
        info!("Collector stopped");
    }
}
