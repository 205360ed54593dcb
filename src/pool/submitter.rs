//! Block submission
//!
//! Consumes solved real jobs from `submitwork`, hands them to the chain and
//! records a mined-block row. A slower loop asks the chain which of the
//! recorded blocks ended up in the main chain.

use crate::config::PoolConfig;
use crate::core::SolvedWork;
use crate::node::ChainNode;
use crate::queue::WorkQueue;
use crate::store::{MinedBlock, PoolStore};
use crate::Result;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

pub struct BlockSubmitter {
    config: Arc<PoolConfig>,
    store: Arc<dyn PoolStore>,
    node: Arc<dyn ChainNode>,
    solved_rx: broadcast::Receiver<SolvedWork>,
}

impl BlockSubmitter {
    /// Subscribes to `submitwork` right away
    pub fn new(
        config: Arc<PoolConfig>,
        store: Arc<dyn PoolStore>,
        queue: &dyn WorkQueue,
        node: Arc<dyn ChainNode>,
    ) -> Self {
        Self {
            config,
            store,
            node,
            solved_rx: queue.subscribe_solved(),
        }
    }

    /// Hand one solved block to the chain and record it
    pub async fn submit(&self, solved: &SolvedWork) -> Result<MinedBlock> {
        let hash = solved.hash.to_hex();
        self.node.put_block(solved).await?;
        if let Err(e) = self.node.broadcast_blocks(solved).await {
            warn!(block = %hash, "Broadcast failed: {}", e);
        }

        let mainchain = match self.node.get_block_status(&hash).await {
            Ok(status) => Some(status.is_main_chain()),
            Err(e) => {
                debug!(block = %hash, "Status not available yet: {}", e);
                None
            }
        };
        let height = match self.node.get_block_height(&hash).await {
            Ok(Some(height)) => height,
            _ => solved.block.height,
        };

        let block = MinedBlock {
            hash,
            height,
            prev_hash: solved.block.prev_hash.clone(),
            mainchain,
            found_at: solved.found_at,
        };
        self.store.add_mined_block(block.clone()).await?;
        info!(block = %block.hash, height, "Block submitted");
        Ok(block)
    }

    /// Refresh the main-chain flag of every recorded block
    pub async fn backfill_status(&self) -> Result<usize> {
        let mut updated = 0;
        for block in self.store.mined_blocks().await? {
            match self.node.get_block_status(&block.hash).await {
                Ok(status) => {
                    let mainchain = status.is_main_chain();
                    if block.mainchain != Some(mainchain) {
                        self.store.update_mined_block(&block.hash, mainchain).await?;
                        updated += 1;
                    }
                }
                Err(e) => warn!(block = %block.hash, "Status check failed: {}", e),
            }
        }
        debug!(updated, "Block status backfilled");
        Ok(updated)
    }

    pub async fn run(mut self, cancel: CancellationToken) {
        let mut backfill = tokio::time::interval(self.config.intervals.block_status);
        backfill.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        info!("Block submitter started");
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                solved = self.solved_rx.recv() => match solved {
                    Ok(solved) => {
                        if let Err(e) = self.submit(&solved).await {
                            error!(block = %solved.hash, "Block submission failed: {}", e);
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        error!("Missed {} solved blocks", skipped);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
                _ = backfill.tick() => {
                    if let Err(e) = self.backfill_status().await {
                        error!("Block status backfill failed: {}", e);
                    }
                }
            }
        }
        info!("Block submitter stopped");
    }
}
