//! Work poller
//!
//! Asks the node for its current candidate block and publishes it on
//! `putwork` whenever the pre-hash changes.

use crate::config::PoolConfig;
use crate::core::{Prehash, WorkPackage};
use crate::node::ChainNode;
use crate::queue::WorkQueue;
use crate::store::PoolStore;
use crate::Result;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub struct WorkPoller {
    config: Arc<PoolConfig>,
    node: Arc<dyn ChainNode>,
    queue: Arc<dyn WorkQueue>,
    store: Arc<dyn PoolStore>,
    last_prehash: Option<Prehash>,
}

impl WorkPoller {
    pub fn new(
        config: Arc<PoolConfig>,
        node: Arc<dyn ChainNode>,
        queue: Arc<dyn WorkQueue>,
        store: Arc<dyn PoolStore>,
    ) -> Self {
        Self {
            config,
            node,
            queue,
            store,
            last_prehash: None,
        }
    }

    /// Fetch work once. Returns the package when it was new and published.
    pub async fn poll(&mut self) -> Result<Option<WorkPackage>> {
        let work = self.node.get_work().await?;
        if self.last_prehash == Some(work.prehash) {
            return Ok(None);
        }

        self.store.put_work(&work).await?;
        self.queue.publish_work(work.clone()).await?;
        self.last_prehash = Some(work.prehash);
        debug!(height = work.block.height, "New work published");
        Ok(Some(work))
    }

    pub async fn run(mut self, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.config.intervals.poll_work);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        info!("Work poller started");
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    if let Err(e) = self.poll().await {
                        warn!(category = e.category(), "Work poll failed: {}", e);
                    }
                }
            }
        }
        info!("Work poller stopped");
    }
}
