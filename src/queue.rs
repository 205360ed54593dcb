//! Work queue between block producer, engines and block submitter
//!
//! Two topics: `putwork` carries new chain work to every engine, and
//! `submitwork` carries solved real jobs to the block submitter.

use crate::core::{SolvedWork, WorkPackage};
use crate::{Error, Result};
use async_trait::async_trait;
use tokio::sync::broadcast;
use tracing::debug;

/// Topic for new chain work
pub const PUT_WORK: &str = "putwork";

/// Topic for solved real jobs
pub const SUBMIT_WORK: &str = "submitwork";

/// Messages buffered per subscriber before it starts lagging
const TOPIC_CAPACITY: usize = 1024;

/// Publish/subscribe transport for the two work topics
#[async_trait]
pub trait WorkQueue: Send + Sync {
    async fn publish_work(&self, work: WorkPackage) -> Result<()>;

    fn subscribe_work(&self) -> broadcast::Receiver<WorkPackage>;

    async fn publish_solved(&self, solved: SolvedWork) -> Result<()>;

    fn subscribe_solved(&self) -> broadcast::Receiver<SolvedWork>;
}

/// In-process fanout queue
#[derive(Debug)]
pub struct LocalQueue {
    put_work: broadcast::Sender<WorkPackage>,
    submit_work: broadcast::Sender<SolvedWork>,
}

impl LocalQueue {
    pub fn new() -> Self {
        let (put_work, _) = broadcast::channel(TOPIC_CAPACITY);
        let (submit_work, _) = broadcast::channel(TOPIC_CAPACITY);
        Self {
            put_work,
            submit_work,
        }
    }
}

impl Default for LocalQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl WorkQueue for LocalQueue {
    async fn publish_work(&self, work: WorkPackage) -> Result<()> {
        let receivers = self
            .put_work
            .send(work)
            .map_err(|_| Error::queue(format!("No subscribers on {}", PUT_WORK)))?;
        debug!(topic = PUT_WORK, receivers, "Published work");
        Ok(())
    }

    fn subscribe_work(&self) -> broadcast::Receiver<WorkPackage> {
        self.put_work.subscribe()
    }

    async fn publish_solved(&self, solved: SolvedWork) -> Result<()> {
        let receivers = self
            .submit_work
            .send(solved)
            .map_err(|_| Error::queue(format!("No subscribers on {}", SUBMIT_WORK)))?;
        debug!(topic = SUBMIT_WORK, receivers, "Published solved work");
        Ok(())
    }

    fn subscribe_solved(&self) -> broadcast::Receiver<SolvedWork> {
        self.submit_work.subscribe()
    }
}
