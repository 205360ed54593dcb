//! Pool logic: job distribution, worker measurement, aggregation and payouts
//!
//! [`engine::PoolEngine`] owns every live session. The collector, payout
//! processor, work poller and block submitter run beside it and share state
//! only through the store and the work queue.

pub mod banker;
pub mod blacklist;
pub mod datacenter;
pub mod engine;
pub mod inspector;
pub mod job;
pub mod poller;
pub mod submitter;
pub mod worker;

pub use banker::{plan_distribution, PayoutOutcome, PayoutProcessor};
pub use datacenter::{aggregate, Collector};
pub use engine::{EngineEvent, PoolEngine};
pub use inspector::Inspector;
pub use job::{Job, JobRegistry, JobState};
pub use poller::WorkPoller;
pub use submitter::BlockSubmitter;
pub use worker::{Worker, WorkerKey, WorkerStatus};
