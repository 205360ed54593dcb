//! Mining Pool
//!
//! A stratum mining pool engine:
//! - Per-worker difficulty tuned from observed solve times
//! - Probation on synthetic jobs before real work is handed out
//! - Hashrate integrated into a hash-share that decides each miner's reward
//! - Payouts after confirmation, safe to interrupt at any point

pub mod api;
pub mod config;
pub mod core;
pub mod error;
pub mod node;
pub mod pool;
pub mod queue;
pub mod store;
pub mod stratum;
pub mod utils;
pub mod wallet;

pub use config::PoolConfig;
pub use error::{Error, Result};

/// Application information
pub const APP_NAME: &str = "mining-pool";
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");
