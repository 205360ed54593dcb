//! Worker lifecycle state machine
//!
//! ```text
//! Intern ──n_intern──▶ OnInterview ──n_interview──▶ Working ◀──n_dayoff── Dayoff
//!                                                      └──every freq_dayoff──┘
//! ```
//!
//! A worker only receives real chain jobs while `Working`. In every other
//! state it solves synthetic jobs from its own regulator, which is how its
//! hashrate gets measured.

use crate::config::{FeeConfig, PoolConfig, StratumConfig};
use crate::pool::inspector::Inspector;
use crate::store::WorkerRecord;
use crate::utils::format_elapsed;
use crate::wallet::is_valid_address;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::IpAddr;

/// Career counter wraps back to zero past this value
pub const MAX_CAREER: u32 = 0x7FFF_FFFF;

/// Longest worker label kept
pub const MAX_WORKER_ID_LEN: usize = 20;

/// Session id characters used as the label of anonymous workers
const ANONYMOUS_ID_LEN: usize = 12;

/// Lifecycle states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerStatus {
    Intern,
    OnInterview,
    Dayoff,
    Working,
}

impl WorkerStatus {
    /// Whether the worker is on synthetic jobs
    pub fn is_probation(&self) -> bool {
        !matches!(self, WorkerStatus::Working)
    }
}

impl fmt::Display for WorkerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkerStatus::Intern => write!(f, "intern"),
            WorkerStatus::OnInterview => write!(f, "on-interview"),
            WorkerStatus::Dayoff => write!(f, "dayoff"),
            WorkerStatus::Working => write!(f, "working"),
        }
    }
}

/// Identity used to aggregate a worker's contribution across reconnects
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct WorkerKey {
    pub ip: Option<IpAddr>,
    pub address: String,
    pub worker_id: String,
}

impl WorkerKey {
    pub fn new(ip: Option<IpAddr>, address: impl Into<String>, worker_id: impl Into<String>) -> Self {
        Self {
            ip,
            address: address.into(),
            worker_id: worker_id.into(),
        }
    }
}

impl fmt::Display for WorkerKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.ip {
            Some(ip) => write!(f, "{}_{}_{}", ip, self.address, self.worker_id),
            None => write!(f, "{}_{}", self.address, self.worker_id),
        }
    }
}

/// Payout address for an authorize request. Malformed addresses and the
/// donation address mine for the free-miner address.
pub fn normalize_address(address: &str, config: &StratumConfig) -> String {
    let address = address.trim();
    let is_donation = config.donation_address.as_deref() == Some(address);
    if !is_valid_address(address) || is_donation {
        config.free_miner_address.clone()
    } else {
        address.to_string()
    }
}

/// Worker label for an authorize request: blank labels fall back to the
/// session id prefix, long ones are cut to [`MAX_WORKER_ID_LEN`] characters
pub fn normalize_worker_id(session_id: &str, worker_id: &str) -> String {
    let worker_id = worker_id.trim();
    if worker_id.is_empty() {
        session_id.chars().take(ANONYMOUS_ID_LEN).collect()
    } else {
        worker_id.chars().take(MAX_WORKER_ID_LEN).collect()
    }
}

/// Fee charged to a worker that has been logged in for `elapsed_ms`. It halves
/// every `half_life` and never drops below the minimum.
pub fn decayed_fee(elapsed_ms: u64, fees: &FeeConfig) -> f64 {
    let elapsed = elapsed_ms as f64 / 1000.0;
    let half_life = fees.half_life.as_secs_f64().max(f64::MIN_POSITIVE);
    let fee = fees.initial_fee * (-std::f64::consts::LN_2 / half_life * elapsed).exp();
    fee.max(fees.min_fee)
}

/// A mining worker bound to one live session
#[derive(Debug)]
pub struct Worker {
    pub key: WorkerKey,
    pub status: WorkerStatus,
    /// Real jobs dispatched over the worker's lifetime
    pub career: u32,
    /// Hashes per second
    pub hashrate: f64,
    /// Integrated hashrate since the last block find
    pub hashshare: f64,
    pub fee: f64,
    pub login_ms: u64,
    /// Time of the last measurement
    pub tick_ms: u64,
    /// Offenses charged to this worker
    pub invalid: u32,
    pub inspector: Inspector,
}

impl Worker {
    /// Welcome a worker seen for the first time
    pub fn new(key: WorkerKey, config: &PoolConfig, now_ms: u64) -> Self {
        let status = if config.lifecycle.num_intern_problems > 0 {
            WorkerStatus::Intern
        } else {
            WorkerStatus::OnInterview
        };
        Self {
            key,
            status,
            career: 0,
            hashrate: 0.0,
            hashshare: 0.0,
            fee: config.fees.initial_fee,
            login_ms: now_ms,
            tick_ms: now_ms,
            invalid: 0,
            inspector: probation_inspector(status, config.intern_difficulty(), config),
        }
    }

    /// Bring back a worker from its stored record. Contribution and career
    /// survive; the lifecycle restarts at the beginning, seeded with the last
    /// measured hashrate when there is one.
    pub fn rehydrate(key: WorkerKey, record: &WorkerRecord, config: &PoolConfig, now_ms: u64) -> Self {
        let mut worker = Self::new(key, config, now_ms);
        worker.career = record.career;
        worker.hashrate = record.hashrate;
        worker.hashshare = record.hashshare;
        worker.fee = record.fee_rate;
        worker.login_ms = record.login_ms.min(now_ms);

        if record.hashrate > 0.0 {
            let profile = match worker.status {
                WorkerStatus::Intern => &config.inspector.intern,
                _ => &config.inspector.interview,
            };
            let difficulty = (1.0 / (record.hashrate * profile.target_time())).min(1.0);
            worker.inspector = probation_inspector(worker.status, difficulty, config);
        }
        worker
    }

    /// Re-estimate the hashrate from the regulator and integrate the hash
    /// share since the previous measurement with the trapezoid rule
    pub fn measure(&mut self, now_ms: u64, fees: &FeeConfig) {
        let previous_hashrate = self.hashrate;
        let previous_tick = self.tick_ms;
        self.tick_ms = now_ms;
        self.hashrate = self.inspector.estimated_hashrate();

        let dt = now_ms.saturating_sub(previous_tick) as f64 / 1000.0;
        self.hashshare += 0.5 * (previous_hashrate + self.hashrate) * dt;
        self.fee = decayed_fee(now_ms.saturating_sub(self.login_ms), fees);
    }

    /// Count one real job dispatch and report whether it is time for a day-off
    pub fn check_dayoff(&mut self, freq_dayoff: u32) -> bool {
        if self.career > MAX_CAREER {
            self.career = 0;
        }
        self.career += 1;
        if self.career % freq_dayoff.max(1) == 0 {
            self.status = WorkerStatus::Dayoff;
            return true;
        }
        false
    }

    /// Problems required to leave the current probation stage
    pub fn problems_required(&self, config: &PoolConfig) -> u32 {
        if self.career != 0 {
            config.lifecycle.num_dayoff_problems
        } else if self.status == WorkerStatus::Intern {
            config.lifecycle.num_intern_problems
        } else {
            config.lifecycle.num_interview_problems
        }
    }

    /// Advance the probation stage once enough problems are solved. Returns
    /// true when the worker has just been (re)admitted to real work.
    pub fn check_working_day(&mut self, config: &PoolConfig) -> bool {
        if self.inspector.submits < self.problems_required(config) {
            return false;
        }
        self.inspector.submits = 0;

        if self.status == WorkerStatus::Intern {
            self.status = WorkerStatus::OnInterview;
            let difficulty = self.inspector.difficulty();
            self.inspector = probation_inspector(self.status, difficulty, config);
            false
        } else {
            self.status = WorkerStatus::Working;
            true
        }
    }

    /// Day-off rounds completed, used in log prefixes
    pub fn round(&self, freq_dayoff: u32) -> u32 {
        self.career / freq_dayoff.max(1)
    }

    /// Snapshot for the store
    pub fn record(&self, now_ms: u64, alive: bool) -> WorkerRecord {
        let elapsed = now_ms.saturating_sub(self.login_ms);
        WorkerRecord {
            key: self.key.to_string(),
            address: self.key.address.clone(),
            worker_id: self.key.worker_id.clone(),
            ip: self.key.ip.map(|ip| ip.to_string()),
            alive,
            status: self.status,
            career: self.career,
            hashrate: self.hashrate,
            hashshare: self.hashshare,
            fee_rate: self.fee,
            fee: self.hashshare * self.fee,
            reward: self.hashshare * (1.0 - self.fee),
            login_ms: self.login_ms,
            elapsed_ms: elapsed,
            elapsed: format_elapsed(elapsed),
        }
    }
}

/// Regulator for the given probation stage
fn probation_inspector(status: WorkerStatus, difficulty: f64, config: &PoolConfig) -> Inspector {
    let profile = match status {
        WorkerStatus::Intern => &config.inspector.intern,
        _ => &config.inspector.interview,
    };
    Inspector::new(profile, difficulty, &config.inspector, config.stratum.job_buffer)
}
