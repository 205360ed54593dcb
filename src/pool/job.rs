//! Job registry
//!
//! A bounded ring of outstanding problems keyed by an incrementing id. Real
//! jobs share one registry owned by the engine; every worker's regulator owns
//! another for its probation jobs.

use crate::core::{CandidateBlock, Prehash, Target};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

/// Job identifier as sent in `mining.notify`
pub type JobId = u32;

/// Ids wrap back to the start once they pass this value
pub const MAX_JOB_ID: JobId = 0x7FFF_FFFF;

/// A unit of work handed to miners
#[derive(Debug, Clone)]
pub struct Job {
    pub id: JobId,
    pub block: Arc<CandidateBlock>,
    pub prehash: Prehash,
    /// Per-hash success probability the job was minted at
    pub difficulty: f64,
    pub target: Target,
    pub solved: bool,
}

/// Result of looking a submitted job id up
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    /// Never issued, or already evicted
    Unknown,
    /// Already solved; further submissions are acknowledged without effect
    Solved,
    /// Waiting for a solution
    Open,
}

/// Bounded ring of jobs
#[derive(Debug)]
pub struct JobRegistry {
    last_id: JobId,
    jobs: HashMap<JobId, Job>,
    order: VecDeque<JobId>,
    capacity: usize,
}

impl JobRegistry {
    /// Create a registry remembering at most `capacity` jobs
    pub fn new(capacity: usize) -> Self {
        Self {
            last_id: 0,
            jobs: HashMap::with_capacity(capacity),
            order: VecDeque::with_capacity(capacity + 1),
            capacity: capacity.max(1),
        }
    }

    fn next_id(&mut self) -> JobId {
        if self.last_id >= MAX_JOB_ID {
            self.last_id = 0;
        }
        self.last_id += 1;
        self.last_id
    }

    /// Mint a job for `block` at `difficulty`, evicting the oldest job once
    /// the ring is full
    pub fn create(&mut self, block: Arc<CandidateBlock>, prehash: Prehash, difficulty: f64) -> &Job {
        let id = self.next_id();
        let job = Job {
            id,
            block,
            prehash,
            difficulty,
            target: Target::from_difficulty(difficulty),
            solved: false,
        };

        if self.jobs.insert(id, job).is_some() {
            self.order.retain(|&queued| queued != id);
        }
        self.order.push_back(id);
        while self.order.len() > self.capacity {
            if let Some(evicted) = self.order.pop_front() {
                self.jobs.remove(&evicted);
            }
        }

        &self.jobs[&id]
    }

    /// Look a job up by id
    pub fn get(&self, id: JobId) -> Option<&Job> {
        self.jobs.get(&id)
    }

    /// Classify a submitted job id
    pub fn state(&self, id: JobId) -> JobState {
        match self.jobs.get(&id) {
            None => JobState::Unknown,
            Some(job) if job.solved => JobState::Solved,
            Some(_) => JobState::Open,
        }
    }

    /// Mark one job solved. Returns false when it was unknown or already solved.
    pub fn mark_solved(&mut self, id: JobId) -> bool {
        match self.jobs.get_mut(&id) {
            Some(job) if !job.solved => {
                job.solved = true;
                true
            }
            _ => false,
        }
    }

    /// Mark every outstanding job solved
    pub fn solve_all(&mut self) {
        for job in self.jobs.values_mut() {
            job.solved = true;
        }
    }

    /// The most recently minted job
    pub fn latest(&self) -> Option<&Job> {
        self.order.back().and_then(|id| self.jobs.get(id))
    }

    /// Id of the most recently minted job (0 before the first)
    pub fn last_id(&self) -> JobId {
        self.last_id
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }
}
