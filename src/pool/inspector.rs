//! Difficulty regulator
//!
//! Each worker owns one `Inspector`. It issues the worker's probation jobs
//! and retargets their difficulty toward a fixed solve time using a coupled
//! pair of exponential moving averages:
//!
//! ```text
//! timeEMA        = α·elapsed    + (1−α)·timeEMA
//! difficultyEMA  = α·difficulty + (1−α)·difficultyEMA
//! nextDifficulty = timeEMA · difficultyEMA / targetTime
//! ```
//!
//! `targetTime = medianTime / ln 2`, so for exponentially distributed solve
//! times the median settles at `medianTime`.

use crate::config::{InspectorConfig, ProbationProfile};
use crate::core::{CandidateBlock, Prehash};
use crate::pool::job::{Job, JobId, JobRegistry};
use std::sync::Arc;

/// Lifetime of the most recently timed probation job, in epoch milliseconds
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct JobTimer {
    pub start_ms: u64,
    pub end_ms: u64,
    /// Set while a timed job is outstanding
    pub locked: bool,
}

impl JobTimer {
    /// Seconds between start and end; non-positive spans yield `None`
    pub fn elapsed_secs(&self) -> Option<f64> {
        (self.end_ms > self.start_ms).then(|| (self.end_ms - self.start_ms) as f64 / 1000.0)
    }
}

/// Per-worker difficulty regulator
#[derive(Debug)]
pub struct Inspector {
    difficulty: f64,
    time_ema: f64,
    difficulty_ema: f64,
    alpha: f64,
    alpha_decay: f64,
    alpha_floor: f64,
    target_time: f64,
    min_delta: f64,
    max_delta: f64,
    synthetic: Arc<CandidateBlock>,
    /// Timer bracketing the job being measured
    pub timer: JobTimer,
    /// Probation problems solved in the current stage
    pub submits: u32,
    /// Probation jobs issued by this regulator
    pub jobs: JobRegistry,
}

impl Inspector {
    /// Create a regulator for one probation stage starting at `difficulty`
    pub fn new(
        profile: &ProbationProfile,
        difficulty: f64,
        config: &InspectorConfig,
        job_buffer: usize,
    ) -> Self {
        let target_time = profile.target_time();
        Self {
            difficulty,
            time_ema: target_time,
            difficulty_ema: difficulty,
            alpha: profile.alpha,
            alpha_decay: config.alpha_decay,
            alpha_floor: config.alpha_floor,
            target_time,
            min_delta: target_time * config.min_sigma,
            max_delta: target_time * config.max_sigma,
            synthetic: Arc::new(CandidateBlock::synthetic()),
            timer: JobTimer::default(),
            submits: 0,
            jobs: JobRegistry::new(job_buffer),
        }
    }

    /// Current per-hash success probability
    pub fn difficulty(&self) -> f64 {
        self.difficulty
    }

    /// Mean solve time aimed at, in seconds
    pub fn target_time(&self) -> f64 {
        self.target_time
    }

    /// Current smoothing factor
    pub fn alpha(&self) -> f64 {
        self.alpha
    }

    /// Hashrate implied by the current difficulty, in hashes per second
    pub fn estimated_hashrate(&self) -> f64 {
        1.0 / (self.difficulty * self.target_time)
    }

    /// Mint a probation job at the current difficulty. The timer starts on
    /// the first job issued after the previous measurement finished.
    pub fn issue(&mut self, now_ms: u64) -> &Job {
        if !self.timer.locked {
            self.timer.locked = true;
            self.timer.start_ms = now_ms;
        }
        let difficulty = self.difficulty;
        self.jobs
            .create(Arc::clone(&self.synthetic), Prehash::random(), difficulty)
    }

    /// Record an accepted probation solution: every outstanding probation job
    /// is retired and the timer is released for the next job.
    pub fn record_solution(&mut self, now_ms: u64) {
        self.timer.end_ms = now_ms;
        self.submits += 1;
        self.jobs.solve_all();
        self.timer.locked = false;
    }

    /// Retarget after a solution, measuring the elapsed time with the job
    /// timer. The very first job seeds the average with the target time.
    pub fn adjust(&mut self) -> f64 {
        let elapsed = if self.jobs.last_id() == 1 {
            self.target_time
        } else {
            self.timer.elapsed_secs().unwrap_or(self.target_time)
        };
        self.update(elapsed)
    }

    /// Fold one solve time (seconds) into the averages and return the next
    /// difficulty
    pub fn update(&mut self, elapsed_secs: f64) -> f64 {
        let elapsed = if elapsed_secs > 0.0 {
            elapsed_secs.clamp(self.min_delta, self.max_delta)
        } else {
            self.target_time
        };

        self.time_ema = self.alpha * elapsed + (1.0 - self.alpha) * self.time_ema;
        self.difficulty_ema = self.alpha * self.difficulty + (1.0 - self.alpha) * self.difficulty_ema;
        self.difficulty = self.time_ema * self.difficulty_ema / self.target_time;

        if self.alpha_decay > 0.0 {
            self.alpha = (self.alpha - self.alpha_decay).max(self.alpha_floor);
        }
        self.difficulty
    }

    /// Id of the last probation job issued
    pub fn last_job_id(&self) -> JobId {
        self.jobs.last_id()
    }
}
