//! Offense scores by IP and address
//!
//! Scores are persisted in the store so every engine sees the same list. The
//! engine keeps a local copy, updated on each offense and reloaded on patrol.

use crate::config::BlacklistConfig;
use std::collections::HashMap;

#[derive(Debug, Clone)]
pub struct Blacklist {
    scores: HashMap<String, f64>,
    threshold: f64,
}

impl Blacklist {
    pub fn new(config: &BlacklistConfig) -> Self {
        Self {
            scores: HashMap::new(),
            threshold: config.threshold as f64,
        }
    }

    pub fn score(&self, key: &str) -> f64 {
        self.scores.get(key).copied().unwrap_or(0.0)
    }

    /// Record a score already persisted elsewhere
    pub fn set(&mut self, key: &str, score: f64) {
        self.scores.insert(key.to_string(), score);
    }

    /// Replace the local copy with the persisted list
    pub fn replace(&mut self, scores: HashMap<String, f64>) {
        self.scores = scores;
    }

    /// Whether a client must be refused. A connection is banned once its own
    /// offense count, its IP or its address crosses the threshold.
    pub fn is_banned(&self, ip: Option<&str>, address: Option<&str>, invalid: u32) -> bool {
        let by_worker = invalid as f64 > self.threshold;
        let by_ip = ip.is_some_and(|ip| self.score(ip) > self.threshold);
        let by_address = address.is_some_and(|address| self.score(address) > self.threshold);
        by_worker || by_ip || by_address
    }

    pub fn len(&self) -> usize {
        self.scores.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scores.is_empty()
    }
}
