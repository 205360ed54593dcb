//! Shared helpers for integration tests: a scripted chain node and a miner
//! driving the engine directly through its event handler.

#![allow(dead_code)]

use async_trait::async_trait;
use mining_pool::config::PoolConfig;
use mining_pool::core::{
    search_nonce, Blake2sPow, CandidateBlock, Nonce, Prehash, SolvedWork, Target, WorkPackage,
};
use mining_pool::node::{Account, BlockStatus, ChainNode, ChainTip};
use mining_pool::pool::{EngineEvent, PoolEngine};
use mining_pool::stratum::{Outbound, SessionHandle, SessionId, StratumRequest, OUTBOX_CAPACITY};
use mining_pool::wallet::SignedTransfer;
use mining_pool::{Error, Result};
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::sync::mpsc;

/// A valid address derived from a single byte
pub fn address(byte: u8) -> String {
    format!("H{}", hex::encode([byte; 20]))
}

/// Configuration that lets a test miner pass probation in a few cheap jobs
pub fn fast_config() -> PoolConfig {
    let mut config = PoolConfig::default();
    config.lifecycle.num_intern_problems = 2;
    config.lifecycle.num_interview_problems = 2;
    config.lifecycle.initial_hashrate = 200.0;
    config.lifecycle.min_hashrate = 1.0;
    config.inspector.intern.median_time = Duration::from_secs(1);
    config.inspector.interview.median_time = Duration::from_secs(1);
    config.banker.confirmations = 5;
    config
}

pub fn work(height: u64, difficulty: f64) -> WorkPackage {
    WorkPackage {
        block: CandidateBlock {
            header: height.to_le_bytes().to_vec(),
            height,
            difficulty,
            prev_hash: None,
        },
        prehash: Prehash::random(),
    }
}

#[derive(Default)]
struct NodeState {
    tip: u64,
    statuses: HashMap<String, BlockStatus>,
    heights: HashMap<String, u64>,
    account_nonce: Option<u64>,
    pending_nonce: Option<u64>,
    put_txs_failures: u32,
    broadcast_failures: u32,
    submitted: Vec<SignedTransfer>,
    broadcast: Vec<SignedTransfer>,
    blocks: Vec<SolvedWork>,
    work: Option<WorkPackage>,
}

/// Chain node whose answers are set by the test
#[derive(Default)]
pub struct MockNode {
    state: Mutex<NodeState>,
}

impl MockNode {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_tip(&self, height: u64) {
        self.state.lock().tip = height;
    }

    pub fn set_block(&self, hash: &str, height: u64, status: BlockStatus) {
        let mut state = self.state.lock();
        state.heights.insert(hash.to_string(), height);
        state.statuses.insert(hash.to_string(), status);
    }

    pub fn set_account_nonce(&self, nonce: Option<u64>) {
        self.state.lock().account_nonce = nonce;
    }

    pub fn set_pending_nonce(&self, nonce: Option<u64>) {
        self.state.lock().pending_nonce = nonce;
    }

    /// Make the next `count` transaction submissions fail
    pub fn fail_put_txs(&self, count: u32) {
        self.state.lock().put_txs_failures = count;
    }

    /// Make the next `count` transaction broadcasts fail
    pub fn fail_broadcast_txs(&self, count: u32) {
        self.state.lock().broadcast_failures = count;
    }

    pub fn set_work(&self, work: WorkPackage) {
        self.state.lock().work = Some(work);
    }

    pub fn submitted(&self) -> Vec<SignedTransfer> {
        self.state.lock().submitted.clone()
    }

    pub fn broadcast(&self) -> Vec<SignedTransfer> {
        self.state.lock().broadcast.clone()
    }

    pub fn blocks(&self) -> Vec<SolvedWork> {
        self.state.lock().blocks.clone()
    }
}

#[async_trait]
impl ChainNode for MockNode {
    async fn get_work(&self) -> Result<WorkPackage> {
        self.state
            .lock()
            .work
            .clone()
            .ok_or_else(|| Error::node("no work"))
    }

    async fn get_account(&self, address: &str) -> Result<Option<Account>> {
        Ok(self.state.lock().account_nonce.map(|nonce| Account {
            address: address.to_string(),
            balance: u64::MAX,
            nonce,
        }))
    }

    async fn pending_nonce(&self, _address: &str) -> Result<Option<u64>> {
        Ok(self.state.lock().pending_nonce)
    }

    async fn put_txs(&self, txs: &[SignedTransfer]) -> Result<Vec<SignedTransfer>> {
        let mut state = self.state.lock();
        if state.put_txs_failures > 0 {
            state.put_txs_failures -= 1;
            return Err(Error::node("transaction pool unavailable"));
        }
        state.submitted.extend_from_slice(txs);
        Ok(txs.to_vec())
    }

    async fn broadcast_txs(&self, txs: &[SignedTransfer]) -> Result<()> {
        let mut state = self.state.lock();
        if state.broadcast_failures > 0 {
            state.broadcast_failures -= 1;
            return Err(Error::node("no peers"));
        }
        state.broadcast.extend_from_slice(txs);
        Ok(())
    }

    async fn put_block(&self, solved: &SolvedWork) -> Result<()> {
        let mut state = self.state.lock();
        let hash = solved.hash.to_hex();
        state.statuses.insert(hash.clone(), BlockStatus::MainChain);
        state.heights.insert(hash, solved.block.height);
        state.blocks.push(solved.clone());
        Ok(())
    }

    async fn broadcast_blocks(&self, _solved: &SolvedWork) -> Result<()> {
        Ok(())
    }

    async fn get_block_status(&self, hash: &str) -> Result<BlockStatus> {
        Ok(self
            .state
            .lock()
            .statuses
            .get(hash)
            .copied()
            .unwrap_or(BlockStatus::Unknown))
    }

    async fn get_block_height(&self, hash: &str) -> Result<Option<u64>> {
        Ok(self.state.lock().heights.get(hash).copied())
    }

    async fn get_blocks_tip(&self) -> Result<ChainTip> {
        let state = self.state.lock();
        Ok(ChainTip {
            hash: "00".repeat(32),
            height: state.tip,
        })
    }
}

/// A job as announced in `mining.notify`
#[derive(Debug, Clone)]
pub struct Notified {
    pub job_id: u32,
    pub prehash: Prehash,
    pub target: Target,
}

/// A miner attached to the engine without a socket
pub struct TestMiner {
    pub session: SessionId,
    outbox: mpsc::Receiver<Outbound>,
    /// Lines received but not yet looked at for jobs
    pending: Vec<Value>,
    next_id: u64,
}

impl TestMiner {
    pub async fn connect(engine: &mut PoolEngine, peer: &str) -> Self {
        let (tx, outbox) = mpsc::channel(OUTBOX_CAPACITY);
        let session = SessionId::new();
        let peer: SocketAddr = peer.parse().unwrap();
        engine
            .handle_event(EngineEvent::Connected(SessionHandle::new(session, peer, tx)))
            .await;
        Self {
            session,
            outbox,
            pending: Vec::new(),
            next_id: 1,
        }
    }

    pub async fn request(&mut self, engine: &mut PoolEngine, method: &str, params: Value) -> Value {
        let id = self.next_id;
        self.next_id += 1;
        engine
            .handle_event(EngineEvent::Request {
                session: self.session,
                request: StratumRequest::new(id, method, params),
            })
            .await;
        self.drain()
            .into_iter()
            .find(|line| line["id"] == json!(id))
            .unwrap_or(Value::Null)
    }

    /// Every line sent so far, responses and notifications alike, in order
    pub fn drain(&mut self) -> Vec<Value> {
        let mut lines = Vec::new();
        while let Ok(outbound) = self.outbox.try_recv() {
            match outbound {
                Outbound::Line(line) => lines.push(serde_json::from_str(&line).unwrap()),
                Outbound::Close => lines.push(json!("close")),
            }
        }
        self.pending.extend(lines.iter().cloned());
        lines
    }

    /// Whether the engine asked for the connection to be dropped
    pub fn was_closed(&mut self) -> bool {
        self.drain();
        self.pending.contains(&json!("close"))
    }

    /// The newest job announced to this miner, consuming buffered lines
    pub fn latest_job(&mut self) -> Option<Notified> {
        self.drain();
        let job = self
            .pending
            .iter()
            .rev()
            .find(|line| line["method"] == "mining.notify")
            .map(parse_notify);
        self.pending.clear();
        job
    }

    pub async fn submit(&mut self, engine: &mut PoolEngine, job_id: u32, nonce: Nonce) -> Value {
        self.request(
            engine,
            "mining.submit",
            json!([job_id.to_string(), nonce.to_hex(), ""]),
        )
        .await["result"]
            .clone()
    }

    /// Solve the newest job and submit the solution
    pub async fn solve_latest(&mut self, engine: &mut PoolEngine) -> (Notified, Value) {
        let job = self.latest_job().expect("no job announced");
        let nonce = solve(&job);
        let result = self.submit(engine, job.job_id, nonce).await;
        (job, result)
    }
}

fn parse_notify(line: &Value) -> Notified {
    let params = line["params"].as_array().unwrap();
    Notified {
        job_id: params[3].as_u64().unwrap() as u32,
        prehash: Prehash::from_hex(params[1].as_str().unwrap()).unwrap(),
        target: Target::from_wire_hex(params[2].as_str().unwrap()).unwrap(),
    }
}

/// Brute force a nonce for an announced job
pub fn solve(job: &Notified) -> Nonce {
    search_nonce(&Blake2sPow, &job.prehash, &job.target, 0, u64::MAX).expect("nonce space exhausted")
}
