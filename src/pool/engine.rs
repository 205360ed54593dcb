//! Pool engine
//!
//! A single task owns every session, its worker and the real job registry.
//! Connection tasks feed it [`EngineEvent`]s; new chain work arrives on the
//! `putwork` topic. Handlers never fail outward: errors are logged and, when
//! the client is at fault, scored against it.

use crate::config::PoolConfig;
use crate::core::{check_nonce, wire_target_hex, PowHasher, SolvedWork, WorkPackage};
use crate::pool::blacklist::Blacklist;
use crate::pool::job::{Job, JobRegistry, JobState};
use crate::pool::worker::{normalize_address, normalize_worker_id, Worker, WorkerKey, WorkerStatus};
use crate::queue::WorkQueue;
use crate::store::{Disconnection, PendingPayout, PoolStore, RewardShare};
use crate::stratum::{
    AuthorizeParams, NotifyParams, StratumErrorCode, StratumRequest, StratumResponse, SessionHandle,
    SessionId, StratumMethod, SubmitParams,
};
use crate::utils::{format_hash_rate, now_millis};
use crate::{Error, Result};
use chrono::Utc;
use rand::Rng;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Upper bound for the random notify index base
const NOTIFY_INDEX_RANGE: u32 = 0xFF_FFFF;

/// Input from connection tasks
#[derive(Debug)]
pub enum EngineEvent {
    Connected(SessionHandle),
    Request {
        session: SessionId,
        request: StratumRequest,
    },
    /// A line that is not a JSON-RPC request
    Malformed { session: SessionId, error: String },
    Disconnected { session: SessionId, reason: String },
}

/// What to do after the submit response has gone out
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AfterSubmit {
    Nothing,
    /// A probation job was solved; advance the worker's lifecycle
    Probation,
}

#[derive(Debug)]
struct Session {
    handle: SessionHandle,
    worker: Option<Worker>,
}

impl Session {
    fn ip(&self) -> String {
        self.handle.peer.ip().to_string()
    }

    /// Log prefix: address, session and day-off round
    fn nick(&self, freq_dayoff: u32) -> String {
        match &self.worker {
            Some(worker) => format!(
                "{}:{}({})",
                worker.key.address.chars().take(8).collect::<String>(),
                self.handle.id.to_string().chars().take(6).collect::<String>(),
                worker.round(freq_dayoff)
            ),
            None => self.handle.id.to_string(),
        }
    }
}

/// The stratum engine actor
pub struct PoolEngine {
    config: Arc<PoolConfig>,
    store: Arc<dyn PoolStore>,
    queue: Arc<dyn WorkQueue>,
    hasher: Arc<dyn PowHasher>,
    sessions: HashMap<SessionId, Session>,
    jobs: JobRegistry,
    blacklist: Blacklist,
    work_rx: Option<broadcast::Receiver<WorkPackage>>,
    /// Reward round the in-memory hash-shares belong to
    round: Option<u64>,
}

impl PoolEngine {
    /// Create an engine. It subscribes to `putwork` immediately so no work
    /// published after construction is missed.
    pub fn new(
        config: Arc<PoolConfig>,
        store: Arc<dyn PoolStore>,
        queue: Arc<dyn WorkQueue>,
        hasher: Arc<dyn PowHasher>,
    ) -> Self {
        let work_rx = queue.subscribe_work();
        Self {
            jobs: JobRegistry::new(config.stratum.job_buffer),
            blacklist: Blacklist::new(&config.blacklist),
            config,
            store,
            queue,
            hasher,
            sessions: HashMap::new(),
            work_rx: Some(work_rx),
            round: None,
        }
    }

    /// Process events, work and timers until cancelled or every connection
    /// task is gone
    pub async fn run(
        mut self,
        mut events: mpsc::Receiver<EngineEvent>,
        cancel: CancellationToken,
    ) -> Result<()> {
        let mut work_rx = self
            .work_rx
            .take()
            .ok_or_else(|| Error::invalid_state("Engine already running"))?;
        let mut release = tokio::time::interval(self.config.intervals.release);
        let mut patrol = tokio::time::interval(self.config.intervals.patrol);
        release.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        patrol.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        info!("Pool engine started");
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                event = events.recv() => match event {
                    Some(event) => self.handle_event(event).await,
                    None => break,
                },
                work = work_rx.recv() => match work {
                    Ok(work) => self.put_work(work).await,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!("Skipped {} stale work packages", skipped);
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        warn!("Work queue closed");
                        break;
                    }
                },
                _ = release.tick() => self.release_data().await,
                _ = patrol.tick() => self.patrol_blacklist().await,
            }
        }

        self.shutdown().await;
        info!("Pool engine stopped");
        Ok(())
    }

    /// Dispatch one connection event
    pub async fn handle_event(&mut self, event: EngineEvent) {
        match event {
            EngineEvent::Connected(handle) => self.connect(handle),
            EngineEvent::Request { session, request } => self.handle_request(session, request).await,
            EngineEvent::Malformed { session, error } => {
                warn!(session = %session, "Malformed request: {}", error);
                if let Some(s) = self.sessions.get(&session) {
                    respond(
                        &s.handle,
                        StratumResponse::error(Value::Null, StratumErrorCode::InvalidParams),
                    );
                }
                self.give_warnings(session, 1).await;
            }
            EngineEvent::Disconnected { session, reason } => self.close(session, &reason).await,
        }
    }

    fn connect(&mut self, handle: SessionHandle) {
        let ip = handle.peer.ip().to_string();
        if self.blacklist.is_banned(Some(&ip), None, 0) {
            warn!(session = %handle.id, "Refused banned IP {} | score: {}", ip, self.blacklist.score(&ip));
            handle.close();
            return;
        }
        debug!(session = %handle.id, "Session opened for {}", handle.peer);
        self.sessions.insert(handle.id, Session { handle, worker: None });
    }

    async fn handle_request(&mut self, session: SessionId, request: StratumRequest) {
        let Some(handle) = self.sessions.get(&session).map(|s| s.handle.clone()) else {
            debug!(session = %session, "Request for unknown session");
            return;
        };

        match request.method_enum() {
            StratumMethod::Subscribe => {
                let result = json!([session.to_simple(), "0", "0", 4]);
                respond(&handle, StratumResponse::success(request.id, result));
            }
            StratumMethod::Authorize => match AuthorizeParams::from_value(&request.params) {
                Ok(params) => {
                    let authorized = self.authorize(session, params).await;
                    respond(&handle, StratumResponse::success(request.id, json!(authorized)));
                    if authorized {
                        self.put_work_on_inspector(session);
                    }
                }
                Err(e) => {
                    warn!(session = %session, "Bad authorize: {}", e);
                    respond(&handle, StratumResponse::error(request.id, StratumErrorCode::InvalidParams));
                    self.give_warnings(session, 1).await;
                }
            },
            StratumMethod::Submit => {
                if !self.has_worker(session) {
                    respond(&handle, StratumResponse::success(request.id, json!(false)));
                    self.give_warnings(session, 1).await;
                    return;
                }
                match SubmitParams::from_value(&request.params) {
                    Ok(params) => {
                        let (verified, after) = self.submit(session, params).await;
                        respond(&handle, StratumResponse::success(request.id, json!(verified)));
                        if after == AfterSubmit::Probation {
                            self.keep_working_test(session).await;
                        }
                    }
                    Err(e) => {
                        warn!(session = %session, "Bad submit: {}", e);
                        respond(&handle, StratumResponse::error(request.id, StratumErrorCode::InvalidParams));
                        self.give_warnings(session, 1).await;
                    }
                }
            }
            StratumMethod::Notify | StratumMethod::Unknown(_) => {
                debug!(session = %session, "Method not found: {}", request.method);
                respond(&handle, StratumResponse::error(request.id, StratumErrorCode::MethodNotFound));
            }
        }
    }

    /// Bind a worker to the session. Returns false for banned clients.
    async fn authorize(&mut self, session: SessionId, params: AuthorizeParams) -> bool {
        let Some(s) = self.sessions.get(&session) else {
            return false;
        };
        let ip = s.handle.peer.ip();
        if self.blacklist.is_banned(Some(&ip.to_string()), Some(&params.address), 0) {
            warn!(session = %session, "Refused banned worker {} from {}", params.address, ip);
            self.give_warnings(session, 1).await;
            return false;
        }

        let address = normalize_address(&params.address, &self.config.stratum);
        let worker_id = normalize_worker_id(&session.to_string(), &params.worker_id);
        let key_ip = self.config.stratum.identity_includes_ip.then_some(ip);
        let key = WorkerKey::new(key_ip, address, worker_id);
        info!(session = %session, "Authorized worker: {} | IP address: {}", key, ip);

        let now = now_millis();
        let worker = match self.store.get_worker(&key.to_string()).await {
            Ok(Some(record)) => {
                info!(session = %session, "Returning worker {} (career {})", key, record.career);
                Worker::rehydrate(key, &record, &self.config, now)
            }
            Ok(None) => {
                info!(session = %session, "New worker {}", key);
                Worker::new(key, &self.config, now)
            }
            Err(e) => {
                error!(session = %session, "Failed to look up worker {}: {}", key, e);
                Worker::new(key, &self.config, now)
            }
        };

        match self.sessions.get_mut(&session) {
            Some(s) => {
                s.worker = Some(worker);
                true
            }
            None => false,
        }
    }

    /// Verify a submitted solution
    async fn submit(&mut self, session: SessionId, params: SubmitParams) -> (bool, AfterSubmit) {
        let freq_dayoff = self.config.lifecycle.freq_dayoff;
        let Some(s) = self.sessions.get_mut(&session) else {
            return (false, AfterSubmit::Nothing);
        };
        let nick = s.nick(freq_dayoff);
        let Some(worker) = s.worker.as_mut() else {
            return (false, AfterSubmit::Nothing);
        };

        if worker.status == WorkerStatus::Working {
            match self.jobs.state(params.job_id) {
                JobState::Unknown => {
                    debug!("{} | submit for unknown job({})", nick, params.job_id);
                    return (false, AfterSubmit::Nothing);
                }
                JobState::Solved => return (true, AfterSubmit::Nothing),
                JobState::Open => {}
            }
            let Some(job) = self.jobs.get(params.job_id).cloned() else {
                return (false, AfterSubmit::Nothing);
            };
            if !check_nonce(self.hasher.as_ref(), &job.prehash, params.nonce, &job.target) {
                error!("{} | received incorrect nonce {} for job({})", nick, params.nonce, job.id);
                self.give_warnings(session, 1).await;
                return (false, AfterSubmit::Nothing);
            }
            self.complete_real_job(&job, params, &nick).await;
            return (true, AfterSubmit::Nothing);
        }

        match worker.inspector.jobs.state(params.job_id) {
            JobState::Unknown => {
                debug!("{} | submit for unknown probation job({})", nick, params.job_id);
                return (false, AfterSubmit::Nothing);
            }
            JobState::Solved => return (true, AfterSubmit::Nothing),
            JobState::Open => {}
        }
        let verified = match worker.inspector.jobs.get(params.job_id) {
            Some(job) => check_nonce(self.hasher.as_ref(), &job.prehash, params.nonce, &job.target),
            None => false,
        };
        if !verified {
            error!("{} | received incorrect nonce {} for probation job({})", nick, params.nonce, params.job_id);
            self.give_warnings(session, 1).await;
            return (false, AfterSubmit::Nothing);
        }

        worker.inspector.record_solution(now_millis());
        debug!(
            "{} | estimated hashrate({}): {}",
            nick,
            worker.inspector.submits,
            format_hash_rate(worker.hashrate)
        );
        (true, AfterSubmit::Probation)
    }

    /// A real job was solved: hand the block over and start a new round
    async fn complete_real_job(&mut self, job: &Job, params: SubmitParams, nick: &str) {
        self.jobs.mark_solved(job.id);
        self.jobs.solve_all();

        let solved = SolvedWork::new((*job.block).clone(), job.prehash, params.nonce);
        info!(
            "{} | solved job({}) at height {}: block {}",
            nick, job.id, job.block.height, solved.hash
        );
        if let Err(e) = self.store.add_submit(&solved).await {
            error!("Failed to record submit {}: {}", solved.hash, e);
        }
        if let Err(e) = self.queue.publish_solved(solved.clone()).await {
            error!("Failed to publish solved block {}: {}", solved.hash, e);
        }

        let reward_base = self.new_round().await;
        let payout = PendingPayout {
            block_hash: solved.hash.to_hex(),
            height: solved.block.height,
            reward_base,
            transfers: Vec::new(),
            next_carryover: None,
            created_at: Utc::now(),
        };
        if let Err(e) = self.store.add_pending_payout(payout).await {
            error!("Failed to queue payout for {}: {}", solved.hash, e);
        }
    }

    /// Capture the reward base and zero every hash-share
    async fn new_round(&mut self) -> Vec<RewardShare> {
        let reward_base = match self.store.reward_base().await {
            Ok(base) => base,
            Err(e) => {
                error!("Failed to read reward base: {}", e);
                Vec::new()
            }
        };
        match self.store.reset_hashshare().await {
            Ok(round) => self.round = Some(round),
            Err(e) => error!("Failed to reset stored hash-shares: {}", e),
        }
        self.zero_hashshares();
        reward_base
    }

    fn zero_hashshares(&mut self) {
        for worker in self.sessions.values_mut().filter_map(|s| s.worker.as_mut()) {
            worker.hashshare = 0.0;
        }
    }

    /// Catch up with a round started by another engine on the same store, so
    /// stale hash-shares are not written back over the reset
    async fn sync_round(&mut self) {
        let round = match self.store.round().await {
            Ok(round) => round,
            Err(e) => {
                warn!("Failed to read reward round: {}", e);
                return;
            }
        };
        if let Some(known) = self.round {
            if round > known {
                info!("Reward round {} started elsewhere, resetting hash-shares", round);
                self.zero_hashshares();
            }
        }
        self.round = Some(round);
    }

    /// Advance the lifecycle after an accepted probation solution
    async fn keep_working_test(&mut self, session: SessionId) {
        let now = now_millis();
        let min_hashrate = self.config.lifecycle.min_hashrate;
        let freq_dayoff = self.config.lifecycle.freq_dayoff;
        let Some(s) = self.sessions.get_mut(&session) else {
            return;
        };
        let nick = s.nick(freq_dayoff);
        let Some(worker) = s.worker.as_mut() else {
            return;
        };

        let difficulty = worker.inspector.adjust();
        worker.measure(now, &self.config.fees);
        debug!("{} | next difficulty {:e}, hashrate {}", nick, difficulty, format_hash_rate(worker.hashrate));

        if worker.check_working_day(&self.config) {
            if worker.hashrate < min_hashrate {
                warn!("{} | hashrate {} below minimum", nick, format_hash_rate(worker.hashrate));
                self.give_warnings(session, self.config.blacklist.ban_penalty).await;
                return;
            }
            info!("{} | back to work at {}", nick, format_hash_rate(worker.hashrate));
            let handle = s.handle.clone();
            if let Some(job) = self.jobs.latest() {
                notify(&handle, random_index(), job);
            }
            return;
        }
        self.put_work_on_inspector(session);
    }

    /// Send the session a fresh probation job
    fn put_work_on_inspector(&mut self, session: SessionId) {
        let Some(s) = self.sessions.get_mut(&session) else {
            return;
        };
        let Some(worker) = s.worker.as_mut() else {
            return;
        };
        let job = worker.inspector.issue(now_millis());
        notify(&s.handle, random_index(), job);
    }

    /// Fan new chain work out to every worker
    pub async fn put_work(&mut self, work: WorkPackage) {
        if let Err(e) = self.store.put_work(&work).await {
            warn!("Failed to record work: {}", e);
        }

        self.jobs.solve_all();
        let difficulty = work.block.difficulty;
        let job = self
            .jobs
            .create(Arc::new(work.block), work.prehash, difficulty)
            .clone();
        info!(
            "New job({}) at height {} with target {}",
            job.id,
            job.block.height,
            wire_target_hex(job.difficulty)
        );

        let now = now_millis();
        let mut index = random_index();
        let freq_dayoff = self.config.lifecycle.freq_dayoff;
        let mut probation = Vec::new();
        for (id, session) in self.sessions.iter_mut() {
            let Some(worker) = session.worker.as_mut() else {
                continue;
            };
            if worker.status == WorkerStatus::Working {
                if worker.check_dayoff(freq_dayoff) {
                    debug!("{} | day-off", session.nick(freq_dayoff));
                    probation.push(*id);
                } else {
                    worker.measure(now, &self.config.fees);
                    index = index.wrapping_add(1);
                    notify(&session.handle, index, &job);
                }
            } else {
                probation.push(*id);
            }
        }
        for id in probation {
            self.put_work_on_inspector(id);
        }
    }

    /// Charge offenses to a session and ban it past the threshold
    pub async fn give_warnings(&mut self, session: SessionId, increment: u32) {
        let free_address = self.config.stratum.free_miner_address.clone();
        let Some(s) = self.sessions.get_mut(&session) else {
            return;
        };
        let ip = s.ip();
        let address = match s.worker.as_mut() {
            Some(worker) => {
                worker.invalid = worker.invalid.saturating_add(increment);
                Some(worker.key.address.clone())
            }
            None => None,
        };
        let invalid = s.worker.as_ref().map_or(0, |w| w.invalid);

        let mut keys = vec![ip.clone()];
        // the free-miner address is shared, so it is never scored
        if let Some(address) = address.as_ref().filter(|a| **a != free_address) {
            keys.push(address.clone());
        }
        for key in keys {
            match self.store.add_blacklist_score(&key, increment as f64).await {
                Ok(score) => self.blacklist.set(&key, score),
                Err(e) => error!("Failed to score {}: {}", key, e),
            }
        }

        if self.blacklist.is_banned(Some(&ip), address.as_deref(), invalid) {
            self.ban(session).await;
        }
    }

    /// Drop a session for misbehaviour
    async fn ban(&mut self, session: SessionId) {
        if let Some(s) = self.sessions.get(&session) {
            let ip = s.ip();
            error!(session = %session, "Banned invalid user of remote IP: {} | score: {}", ip, self.blacklist.score(&ip));
            s.handle.close();
        }
        self.close(session, "banned").await;
    }

    /// Forget a session, marking its worker offline in the store
    pub async fn close(&mut self, session: SessionId, reason: &str) {
        if self.has_worker(session) {
            self.sync_round().await;
        }
        let Some(s) = self.sessions.remove(&session) else {
            return;
        };
        let Some(worker) = s.worker else {
            return;
        };

        let key = worker.key.to_string();
        info!(session = %session, "Worker client closed: {} ({})", key, reason);
        if let Err(e) = self.store.put_workers(vec![worker.record(now_millis(), false)]).await {
            error!("Failed to store worker {}: {}", key, e);
        }
        if let Err(e) = self.store.off_worker(&key).await {
            error!("Failed to mark {} offline: {}", key, e);
        }
        let record = Disconnection {
            key,
            address: worker.key.address.clone(),
            worker_id: worker.key.worker_id.clone(),
            ip: Some(s.handle.peer.ip().to_string()),
            reason: reason.to_string(),
            at: Utc::now(),
        };
        if let Err(e) = self.store.add_disconnection(record).await {
            error!("Failed to record disconnection: {}", e);
        }
    }

    /// Publish a snapshot of every live worker
    pub async fn release_data(&mut self) {
        self.sync_round().await;
        let now = now_millis();
        let mut records = Vec::new();
        let (mut total, mut working, mut working_count) = (0.0, 0.0, 0);
        for worker in self.sessions.values().filter_map(|s| s.worker.as_ref()) {
            total += worker.hashrate;
            if worker.status == WorkerStatus::Working {
                working += worker.hashrate;
                working_count += 1;
            }
            records.push(worker.record(now, true));
        }

        info!(
            "total({}): {} | working({}): {}",
            records.len(),
            format_hash_rate(total),
            working_count,
            format_hash_rate(working)
        );
        if records.is_empty() {
            return;
        }
        if let Err(e) = self.store.put_workers(records).await {
            error!("Failed to release worker data: {}", e);
        }
    }

    /// Reload persisted scores and drop sessions that are now banned
    pub async fn patrol_blacklist(&mut self) {
        match self.store.blacklist().await {
            Ok(scores) => self.blacklist.replace(scores),
            Err(e) => {
                error!("Failed to load blacklist: {}", e);
                return;
            }
        }

        let banned: Vec<SessionId> = self
            .sessions
            .iter()
            .filter(|(_, s)| {
                let address = s.worker.as_ref().map(|w| w.key.address.as_str());
                let invalid = s.worker.as_ref().map_or(0, |w| w.invalid);
                self.blacklist.is_banned(Some(&s.ip()), address, invalid)
            })
            .map(|(id, _)| *id)
            .collect();
        for session in banned {
            self.ban(session).await;
        }
    }

    async fn shutdown(&mut self) {
        let sessions: Vec<SessionId> = self.sessions.keys().copied().collect();
        for session in sessions {
            if let Some(s) = self.sessions.get(&session) {
                s.handle.close();
            }
            self.close(session, "pool shutdown").await;
        }
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    fn has_worker(&self, session: SessionId) -> bool {
        self.sessions
            .get(&session)
            .is_some_and(|s| s.worker.is_some())
    }

    /// The worker bound to a session
    pub fn worker(&self, session: SessionId) -> Option<&Worker> {
        self.sessions.get(&session).and_then(|s| s.worker.as_ref())
    }

    pub fn worker_mut(&mut self, session: SessionId) -> Option<&mut Worker> {
        self.sessions.get_mut(&session).and_then(|s| s.worker.as_mut())
    }

    /// The newest real job
    pub fn current_job(&self) -> Option<&Job> {
        self.jobs.latest()
    }
}

fn random_index() -> u32 {
    rand::rng().random_range(0..NOTIFY_INDEX_RANGE)
}

fn respond(handle: &SessionHandle, response: StratumResponse) {
    match response.to_line() {
        Ok(line) => {
            handle.send_line(line);
        }
        Err(e) => error!(session = %handle.id, "Failed to encode response: {}", e),
    }
}

fn notify(handle: &SessionHandle, index: u32, job: &Job) {
    let notification = NotifyParams {
        index,
        prehash_hex: job.prehash.to_hex(),
        target_hex: wire_target_hex(job.difficulty),
        job_id: job.id,
    }
    .into_notification();
    match notification.to_line() {
        Ok(line) => {
            if handle.send_line(line) {
                debug!(session = %handle.id, "Put job({})", job.id);
            } else {
                error!(session = %handle.id, "Put job({}) failed", job.id);
            }
        }
        Err(e) => error!(session = %handle.id, "Failed to encode job({}): {}", job.id, e),
    }
}
