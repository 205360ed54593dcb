//! Integration tests for the engine: probation, real work, scoring and bans

mod common;

use common::{address, fast_config, work, Notified, TestMiner};
use mining_pool::core::{check_nonce, wire_target_hex, Blake2sPow, Nonce, Target};
use mining_pool::pool::{PoolEngine, WorkerStatus};
use mining_pool::queue::{LocalQueue, WorkQueue};
use mining_pool::store::{MemoryStore, PoolStore};
use mining_pool::PoolConfig;
use serde_json::json;
use std::sync::Arc;

struct Harness {
    engine: PoolEngine,
    store: Arc<MemoryStore>,
    queue: Arc<LocalQueue>,
}

fn harness(config: PoolConfig) -> Harness {
    let store = Arc::new(MemoryStore::new());
    let queue = Arc::new(LocalQueue::new());
    let engine = PoolEngine::new(
        Arc::new(config),
        store.clone(),
        queue.clone(),
        Arc::new(Blake2sPow),
    );
    Harness {
        engine,
        store,
        queue,
    }
}

async fn authorized(engine: &mut PoolEngine, peer: &str, worker: &str) -> TestMiner {
    let mut miner = TestMiner::connect(engine, peer).await;
    let subscribed = miner.request(engine, "mining.subscribe", json!([])).await;
    assert_eq!(subscribed["result"][0], json!(miner.session.to_simple()));
    assert_eq!(subscribed["result"][3], json!(4));

    let authorized = miner
        .request(engine, "mining.authorize", json!([address(1), worker]))
        .await;
    assert_eq!(authorized["result"], json!(true));
    miner
}

/// Solve probation jobs until the worker is admitted to real work
async fn promote(engine: &mut PoolEngine, miner: &mut TestMiner) {
    for _ in 0..10 {
        if engine.worker(miner.session).unwrap().status == WorkerStatus::Working {
            return;
        }
        let (_, accepted) = miner.solve_latest(engine).await;
        assert_eq!(accepted, json!(true));
    }
    panic!("worker never reached working status");
}

fn bad_nonce(job: &Notified) -> Nonce {
    (0..)
        .map(Nonce)
        .find(|&nonce| !check_nonce(&Blake2sPow, &job.prehash, nonce, &job.target))
        .unwrap()
}

#[tokio::test]
async fn test_probation_leads_to_real_work() {
    let Harness {
        mut engine, store, queue,
    } = harness(fast_config());
    let mut solved_rx = queue.subscribe_solved();
    engine.put_work(work(100, 1.0 / 64.0)).await;
    let real_job = engine.current_job().unwrap().clone();

    let mut miner = authorized(&mut engine, "10.0.0.1:4000", "rig1").await;
    assert_eq!(engine.worker(miner.session).unwrap().status, WorkerStatus::Intern);

    for _ in 0..2 {
        let (job, accepted) = miner.solve_latest(&mut engine).await;
        assert_ne!(job.prehash, real_job.prehash);
        assert_eq!(accepted, json!(true));
    }
    assert_eq!(
        engine.worker(miner.session).unwrap().status,
        WorkerStatus::OnInterview
    );

    promote(&mut engine, &mut miner).await;
    let worker = engine.worker(miner.session).unwrap();
    assert!(worker.hashrate > 0.0);

    // admission hands out the current real job
    let (job, accepted) = miner.solve_latest(&mut engine).await;
    assert_eq!(job.job_id, real_job.id);
    assert_eq!(job.prehash, real_job.prehash);
    assert_eq!(
        job.target,
        Target::from_wire_hex(&wire_target_hex(real_job.difficulty)).unwrap()
    );
    assert_eq!(accepted, json!(true));

    let solved = solved_rx.try_recv().unwrap();
    assert_eq!(solved.block.height, 100);
    let pending = store.pending_payouts().await.unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].block_hash, solved.hash.to_hex());
    assert_eq!(engine.worker(miner.session).unwrap().hashshare, 0.0);
}

#[tokio::test]
async fn test_solving_twice_triggers_side_effects_once() {
    let Harness {
        mut engine, store, queue,
    } = harness(fast_config());
    let mut solved_rx = queue.subscribe_solved();
    engine.put_work(work(7, 1.0 / 64.0)).await;

    let mut miner = authorized(&mut engine, "10.0.0.2:4000", "rig").await;
    promote(&mut engine, &mut miner).await;

    let job = miner.latest_job().unwrap();
    let nonce = common::solve(&job);
    assert_eq!(miner.submit(&mut engine, job.job_id, nonce).await, json!(true));
    assert_eq!(miner.submit(&mut engine, job.job_id, nonce).await, json!(true));

    assert!(solved_rx.try_recv().is_ok());
    assert!(solved_rx.try_recv().is_err());
    assert_eq!(store.pending_payouts().await.unwrap().len(), 1);
    assert_eq!(engine.worker(miner.session).unwrap().invalid, 0);
}

#[tokio::test]
async fn test_evicted_jobs_are_unknown() {
    let Harness { mut engine, .. } = harness(fast_config());
    engine.put_work(work(1, 1.0 / 64.0)).await;
    let first = engine.current_job().unwrap().clone();

    let mut miner = authorized(&mut engine, "10.0.0.3:4000", "rig").await;
    promote(&mut engine, &mut miner).await;

    for height in 2..=11 {
        engine.put_work(work(height, 1.0 / 64.0)).await;
    }
    let second_id = first.id + 1;

    let evicted = Notified {
        job_id: first.id,
        prehash: first.prehash,
        target: first.target,
    };
    let nonce = common::solve(&evicted);
    // gone from the ring
    assert_eq!(miner.submit(&mut engine, first.id, nonce).await, json!(false));
    // superseded but remembered
    assert_eq!(miner.submit(&mut engine, second_id, nonce).await, json!(true));
    assert_eq!(engine.worker(miner.session).unwrap().invalid, 0);
}

#[tokio::test]
async fn test_bad_nonce_is_scored() {
    let Harness {
        mut engine, store, ..
    } = harness(fast_config());
    let mut miner = authorized(&mut engine, "10.0.0.4:4000", "rig").await;

    let job = miner.latest_job().unwrap();
    let result = miner.submit(&mut engine, job.job_id, bad_nonce(&job)).await;
    assert_eq!(result, json!(false));
    assert_eq!(engine.worker(miner.session).unwrap().invalid, 1);

    let scores = store.blacklist().await.unwrap();
    assert_eq!(scores["10.0.0.4"], 1.0);
    assert_eq!(scores[&address(1)], 1.0);

    // unknown job ids are ignored without a penalty
    assert_eq!(miner.submit(&mut engine, 9_999, Nonce(1)).await, json!(false));
    assert_eq!(engine.worker(miner.session).unwrap().invalid, 1);
}

#[tokio::test]
async fn test_repeat_offender_is_banned_and_refused() {
    let Harness { mut engine, .. } = harness(fast_config());
    let mut miner = authorized(&mut engine, "10.0.0.5:4000", "rig").await;
    let job = miner.latest_job().unwrap();
    let nonce = bad_nonce(&job);

    for _ in 0..31 {
        if engine.session_count() == 0 {
            break;
        }
        miner.submit(&mut engine, job.job_id, nonce).await;
    }
    assert_eq!(engine.session_count(), 0);
    assert!(miner.was_closed());

    let mut again = TestMiner::connect(&mut engine, "10.0.0.5:4001").await;
    assert_eq!(engine.session_count(), 0);
    assert_eq!(again.drain(), vec![json!("close")]);
}

#[tokio::test]
async fn test_protocol_errors() {
    let Harness { mut engine, .. } = harness(fast_config());
    let mut miner = TestMiner::connect(&mut engine, "10.0.0.6:4000").await;

    let unknown = miner.request(&mut engine, "mining.extranonce.subscribe", json!([])).await;
    assert_eq!(unknown["error"], json!([-3, "Method not found", null]));

    let bad = miner.request(&mut engine, "mining.authorize", json!({})).await;
    assert_eq!(bad["error"][0], json!(20));

    // submitting before authorizing is refused
    let early = miner
        .request(&mut engine, "mining.submit", json!(["1", "0000000000000000", ""]))
        .await;
    assert_eq!(early["result"], json!(false));
}

#[tokio::test]
async fn test_identity_normalisation() {
    let Harness { mut engine, .. } = harness(fast_config());
    let mut miner = TestMiner::connect(&mut engine, "10.0.0.7:4000").await;
    let authorized = miner
        .request(&mut engine, "mining.authorize", json!(["not-an-address", ""]))
        .await;
    assert_eq!(authorized["result"], json!(true));

    let key = &engine.worker(miner.session).unwrap().key;
    assert_eq!(key.address, fast_config().stratum.free_miner_address);
    assert_eq!(key.worker_id.as_str(), &miner.session.to_simple()[..12]);
    assert_eq!(
        key.to_string(),
        format!("10.0.0.7_{}_{}", key.address, key.worker_id)
    );
}

#[tokio::test]
async fn test_returning_worker_keeps_contribution() {
    let Harness {
        mut engine, store, ..
    } = harness(fast_config());
    engine.put_work(work(1, 1.0 / 64.0)).await;
    let mut miner = authorized(&mut engine, "10.0.0.8:4000", "rig").await;
    promote(&mut engine, &mut miner).await;
    engine.put_work(work(2, 1.0 / 64.0)).await;

    engine.worker_mut(miner.session).unwrap().hashshare = 1234.0;
    engine.release_data().await;
    let key = engine.worker(miner.session).unwrap().key.to_string();
    assert!(store.get_worker(&key).await.unwrap().unwrap().alive);

    engine.close(miner.session, "test").await;
    let record = store.get_worker(&key).await.unwrap().unwrap();
    assert!(!record.alive);
    assert_eq!(record.career, 1);

    let back = authorized(&mut engine, "10.0.0.8:4001", "rig").await;
    let worker = engine.worker(back.session).unwrap();
    assert_eq!(worker.status, WorkerStatus::Intern);
    assert_eq!(worker.career, 1);
    assert_eq!(worker.hashshare, 1234.0);
}

#[tokio::test]
async fn test_notify_carries_little_endian_target() {
    let Harness { mut engine, .. } = harness(fast_config());
    engine.put_work(work(3, 0.5)).await;
    let mut miner = authorized(&mut engine, "10.0.0.9:4000", "rig").await;
    promote(&mut engine, &mut miner).await;
    miner.drain();

    engine.put_work(work(4, 0.5)).await;
    let notify = miner
        .drain()
        .into_iter()
        .find(|line| line["method"] == "mining.notify")
        .unwrap();
    assert_eq!(notify["params"][2], json!("ffffffffffffff7f"));
}

#[tokio::test]
async fn test_working_day_off_cycle() {
    let mut config = fast_config();
    config.lifecycle.freq_dayoff = 3;
    config.lifecycle.num_dayoff_problems = 1;
    let Harness { mut engine, .. } = harness(config);
    engine.put_work(work(1, 1.0 / 64.0)).await;
    let mut miner = authorized(&mut engine, "10.0.0.10:4000", "rig").await;
    promote(&mut engine, &mut miner).await;
    miner.latest_job();

    // the first dispatches of real work go straight to the miner
    for height in 2..=3 {
        let package = work(height, 1.0 / 64.0);
        let prehash = package.prehash;
        engine.put_work(package).await;
        assert_eq!(miner.latest_job().unwrap().prehash, prehash);
        assert_eq!(engine.worker(miner.session).unwrap().status, WorkerStatus::Working);
    }

    // the third one sends the worker on a day off with a probation job
    let package = work(4, 1.0 / 64.0);
    let real_prehash = package.prehash;
    engine.put_work(package).await;
    assert_eq!(engine.worker(miner.session).unwrap().status, WorkerStatus::Dayoff);
    let probation = miner.latest_job().unwrap();
    assert_ne!(probation.prehash, real_prehash);

    // solving it puts the worker back on real work
    let nonce = common::solve(&probation);
    assert_eq!(miner.submit(&mut engine, probation.job_id, nonce).await, json!(true));
    assert_eq!(engine.worker(miner.session).unwrap().status, WorkerStatus::Working);
    let resumed = miner.latest_job().unwrap();
    assert_eq!(resumed.prehash, real_prehash);
    assert_eq!(resumed.job_id, engine.current_job().unwrap().id);
}

#[tokio::test]
async fn test_round_started_elsewhere_resets_hashshare() {
    let Harness {
        mut engine, store, ..
    } = harness(fast_config());
    let miner = authorized(&mut engine, "10.0.0.11:4000", "rig").await;
    let key = engine.worker(miner.session).unwrap().key.to_string();

    engine.worker_mut(miner.session).unwrap().hashshare = 500.0;
    engine.release_data().await;
    assert_eq!(store.get_worker(&key).await.unwrap().unwrap().hashshare, 500.0);

    // another engine on the same store found a block
    store.reset_hashshare().await.unwrap();

    engine.release_data().await;
    assert_eq!(engine.worker(miner.session).unwrap().hashshare, 0.0);
    assert_eq!(store.get_worker(&key).await.unwrap().unwrap().hashshare, 0.0);

    store.reset_hashshare().await.unwrap();
    engine.worker_mut(miner.session).unwrap().hashshare = 40.0;
    engine.close(miner.session, "test").await;
    assert_eq!(store.get_worker(&key).await.unwrap().unwrap().hashshare, 0.0);
}
