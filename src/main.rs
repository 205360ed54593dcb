//! Mining Pool - Main Application
//!
//! Runs the stratum engine together with the collector, work poller, block
//! submitter and, when enabled, the payout processor and the stats API.

use anyhow::Context;
use clap::Parser;
use mining_pool::{
    api,
    config::{Args, PoolConfig},
    core::Blake2sPow,
    node::{ChainNode, HttpNode},
    pool::{BlockSubmitter, Collector, PayoutProcessor, PoolEngine, WorkPoller},
    queue::{LocalQueue, WorkQueue},
    store::{memory::run_flush_loop, MemoryStore, PoolStore},
    stratum::StratumServer,
    utils::init_logging,
    wallet::{Ed25519Signer, TxSigner},
    APP_NAME, APP_VERSION,
};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Connection events buffered before connection tasks wait on the engine
const EVENT_BUFFER: usize = 4096;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    if args.generate_key {
        return generate_and_print_seed();
    }

    let config = PoolConfig::load(&args).context("Failed to load configuration")?;

    if args.print_config {
        println!("{}", config.to_yaml()?);
        return Ok(());
    }

    let _log_guard = init_logging(&config.logging)?;
    info!("Starting {} v{}", APP_NAME, APP_VERSION);

    run(Arc::new(config)).await
}

async fn run(config: Arc<PoolConfig>) -> anyhow::Result<()> {
    let store: Arc<dyn PoolStore> = match &config.store.path {
        Some(path) => Arc::new(
            MemoryStore::open(path)
                .with_context(|| format!("Failed to open store {}", path.display()))?,
        ),
        None => {
            warn!("No store path configured, pool state is kept in memory only");
            Arc::new(MemoryStore::new())
        }
    };
    let queue: Arc<dyn WorkQueue> = Arc::new(LocalQueue::new());
    let node: Arc<dyn ChainNode> = Arc::new(HttpNode::new(&config.node)?);

    let signer: Option<Arc<dyn TxSigner>> = if config.banker.enabled {
        let seed = config
            .banker
            .wallet_seed
            .as_deref()
            .context("Payouts are enabled but no wallet seed is configured")?;
        let signer: Arc<dyn TxSigner> = Arc::new(Ed25519Signer::from_hex_seed(seed)?);
        Some(signer)
    } else {
        None
    };

    let cancel = CancellationToken::new();
    let mut tasks = JoinSet::new();

    // consumers subscribe before the poller publishes anything
    let (events_tx, events_rx) = mpsc::channel(EVENT_BUFFER);
    let engine = PoolEngine::new(
        config.clone(),
        store.clone(),
        queue.clone(),
        Arc::new(Blake2sPow),
    );
    let submitter = BlockSubmitter::new(config.clone(), store.clone(), queue.as_ref(), node.clone());

    let server = StratumServer::bind(config.stratum_socket_addr()?, &config.stratum, events_tx).await?;

    tasks.spawn(engine.run(events_rx, cancel.clone()));
    tasks.spawn({
        let cancel = cancel.clone();
        async move { server.run(cancel).await }
    });
    tasks.spawn({
        let cancel = cancel.clone();
        async move {
            submitter.run(cancel).await;
            Ok(())
        }
    });
    tasks.spawn({
        let collector = Collector::new(config.clone(), store.clone());
        let cancel = cancel.clone();
        async move {
            collector.run(cancel).await;
            Ok(())
        }
    });
    tasks.spawn({
        let poller = WorkPoller::new(config.clone(), node.clone(), queue.clone(), store.clone());
        let cancel = cancel.clone();
        async move {
            poller.run(cancel).await;
            Ok(())
        }
    });
    tasks.spawn({
        let store = store.clone();
        let interval = config.intervals.store_flush;
        let cancel = cancel.clone();
        async move {
            run_flush_loop(store, interval, cancel).await;
            Ok(())
        }
    });

    if let Some(signer) = signer {
        let banker = PayoutProcessor::new(config.clone(), store.clone(), node.clone(), signer);
        let cancel = cancel.clone();
        tasks.spawn(async move {
            banker.run(cancel).await;
            Ok(())
        });
    } else {
        info!("Payouts disabled");
    }

    if config.api.enabled {
        let addr = config.api_socket_addr()?;
        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .with_context(|| format!("Failed to bind stats API to {}", addr))?;
        tasks.spawn(api::serve(listener, store.clone(), cancel.clone()));
    }

    tokio::select! {
        _ = tokio::signal::ctrl_c() => info!("Received shutdown signal"),
        Some(joined) = tasks.join_next() => {
            match joined {
                Ok(Ok(())) => warn!("A pool component stopped unexpectedly"),
                Ok(Err(e)) => error!("A pool component failed: {}", e),
                Err(e) => error!("A pool component panicked: {}", e),
            }
        }
    }

    cancel.cancel();
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok(Err(e)) => error!("Error during shutdown: {}", e),
            Err(e) => error!("Task failed during shutdown: {}", e),
            Ok(Ok(())) => {}
        }
    }

    store.flush().await?;
    info!("Pool stopped");
    Ok(())
}

/// Generate and print a new payout wallet seed
fn generate_and_print_seed() -> anyhow::Result<()> {
    let seed = Ed25519Signer::generate_seed_hex();
    let signer = Ed25519Signer::from_hex_seed(&seed)?;
    println!("seed:    {}", seed);
    println!("address: {}", signer.address());
    println!();
    println!("IMPORTANT: Keep your seed secure!");
    println!("Set it as banker.wallet_seed to pay miners from this account.");
    Ok(())
}
