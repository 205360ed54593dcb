//! Stratum TCP server
//!
//! Each connection gets a reader loop and a writer task. The reader frames
//! lines and forwards them to the engine as [`EngineEvent`]s; the writer
//! drains the session's outbox. Neither touches pool state.

use super::protocol::StratumRequest;
use super::session::{Outbound, SessionHandle, SessionId, OUTBOX_CAPACITY};
use crate::config::StratumConfig;
use crate::pool::engine::EngineEvent;
use crate::{Error, Result};
use futures::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_util::codec::{Framed, LinesCodec};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Longest line accepted from a miner
const MAX_LINE_LENGTH: usize = 16 * 1024;

/// Stratum server for mining clients
pub struct StratumServer {
    listener: TcpListener,
    max_connections: usize,
    events: mpsc::Sender<EngineEvent>,
    active: Arc<AtomicUsize>,
}

impl StratumServer {
    /// Bind the listening socket
    pub async fn bind(
        addr: SocketAddr,
        config: &StratumConfig,
        events: mpsc::Sender<EngineEvent>,
    ) -> Result<Self> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| Error::network(format!("Failed to bind to {}: {}", addr, e)))?;
        info!("Stratum server listening on {}", listener.local_addr()?);

        Ok(Self {
            listener,
            max_connections: config.max_connections,
            events,
            active: Arc::new(AtomicUsize::new(0)),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept connections until cancelled
    pub async fn run(self, cancel: CancellationToken) -> Result<()> {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("Shutting down Stratum server");
                    break;
                }
                accepted = self.listener.accept() => {
                    let (stream, peer) = match accepted {
                        Ok(accepted) => accepted,
                        Err(e) => {
                            warn!("Failed to accept connection: {}", e);
                            continue;
                        }
                    };

                    if self.active.load(Ordering::Relaxed) >= self.max_connections {
                        warn!("Max connections reached, rejecting {}", peer);
                        continue;
                    }

                    let events = self.events.clone();
                    let active = Arc::clone(&self.active);
                    let cancel = cancel.child_token();
                    active.fetch_add(1, Ordering::Relaxed);
                    tokio::spawn(async move {
                        if let Err(e) = handle_connection(stream, peer, events, cancel).await {
                            debug!("Connection {} ended with error: {}", peer, e);
                        }
                        active.fetch_sub(1, Ordering::Relaxed);
                    });
                }
            }
        }
        Ok(())
    }
}

/// Drive one miner connection until either side closes it
async fn handle_connection(
    stream: TcpStream,
    peer: SocketAddr,
    events: mpsc::Sender<EngineEvent>,
    cancel: CancellationToken,
) -> Result<()> {
    let _ = stream.set_nodelay(true);
    let framed = Framed::new(stream, LinesCodec::new_with_max_length(MAX_LINE_LENGTH));
    let (mut sink, mut lines) = framed.split();

    let id = SessionId::new();
    let (outbox, mut outbox_rx) = mpsc::channel(OUTBOX_CAPACITY);
    let handle = SessionHandle::new(id, peer, outbox);
    let stalled = handle.stalled();
    info!(session = %id, "New connection from {}", peer);

    events
        .send(EngineEvent::Connected(handle))
        .await
        .map_err(|_| Error::invalid_state("Engine stopped"))?;

    let mut writer = tokio::spawn(async move {
        while let Some(outbound) = outbox_rx.recv().await {
            match outbound {
                Outbound::Line(line) => {
                    if let Err(e) = sink.send(line).await {
                        debug!(session = %id, "Write failed: {}", e);
                        break;
                    }
                }
                Outbound::Close => break,
            }
        }
        let _ = sink.close().await;
    });

    let reason = loop {
        tokio::select! {
            _ = cancel.cancelled() => break "server shutdown".to_string(),
            _ = stalled.cancelled() => break "not reading".to_string(),
            _ = &mut writer => break "closed by pool".to_string(),
            line = lines.next() => {
                let event = match line {
                    Some(Ok(line)) if line.trim().is_empty() => continue,
                    Some(Ok(line)) => match StratumRequest::from_json(&line) {
                        Ok(request) => EngineEvent::Request { session: id, request },
                        Err(e) => EngineEvent::Malformed { session: id, error: e.to_string() },
                    },
                    Some(Err(e)) => {
                        error!(session = %id, "Read error from {}: {}", peer, e);
                        break format!("read error: {}", e);
                    }
                    None => break "client disconnected".to_string(),
                };
                if events.send(event).await.is_err() {
                    break "engine stopped".to_string();
                }
            }
        }
    };

    info!(session = %id, "Connection from {} closed: {}", peer, reason);
    writer.abort();
    let _ = events
        .send(EngineEvent::Disconnected { session: id, reason })
        .await;
    Ok(())
}
