//! Stratum session identity and outbound channel

use std::net::SocketAddr;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use uuid::Uuid;

/// Lines queued for a connection before it counts as stalled
pub const OUTBOX_CAPACITY: usize = 256;

/// Session ID type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId(Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Simple (hyphen-free) form, as sent to miners on subscribe
    pub fn to_simple(&self) -> String {
        self.0.simple().to_string()
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.simple())
    }
}

/// Instruction for a connection's writer task
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    /// One JSON line, without the trailing newline
    Line(String),
    /// Flush and drop the connection
    Close,
}

/// The engine's end of a live connection.
///
/// The outbox is bounded. A miner that stops reading fills it, and the
/// handle then cancels `stalled` so the connection task drops the socket.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    pub id: SessionId,
    pub peer: SocketAddr,
    outbox: mpsc::Sender<Outbound>,
    stalled: CancellationToken,
}

impl SessionHandle {
    pub fn new(id: SessionId, peer: SocketAddr, outbox: mpsc::Sender<Outbound>) -> Self {
        Self {
            id,
            peer,
            outbox,
            stalled: CancellationToken::new(),
        }
    }

    /// Cancelled once the miner has stopped draining its outbox
    pub fn stalled(&self) -> CancellationToken {
        self.stalled.clone()
    }

    fn push(&self, outbound: Outbound) -> bool {
        match self.outbox.try_send(outbound) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                warn!(session = %self.id, "Outbox full, dropping {}", self.peer);
                self.stalled.cancel();
                false
            }
            Err(TrySendError::Closed(_)) => {
                debug!(session = %self.id, "Dropped line for closed session");
                false
            }
        }
    }

    /// Queue a line for the miner. Returns false once the connection is gone
    /// or stalled.
    pub fn send_line(&self, line: String) -> bool {
        self.push(Outbound::Line(line))
    }

    /// Ask the writer to close the connection
    pub fn close(&self) {
        self.push(Outbound::Close);
    }

    pub fn is_closed(&self) -> bool {
        self.outbox.is_closed() || self.stalled.is_cancelled()
    }
}
