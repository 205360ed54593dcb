//! Stratum transport: JSON-RPC messages, sessions and the TCP server

pub mod protocol;
pub mod server;
pub mod session;

pub use protocol::{
    AuthorizeParams, NotifyParams, StratumErrorCode, StratumMethod, StratumNotification,
    StratumRequest, StratumResponse, SubmitParams,
};
pub use server::StratumServer;
pub use session::{Outbound, SessionHandle, SessionId, OUTBOX_CAPACITY};
