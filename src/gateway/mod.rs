//! Streaming gateway
//!
//! - Registry: connection id -> subscribed topics, behind a reader/writer lock
//! - Protocol + session: per-client SUBSCRIBE/UNSUBSCRIBE handling
//! - Fan-out: one pattern subscription to the bus, concurrent delivery
//!   joined per message
//! - Server: axum router with the client WebSocket endpoint

pub mod fanout;
pub mod protocol;
pub mod registry;
pub mod server;
pub mod session;

pub use fanout::{DispatchReport, FanoutListener, FanoutSettings};
pub use protocol::{ControlFrame, ControlMethod, ProtocolError};
pub use registry::{ConnectionHandle, ConnectionId, ConnectionRegistry};
pub use server::{create_router, GatewayState};
pub use session::{SessionHandler, SessionState};

use bytes::Bytes;
use std::future::Future;

/// Write side of one client connection
pub trait ClientSink: Send + Sync + 'static {
    /// Write one payload to the client
    fn deliver(&self, payload: Bytes) -> impl Future<Output = Result<(), DeliveryError>> + Send;

    /// Close the client transport. Errors are ignored.
    fn close(&self) -> impl Future<Output = ()> + Send;
}

/// A failed write to one client
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DeliveryError {
    #[error("Write timed out")]
    Timeout,

    #[error("Write failed: {0}")]
    Write(String),

    #[error("Connection closed")]
    Closed,

    #[error("Sink panicked")]
    Panicked,
}
