//! Upstream WebSocket transport and subscription batching

pub mod connection;
pub mod subscription;

pub use connection::{ConnectionState, FrameTransport, WebSocketConnection, WebSocketError};
pub use subscription::{
    plan_batches, KlineInterval, SubscriptionBatch, SubscriptionError, SubscriptionLedger,
    SubscriptionReport, SubscriptionStatus,
};
