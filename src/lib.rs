//! Real-time market-data fan-out
//!
//! Two roles over a shared pub/sub bus:
//! - ingestion worker: discover symbols, subscribe kline streams upstream,
//!   republish every event under its symbol topic
//! - streaming gateway: accept client WebSockets, track per-client topic
//!   subscriptions, fan bus messages out to interested clients

pub mod bus;
pub mod core;
pub mod engine;
pub mod exchanges;
pub mod gateway;
pub mod infrastructure;
pub mod ws;

#[cfg(test)]
pub mod test_utils;

// Re-export commonly used types
pub use infrastructure::config::Config;

use thiserror::Error;

/// Main error type
#[derive(Error, Debug)]
pub enum FanoutError {
    #[error("Symbol discovery failed: {0}")]
    Discovery(#[from] core::DiscoveryError),

    #[error(transparent)]
    Subscription(#[from] ws::SubscriptionError),

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] ws::WebSocketError),

    #[error("Bus error: {0}")]
    Bus(#[from] bus::BusError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias
pub type Result<T> = std::result::Result<T, FanoutError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_library_errors_convert() {
        let err: FanoutError = crate::core::DiscoveryError::NoSymbols.into();
        assert_eq!(err.to_string(), "Symbol discovery failed: No symbols found");

        let err: FanoutError = crate::bus::BusError::Closed.into();
        assert!(matches!(err, FanoutError::Bus(crate::bus::BusError::Closed)));

        let err: FanoutError = crate::ws::SubscriptionError::InvalidDelay.into();
        assert_eq!(err.to_string(), "Inter-batch delay must be greater than zero");
    }
}
