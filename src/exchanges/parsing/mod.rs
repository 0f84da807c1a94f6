//! Inbound frame decoding
//!
//! A decode failure is local to one frame: the read loop logs it and moves
//! on to the next frame.

pub mod binance;

pub use binance::BinanceParser;

use crate::core::MarketEvent;

/// Classified upstream frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundFrame {
    /// Market data to republish
    Event(MarketEvent),
    /// Acknowledgement of a control request
    SubscriptionAck { id: u64 },
    /// Exchange rejected a control request
    ExchangeError {
        id: Option<u64>,
        code: i64,
        message: String,
    },
}

/// Per-frame decode errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    #[error("Malformed JSON: {0}")]
    Json(String),

    #[error("Event has no symbol")]
    MissingSymbol,

    #[error("Unrecognized frame")]
    UnknownFrame,
}
