//! Market data types
//!
//! A `MarketEvent` is what the ingestion side republishes: a routing symbol
//! plus the raw, unmodified wire bytes of the upstream frame. The gateway
//! never reinterprets the payload.

use super::{Symbol, Topic};
use bytes::Bytes;

/// Decoded upstream event
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MarketEvent {
    /// Instrument the event belongs to
    pub symbol: Symbol,
    /// Exchange event type (e.g. `kline`), if present
    pub event_type: Option<String>,
    /// Exchange event time (Unix millis), if present
    pub event_time: Option<u64>,
    /// Raw frame bytes, forwarded verbatim
    pub payload: Bytes,
}

impl MarketEvent {
    pub fn new(symbol: Symbol, payload: Bytes) -> Self {
        Self {
            symbol,
            event_type: None,
            event_time: None,
            payload,
        }
    }

    /// Bus topic the event is published on
    #[inline]
    pub fn topic(&self) -> Topic {
        self.symbol.topic()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_topic_is_uppercase_symbol() {
        let event = MarketEvent::new(
            Symbol::new("bnbusdt").unwrap(),
            Bytes::from_static(b"{}"),
        );
        assert_eq!(event.topic().as_str(), "BNBUSDT");
        assert!(event.event_type.is_none());
    }
}
