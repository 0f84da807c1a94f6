//! Binance stream frame decoder
//!
//! Decodes only what routing needs: the instrument symbol (nested under
//! `data.s` for combined streams, top-level `s` for raw streams), plus
//! event type and time for logging. The payload itself is kept as the
//! original bytes.

use super::{DecodeError, InboundFrame};
use crate::core::{MarketEvent, Symbol};
use bytes::Bytes;
use serde::Deserialize;
use std::borrow::Cow;

/// Binance message decoder
pub struct BinanceParser;

impl BinanceParser {
    /// Classify and decode one inbound frame
    ///
    /// Combined stream event:
    /// {
    ///   "stream": "btcusdt@kline_1s",
    ///   "data": { "e": "kline", "E": 1672515782136, "s": "BTCUSDT", "k": { ... } }
    /// }
    ///
    /// Subscription ack: `{"result": null, "id": 1}`
    /// Request error: `{"error": {"code": 2, "msg": "..."}, "id": 1}` or
    /// `{"code": 2, "msg": "...", "id": 1}`
    pub fn decode(frame: &Bytes) -> Result<InboundFrame, DecodeError> {
        let raw: RawFrame<'_> =
            serde_json::from_slice(frame).map_err(|e| DecodeError::Json(e.to_string()))?;

        if let Some(body) = raw.data {
            return Self::event(body, frame);
        }

        if raw.body.symbol.is_some() {
            return Self::event(raw.body, frame);
        }

        if let Some(error) = raw.error {
            return Ok(InboundFrame::ExchangeError {
                id: raw.id,
                code: error.code,
                message: error.msg,
            });
        }

        if let (Some(code), Some(msg)) = (raw.code, raw.msg) {
            return Ok(InboundFrame::ExchangeError {
                id: raw.id,
                code,
                message: msg,
            });
        }

        match raw.id {
            Some(id) => Ok(InboundFrame::SubscriptionAck { id }),
            None => Err(DecodeError::UnknownFrame),
        }
    }

    fn event(body: EventBody<'_>, frame: &Bytes) -> Result<InboundFrame, DecodeError> {
        let symbol = body
            .symbol
            .as_deref()
            .and_then(Symbol::new)
            .ok_or(DecodeError::MissingSymbol)?;

        Ok(InboundFrame::Event(MarketEvent {
            symbol,
            event_type: body.event_type.map(Cow::into_owned),
            event_time: body.event_time,
            payload: frame.clone(),
        }))
    }
}

/// Envelope fields, all optional; classification happens after parsing
#[derive(Debug, Deserialize)]
struct RawFrame<'a> {
    #[serde(borrow, default)]
    data: Option<EventBody<'a>>,
    #[serde(borrow, flatten)]
    body: EventBody<'a>,
    #[serde(default)]
    id: Option<u64>,
    #[serde(default)]
    error: Option<ErrorBody>,
    #[serde(default)]
    code: Option<i64>,
    #[serde(default)]
    msg: Option<String>,
}

#[derive(Debug, Deserialize)]
struct EventBody<'a> {
    #[serde(rename = "e", borrow, default)]
    event_type: Option<Cow<'a, str>>,
    #[serde(rename = "E", default)]
    event_time: Option<u64>,
    #[serde(rename = "s", borrow, default)]
    symbol: Option<Cow<'a, str>>,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    code: i64,
    msg: String,
}
