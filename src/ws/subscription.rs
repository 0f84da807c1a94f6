//! Batched upstream subscriptions
//!
//! Splits the symbol universe into batches of at most `batch_size` streams
//! (the exchange caps params per SUBSCRIBE request) and tracks each batch
//! from send to acknowledgement. Batch ids double as request ids so an
//! exchange ack `{"result":null,"id":N}` maps back to its batch.

use crate::core::Symbol;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

/// Default symbols per SUBSCRIBE request
pub const DEFAULT_BATCH_SIZE: usize = 100;

/// Streams one upstream connection may hold (Binance limit)
pub const DEFAULT_MAX_STREAMS: usize = 1024;

/// Kline stream interval
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum KlineInterval {
    Sec1,
    Min1,
    Min3,
    Min5,
    Min15,
    Min30,
    Hour1,
    Hour2,
    Hour4,
    Hour6,
    Hour8,
    Hour12,
    Day1,
    Day3,
    Week1,
    Month1,
}

impl KlineInterval {
    pub const ALL: [KlineInterval; 16] = [
        KlineInterval::Sec1,
        KlineInterval::Min1,
        KlineInterval::Min3,
        KlineInterval::Min5,
        KlineInterval::Min15,
        KlineInterval::Min30,
        KlineInterval::Hour1,
        KlineInterval::Hour2,
        KlineInterval::Hour4,
        KlineInterval::Hour6,
        KlineInterval::Hour8,
        KlineInterval::Hour12,
        KlineInterval::Day1,
        KlineInterval::Day3,
        KlineInterval::Week1,
        KlineInterval::Month1,
    ];

    /// Exchange notation (`1s`, `15m`, `1M`, ...)
    pub fn as_str(&self) -> &'static str {
        match self {
            KlineInterval::Sec1 => "1s",
            KlineInterval::Min1 => "1m",
            KlineInterval::Min3 => "3m",
            KlineInterval::Min5 => "5m",
            KlineInterval::Min15 => "15m",
            KlineInterval::Min30 => "30m",
            KlineInterval::Hour1 => "1h",
            KlineInterval::Hour2 => "2h",
            KlineInterval::Hour4 => "4h",
            KlineInterval::Hour6 => "6h",
            KlineInterval::Hour8 => "8h",
            KlineInterval::Hour12 => "12h",
            KlineInterval::Day1 => "1d",
            KlineInterval::Day3 => "3d",
            KlineInterval::Week1 => "1w",
            KlineInterval::Month1 => "1M",
        }
    }

    /// Stream name for a symbol, e.g. `btcusdt@kline_1s`
    pub fn stream_name(&self, symbol: &Symbol) -> String {
        format!("{}@kline_{}", symbol.as_str().to_ascii_lowercase(), self.as_str())
    }
}

impl fmt::Display for KlineInterval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for KlineInterval {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        // Case matters: `1m` is a minute, `1M` a month
        Self::ALL
            .iter()
            .copied()
            .find(|interval| interval.as_str() == s)
            .ok_or_else(|| format!("unknown kline interval: {s}"))
    }
}

impl TryFrom<String> for KlineInterval {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<KlineInterval> for String {
    fn from(interval: KlineInterval) -> Self {
        interval.as_str().to_string()
    }
}

/// Upstream control request
#[derive(Debug, Serialize)]
struct ControlRequest<'a> {
    method: &'static str,
    params: &'a [String],
    id: u64,
}

/// One SUBSCRIBE request worth of streams
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionBatch {
    /// Request id sent upstream
    pub id: u64,
    /// Position within the plan (0-based)
    pub index: usize,
    pub interval: KlineInterval,
    pub symbols: Vec<Symbol>,
}

impl SubscriptionBatch {
    /// Stream names for the request params
    pub fn params(&self) -> Vec<String> {
        self.symbols
            .iter()
            .map(|s| self.interval.stream_name(s))
            .collect()
    }

    /// Serialized `{method, params, id}` frame
    pub fn to_control_message(&self) -> String {
        let params = self.params();
        let request = ControlRequest {
            method: "SUBSCRIBE",
            params: &params,
            id: self.id,
        };
        // Serializing strings and integers cannot fail
        serde_json::to_string(&request).unwrap_or_default()
    }

    pub fn first_symbol(&self) -> Option<&Symbol> {
        self.symbols.first()
    }
}

/// Partition `symbols` into batches of at most `batch_size`, preserving order.
///
/// Batch ids start at `first_id` and increase by one per batch.
pub fn plan_batches(
    symbols: &[Symbol],
    interval: KlineInterval,
    batch_size: usize,
    first_id: u64,
) -> Result<Vec<SubscriptionBatch>, SubscriptionError> {
    if batch_size == 0 {
        return Err(SubscriptionError::InvalidBatchSize);
    }

    Ok(symbols
        .chunks(batch_size)
        .enumerate()
        .map(|(index, chunk)| SubscriptionBatch {
            id: first_id + index as u64,
            index,
            interval,
            symbols: chunk.to_vec(),
        })
        .collect())
}

/// Subscription batch status
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionStatus {
    /// Request sent, waiting for confirmation
    Pending,
    /// Subscription confirmed by exchange
    Active,
    /// Exchange rejected the request
    Failed,
}

/// Tracks sent batches by request id
#[derive(Debug, Default)]
pub struct SubscriptionLedger {
    batches: HashMap<u64, (SubscriptionBatch, SubscriptionStatus)>,
}

impl SubscriptionLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a batch that was written to the transport
    pub fn record_sent(&mut self, batch: SubscriptionBatch) {
        self.batches
            .insert(batch.id, (batch, SubscriptionStatus::Pending));
    }

    /// Mark a batch confirmed. Returns the batch if the id is known.
    pub fn confirm(&mut self, id: u64) -> Option<&SubscriptionBatch> {
        self.set_status(id, SubscriptionStatus::Active)
    }

    /// Mark a batch rejected. Returns the batch if the id is known.
    pub fn reject(&mut self, id: u64) -> Option<&SubscriptionBatch> {
        self.set_status(id, SubscriptionStatus::Failed)
    }

    fn set_status(&mut self, id: u64, status: SubscriptionStatus) -> Option<&SubscriptionBatch> {
        self.batches.get_mut(&id).map(|(batch, current)| {
            *current = status;
            &*batch
        })
    }

    pub fn status(&self, id: u64) -> Option<SubscriptionStatus> {
        self.batches.get(&id).map(|(_, status)| *status)
    }

    pub fn count(&self, status: SubscriptionStatus) -> usize {
        self.batches.values().filter(|(_, s)| *s == status).count()
    }

    /// Streams covered by confirmed batches
    pub fn active_streams(&self) -> usize {
        self.batches
            .values()
            .filter(|(_, s)| *s == SubscriptionStatus::Active)
            .map(|(batch, _)| batch.symbols.len())
            .sum()
    }

    pub fn total_count(&self) -> usize {
        self.batches.len()
    }
}

/// Outcome of a full paced subscription run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SubscriptionReport {
    pub batches_sent: usize,
    pub streams_requested: usize,
}

/// Subscription errors
#[derive(Debug, thiserror::Error)]
pub enum SubscriptionError {
    #[error(
        "Failed to send subscription batch {index} (id {id}, interval {interval}, first symbol {first_symbol}): {reason}"
    )]
    SendFailed {
        index: usize,
        id: u64,
        interval: KlineInterval,
        first_symbol: String,
        reason: String,
    },

    #[error("Batch size must be greater than zero")]
    InvalidBatchSize,

    #[error("Inter-batch delay must be greater than zero")]
    InvalidDelay,
}

impl SubscriptionError {
    pub fn send_failed(batch: &SubscriptionBatch, reason: impl ToString) -> Self {
        SubscriptionError::SendFailed {
            index: batch.index,
            id: batch.id,
            interval: batch.interval,
            first_symbol: batch
                .first_symbol()
                .map(|s| s.to_string())
                .unwrap_or_default(),
            reason: reason.to_string(),
        }
    }
}
