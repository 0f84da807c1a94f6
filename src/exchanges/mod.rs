//! Exchange-specific implementations

pub mod binance;
pub mod parsing;

pub use binance::{BinanceFeedClient, ReadLoopExit};
pub use parsing::{BinanceParser, DecodeError, InboundFrame};
