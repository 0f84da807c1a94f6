//! Core domain types
//!
//! - Symbol / Topic: instrument identifiers and their bus channel names
//! - MarketEvent: decoded upstream event carrying the raw payload
//! - SymbolDiscovery: startup catalog fetch and quote-currency filter

pub mod discovery;
pub mod market_data;
pub mod symbol;

pub use discovery::{DiscoveryError, QuoteFilter, QuoteMatch, SymbolDiscovery};
pub use market_data::MarketEvent;
pub use symbol::{Symbol, Topic};
