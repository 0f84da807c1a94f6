//! Instrument symbols and bus topics
//!
//! Symbols are uppercase exchange tickers (e.g. `BTCUSDT`). A topic is the
//! bus-level channel name for a symbol and is always its uppercase form, so
//! publisher-side and subscriber-side topic strings compare equal regardless
//! of how a client spelled them.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Tradable instrument identifier, always uppercase
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Symbol(Arc<str>);

impl Symbol {
    /// Create a symbol, normalizing to uppercase.
    ///
    /// Returns `None` for empty or whitespace-only input.
    pub fn new(raw: &str) -> Option<Self> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return None;
        }
        Some(Self(Arc::from(trimmed.to_ascii_uppercase())))
    }

    #[inline]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Bus topic this symbol is published on
    #[inline]
    pub fn topic(&self) -> Topic {
        Topic(self.0.clone())
    }

    /// Check if the symbol is quoted in `quote` (suffix match)
    #[inline]
    pub fn has_quote_suffix(&self, quote: &str) -> bool {
        self.0.ends_with(quote)
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for Symbol {
    type Error = String;

    fn try_from(raw: String) -> Result<Self, Self::Error> {
        Self::new(&raw).ok_or_else(|| "symbol must not be empty".to_string())
    }
}

impl From<Symbol> for String {
    fn from(symbol: Symbol) -> Self {
        symbol.0.to_string()
    }
}

/// Bus channel name. Case-normalized to uppercase at construction.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct Topic(Arc<str>);

impl Topic {
    pub fn new(raw: &str) -> Self {
        Self(Arc::from(raw.trim().to_ascii_uppercase()))
    }

    #[inline]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&Symbol> for Topic {
    fn from(symbol: &Symbol) -> Self {
        symbol.topic()
    }
}

impl From<String> for Topic {
    fn from(raw: String) -> Self {
        Self::new(&raw)
    }
}

impl From<Topic> for String {
    fn from(topic: Topic) -> Self {
        topic.0.to_string()
    }
}
