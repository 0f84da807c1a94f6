//! Symbol Discovery (startup only)
//!
//! Fetches the instrument catalog from the exchange REST API and keeps the
//! symbols quoted in the configured currency. Called once at worker startup;
//! failure here is fatal since there is nothing to subscribe to.

use crate::core::Symbol;
use crate::infrastructure::config::DiscoveryConfig;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::time::Duration;

/// Upper bound for the retry backoff
const MAX_BACKOFF: Duration = Duration::from_secs(10);

/// How the quote-currency filter is applied to a symbol name
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum QuoteMatch {
    /// Symbol ends with the quote asset (`BTCUSDT` for `USDT`)
    #[default]
    Suffix,
    /// Symbol contains the quote asset anywhere (`USDTTRY` for `USDT`)
    Contains,
}

/// Quote-currency filter
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuoteFilter {
    quote: String,
    mode: QuoteMatch,
}

impl QuoteFilter {
    pub fn new(quote: &str, mode: QuoteMatch) -> Self {
        Self {
            quote: quote.trim().to_ascii_uppercase(),
            mode,
        }
    }

    #[inline]
    pub fn matches(&self, symbol: &Symbol) -> bool {
        match self.mode {
            QuoteMatch::Suffix => symbol.has_quote_suffix(&self.quote),
            QuoteMatch::Contains => symbol.as_str().contains(self.quote.as_str()),
        }
    }

    pub fn quote(&self) -> &str {
        &self.quote
    }
}

/// Bounded exponential backoff for catalog requests
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_backoff: Duration,
}

impl RetryPolicy {
    /// Delay before attempt `attempt + 1` (attempt is 1-based)
    fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u32 << attempt.saturating_sub(1).min(16);
        self.initial_backoff.saturating_mul(factor).min(MAX_BACKOFF)
    }
}

/// Symbol discovery client
pub struct SymbolDiscovery {
    client: reqwest::Client,
    catalog_url: String,
    filter: QuoteFilter,
    retry: RetryPolicy,
}

impl SymbolDiscovery {
    /// Create discovery client from configuration
    pub fn new(config: &DiscoveryConfig) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(config.request_timeout_secs))
                .user_agent(concat!("market-fanout/", env!("CARGO_PKG_VERSION")))
                .build()
                .unwrap_or_else(|_| reqwest::Client::new()),
            catalog_url: config.catalog_url.clone(),
            filter: QuoteFilter::new(&config.quote_asset, config.quote_match),
            retry: RetryPolicy {
                max_attempts: config.max_attempts.max(1),
                initial_backoff: Duration::from_millis(config.initial_backoff_ms),
            },
        }
    }

    /// Fetch the catalog and return the filtered symbol universe.
    ///
    /// Transport errors, HTTP 5xx and 429 are retried with backoff up to
    /// the configured attempt count; anything else fails immediately.
    pub async fn discover(&self) -> Result<Vec<Symbol>, DiscoveryError> {
        let mut attempt = 1;
        loop {
            match self.fetch_catalog().await {
                Ok(symbols) if symbols.is_empty() => return Err(DiscoveryError::NoSymbols),
                Ok(symbols) => {
                    tracing::info!(
                        "Discovered {} symbols quoted in {}",
                        symbols.len(),
                        self.filter.quote()
                    );
                    return Ok(symbols);
                }
                Err(e) if e.is_retryable() && attempt < self.retry.max_attempts => {
                    let delay = self.retry.backoff(attempt);
                    tracing::warn!(
                        "Catalog request failed (attempt {}/{}): {}; retrying in {:?}",
                        attempt,
                        self.retry.max_attempts,
                        e,
                        delay
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Single catalog request
    async fn fetch_catalog(&self) -> Result<Vec<Symbol>, DiscoveryError> {
        tracing::info!("Fetching instrument catalog from {}", self.catalog_url);

        let response = self
            .client
            .get(&self.catalog_url)
            .send()
            .await
            .map_err(|e| DiscoveryError::Network(e.to_string()))?;

        if !response.status().is_success() {
            return Err(DiscoveryError::Http(response.status().as_u16()));
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| DiscoveryError::Network(e.to_string()))?;

        parse_catalog(&body, &self.filter)
    }
}

/// Parse an exchange catalog body and apply the quote filter
pub fn parse_catalog(body: &[u8], filter: &QuoteFilter) -> Result<Vec<Symbol>, DiscoveryError> {
    let catalog: ExchangeInfo =
        serde_json::from_slice(body).map_err(|e| DiscoveryError::Parse(e.to_string()))?;

    tracing::debug!("Catalog lists {} instruments", catalog.symbols.len());

    Ok(filter_symbols(
        catalog.symbols.into_iter().map(|s| s.symbol),
        filter,
    ))
}

/// Keep names matching the filter, uppercased, first occurrence wins
pub fn filter_symbols<I>(names: I, filter: &QuoteFilter) -> Vec<Symbol>
where
    I: IntoIterator<Item = String>,
{
    let mut seen = HashSet::new();
    names
        .into_iter()
        .filter_map(|name| Symbol::new(&name))
        .filter(|symbol| filter.matches(symbol))
        .filter(|symbol| seen.insert(symbol.clone()))
        .collect()
}

// === API Response Types ===

/// Binance exchangeInfo response (only the fields we route on)
#[derive(Debug, Deserialize)]
struct ExchangeInfo {
    symbols: Vec<InstrumentDescriptor>,
}

#[derive(Debug, Deserialize)]
struct InstrumentDescriptor {
    symbol: String,
}

/// Discovery errors
#[derive(Debug, thiserror::Error)]
pub enum DiscoveryError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("HTTP error: {0}")]
    Http(u16),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("No symbols found")]
    NoSymbols,
}

impl DiscoveryError {
    /// Transient failures worth another attempt
    pub fn is_retryable(&self) -> bool {
        match self {
            DiscoveryError::Network(_) => true,
            DiscoveryError::Http(status) => *status >= 500 || *status == 429,
            DiscoveryError::Parse(_) | DiscoveryError::NoSymbols => false,
        }
    }
}
