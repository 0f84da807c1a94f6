//! Client control frames
//!
//! Client -> server: `{"method": "SUBSCRIBE" | "UNSUBSCRIBE", "params": [topic, ...]}`
//! with an optional `id` that is accepted and ignored. Server -> client
//! traffic is raw bus payloads only, so there are no response types here.

use crate::core::Topic;
use serde::Deserialize;

/// Control frame method
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlMethod {
    Subscribe,
    Unsubscribe,
    /// Anything else, kept for logging
    Unsupported(String),
}

impl ControlMethod {
    fn from_wire(method: String) -> Self {
        match method.as_str() {
            "SUBSCRIBE" => ControlMethod::Subscribe,
            "UNSUBSCRIBE" => ControlMethod::Unsubscribe,
            _ => ControlMethod::Unsupported(method),
        }
    }
}

/// Parsed control frame with normalized topics
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControlFrame {
    pub method: ControlMethod,
    pub topics: Vec<Topic>,
}

#[derive(Debug, Deserialize)]
struct RawControlFrame {
    method: String,
    params: Vec<String>,
    #[allow(dead_code)]
    #[serde(default)]
    id: Option<serde_json::Value>,
}

impl ControlFrame {
    /// Parse a text or binary frame body
    pub fn parse(data: &[u8]) -> Result<Self, ProtocolError> {
        let raw: RawControlFrame =
            serde_json::from_slice(data).map_err(|e| ProtocolError::Malformed(e.to_string()))?;

        Ok(Self {
            method: ControlMethod::from_wire(raw.method),
            topics: raw
                .params
                .iter()
                .map(|p| Topic::new(p))
                .filter(|t| !t.is_empty())
                .collect(),
        })
    }
}

/// Control frame errors. Never fatal to the connection.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolError {
    #[error("Malformed control frame: {0}")]
    Malformed(String),
}
