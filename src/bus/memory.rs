//! In-process bus over a tokio broadcast channel
//!
//! Used by the standalone role (worker and gateway in one process) and by
//! tests. A subscriber that falls more than `capacity` messages behind
//! loses the overflow, same as a slow Redis subscriber would.

use super::{glob_match, Bus, BusError, BusMessage, BusStream};
use crate::core::Topic;
use bytes::Bytes;
use tokio::sync::broadcast::{self, error::RecvError};

/// Default per-subscriber buffer
pub const DEFAULT_CAPACITY: usize = 4096;

/// Broadcast-backed bus
#[derive(Clone)]
pub struct MemoryBus {
    tx: broadcast::Sender<BusMessage>,
}

impl MemoryBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Number of live pattern subscriptions
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for MemoryBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl Bus for MemoryBus {
    async fn publish(&self, topic: &Topic, payload: Bytes) -> Result<(), BusError> {
        // Err only means nobody is subscribed
        let _ = self.tx.send(BusMessage::new(topic.clone(), payload));
        Ok(())
    }

    async fn psubscribe(&self, pattern: &str) -> Result<BusStream, BusError> {
        let rx = self.tx.subscribe();
        let pattern = pattern.to_string();

        let stream = futures_util::stream::unfold((rx, pattern), |(mut rx, pattern)| async move {
            loop {
                match rx.recv().await {
                    Ok(msg) if glob_match(&pattern, msg.topic.as_str()) => {
                        return Some((msg, (rx, pattern)));
                    }
                    Ok(_) => continue,
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::warn!("Bus subscriber lagged, dropped {} messages", skipped);
                    }
                    Err(RecvError::Closed) => return None,
                }
            }
        });

        Ok(Box::pin(stream))
    }
}
