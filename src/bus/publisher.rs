//! Bus Publisher
//!
//! Republishes decoded events on the bus under their symbol's topic. The
//! bus is best-effort, so a failed publish is logged and dropped; it never
//! stops the upstream read loop.

use super::{Bus, BusError};
use crate::core::{MarketEvent, Topic};
use crate::infrastructure::metrics::MetricsCollector;
use bytes::Bytes;
use std::sync::Arc;

/// A publish that did not reach the bus
#[derive(Debug, thiserror::Error)]
#[error("Failed to publish to {topic}: {source}")]
pub struct PublishError {
    pub topic: Topic,
    #[source]
    pub source: BusError,
}

/// Publisher over a shared bus handle
pub struct BusPublisher<B> {
    bus: Arc<B>,
    metrics: Arc<MetricsCollector>,
}

impl<B: Bus> BusPublisher<B> {
    pub fn new(bus: Arc<B>, metrics: Arc<MetricsCollector>) -> Self {
        Self { bus, metrics }
    }

    /// Publish, surfacing the error to the caller
    pub async fn try_publish(&self, topic: &Topic, payload: Bytes) -> Result<(), PublishError> {
        self.bus
            .publish(topic, payload)
            .await
            .map_err(|source| PublishError {
                topic: topic.clone(),
                source,
            })
    }

    /// Publish and swallow failures. Returns whether the bus accepted it.
    pub async fn publish(&self, topic: &Topic, payload: Bytes) -> bool {
        if topic.is_empty() {
            return false;
        }

        match self.try_publish(topic, payload).await {
            Ok(()) => {
                self.metrics.record_published();
                true
            }
            Err(e) => {
                self.metrics.record_publish_error();
                tracing::warn!("{}", e);
                false
            }
        }
    }

    /// Publish an event's raw payload on its symbol topic
    #[inline]
    pub async fn publish_event(&self, event: &MarketEvent) -> bool {
        self.publish(&event.topic(), event.payload.clone()).await
    }
}
