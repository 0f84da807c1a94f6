//! Bus Fan-Out Listener
//!
//! Holds one wildcard subscription to the bus. Each message is delivered
//! to its matching connections concurrently, and all of those deliveries
//! are joined before the next message is taken, so per-topic order is
//! kept and in-flight tasks never exceed the number of matched clients.

use super::registry::{ConnectionHandle, ConnectionRegistry};
use super::{ClientSink, DeliveryError};
use crate::bus::{Bus, BusError, BusMessage, BusStream, ALL_TOPICS};
use crate::infrastructure::config::GatewayConfig;
use crate::infrastructure::metrics::MetricsCollector;
use crate::infrastructure::shutdown::ShutdownSignal;
use futures_util::{FutureExt, StreamExt};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;

/// Delivery limits
#[derive(Debug, Clone, Copy)]
pub struct FanoutSettings {
    /// Upper bound for one write to one client
    pub delivery_timeout: Duration,
    /// Consecutive failures before eviction
    pub max_delivery_failures: u32,
}

impl Default for FanoutSettings {
    fn default() -> Self {
        Self {
            delivery_timeout: Duration::from_secs(5),
            max_delivery_failures: 1,
        }
    }
}

impl From<&GatewayConfig> for FanoutSettings {
    fn from(config: &GatewayConfig) -> Self {
        Self {
            delivery_timeout: config.delivery_timeout(),
            max_delivery_failures: config.max_delivery_failures,
        }
    }
}

/// Outcome of delivering one bus message
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchReport {
    pub matched: usize,
    pub delivered: usize,
    pub failed: usize,
    pub evicted: usize,
}

/// How one delivery ended for its connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Delivered,
    Failed,
    Evicted,
}

/// Deliver `message` to every connection subscribed to its topic.
///
/// Each connection is served by its own task: write under the timeout,
/// update the failure streak, and evict at the limit (unregister, then a
/// timed close). All tasks are joined before returning, so one message
/// costs at most two timeouts however many peers stall.
pub async fn dispatch<S: ClientSink>(
    registry: &Arc<ConnectionRegistry<S>>,
    message: &BusMessage,
    settings: &FanoutSettings,
    metrics: &Arc<MetricsCollector>,
) -> DispatchReport {
    let targets = registry.matching_connections(&message.topic);
    let mut report = DispatchReport {
        matched: targets.len(),
        ..DispatchReport::default()
    };
    if targets.is_empty() {
        return report;
    }

    let mut deliveries = JoinSet::new();
    for handle in targets {
        let registry = registry.clone();
        let metrics = metrics.clone();
        let message = message.clone();
        let settings = *settings;
        deliveries.spawn(async move {
            let attempt = AssertUnwindSafe(handle.sink().deliver(message.payload.clone()))
                .catch_unwind();
            let result = match tokio::time::timeout(settings.delivery_timeout, attempt).await {
                Ok(Ok(result)) => result,
                Ok(Err(_)) => Err(DeliveryError::Panicked),
                Err(_) => Err(DeliveryError::Timeout),
            };
            settle(&registry, &handle, &message, result, &settings, &metrics).await
        });
    }

    while let Some(joined) = deliveries.join_next().await {
        match joined {
            Ok(Outcome::Delivered) => report.delivered += 1,
            Ok(Outcome::Failed) => report.failed += 1,
            Ok(Outcome::Evicted) => {
                report.failed += 1;
                report.evicted += 1;
            }
            Err(e) => {
                tracing::error!("Delivery task failed: {}", e);
                report.failed += 1;
            }
        }
    }

    report
}

/// Record one delivery result against its connection, evicting at the limit
async fn settle<S: ClientSink>(
    registry: &ConnectionRegistry<S>,
    handle: &Arc<ConnectionHandle<S>>,
    message: &BusMessage,
    result: Result<(), DeliveryError>,
    settings: &FanoutSettings,
    metrics: &MetricsCollector,
) -> Outcome {
    let e = match result {
        Ok(()) => {
            handle.record_success();
            metrics.record_delivery();
            return Outcome::Delivered;
        }
        Err(e) => e,
    };

    metrics.record_delivery_failure();
    let streak = handle.record_failure();
    tracing::warn!(
        "Delivery to {} on {} failed ({}/{}): {}",
        handle.id(),
        message.topic,
        streak,
        settings.max_delivery_failures,
        e
    );

    if streak >= settings.max_delivery_failures
        && evict(registry, handle, settings.delivery_timeout).await
    {
        metrics.record_eviction();
        return Outcome::Evicted;
    }
    Outcome::Failed
}

/// Unregister, then close. Returns false if someone else already removed it.
///
/// Unregistering also wakes the connection's session, which drops the
/// socket even when the close below times out.
async fn evict<S: ClientSink>(
    registry: &ConnectionRegistry<S>,
    handle: &Arc<ConnectionHandle<S>>,
    close_timeout: Duration,
) -> bool {
    if registry.unregister(handle.id()).is_none() {
        return false;
    }

    if tokio::time::timeout(close_timeout, handle.sink().close())
        .await
        .is_err()
    {
        tracing::debug!("Close of {} timed out", handle.id());
    }
    tracing::info!("Evicted {}", handle.id());
    true
}

/// Wildcard bus subscriber feeding the registry's connections
pub struct FanoutListener<B, S> {
    bus: Arc<B>,
    registry: Arc<ConnectionRegistry<S>>,
    settings: FanoutSettings,
    metrics: Arc<MetricsCollector>,
}

impl<B: Bus, S: ClientSink> FanoutListener<B, S> {
    pub fn new(
        bus: Arc<B>,
        registry: Arc<ConnectionRegistry<S>>,
        settings: FanoutSettings,
        metrics: Arc<MetricsCollector>,
    ) -> Self {
        Self {
            bus,
            registry,
            settings,
            metrics,
        }
    }

    /// Subscribe to every topic and fan out until shutdown.
    ///
    /// Fails if the subscription cannot be made or the bus stream ends.
    pub async fn run(self, shutdown: ShutdownSignal) -> Result<(), BusError> {
        let stream = self.bus.psubscribe(ALL_TOPICS).await?;
        tracing::info!("Fan-out listening on pattern {}", ALL_TOPICS);
        self.run_stream(stream, shutdown).await
    }

    async fn run_stream(
        self,
        mut stream: BusStream,
        mut shutdown: ShutdownSignal,
    ) -> Result<(), BusError> {
        loop {
            let message = tokio::select! {
                biased;
                _ = shutdown.recv() => {
                    tracing::info!("Fan-out listener stopped");
                    return Ok(());
                }
                next = stream.next() => match next {
                    Some(message) => message,
                    None => {
                        tracing::error!("Bus subscription ended");
                        return Err(BusError::Closed);
                    }
                },
            };

            self.metrics.record_bus_message();
            let report = dispatch(&self.registry, &message, &self.settings, &self.metrics).await;
            tracing::trace!("{} -> {:?}", message.topic, report);
        }
    }
}
