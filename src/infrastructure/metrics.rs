//! Metrics collection for pipeline monitoring
//!
//! Lock-free counters updated on the read and fan-out paths, exported as a
//! snapshot by the gateway's `/stats` endpoint.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Instant, SystemTime};

/// Pipeline metrics collector
#[derive(Debug)]
pub struct MetricsCollector {
    // Ingestion side
    events_decoded: AtomicU64,
    decode_errors: AtomicU64,
    events_published: AtomicU64,
    publish_errors: AtomicU64,
    batches_sent: AtomicU64,
    // Gateway side
    connections_opened: AtomicU64,
    connections_closed: AtomicU64,
    malformed_frames: AtomicU64,
    bus_messages: AtomicU64,
    deliveries: AtomicU64,
    delivery_failures: AtomicU64,
    evictions: AtomicU64,
    /// Last bus or upstream message (Unix millis)
    last_message_time: AtomicU64,
    /// Start time for uptime calculation
    start_time: Instant,
}

/// Metrics snapshot for API export
#[derive(Debug, Clone, Copy, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MetricsSnapshot {
    pub events_decoded: u64,
    pub decode_errors: u64,
    pub events_published: u64,
    pub publish_errors: u64,
    pub batches_sent: u64,
    pub connections_opened: u64,
    pub connections_closed: u64,
    pub active_connections: u64,
    pub malformed_frames: u64,
    pub bus_messages: u64,
    pub deliveries: u64,
    pub delivery_failures: u64,
    pub evictions: u64,
    pub message_rate: f64,
    pub uptime_seconds: u64,
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self {
            events_decoded: AtomicU64::new(0),
            decode_errors: AtomicU64::new(0),
            events_published: AtomicU64::new(0),
            publish_errors: AtomicU64::new(0),
            batches_sent: AtomicU64::new(0),
            connections_opened: AtomicU64::new(0),
            connections_closed: AtomicU64::new(0),
            malformed_frames: AtomicU64::new(0),
            bus_messages: AtomicU64::new(0),
            deliveries: AtomicU64::new(0),
            delivery_failures: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
            last_message_time: AtomicU64::new(0),
            start_time: Instant::now(),
        }
    }

    #[inline]
    pub fn record_event_decoded(&self) {
        self.events_decoded.fetch_add(1, Ordering::Relaxed);
        self.update_last_message_time();
    }

    #[inline]
    pub fn record_decode_error(&self) {
        self.decode_errors.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_published(&self) {
        self.events_published.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_publish_error(&self) {
        self.publish_errors.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_batch_sent(&self) {
        self.batches_sent.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_connection_opened(&self) {
        self.connections_opened.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_connection_closed(&self) {
        self.connections_closed.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_malformed_frame(&self) {
        self.malformed_frames.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_bus_message(&self) {
        self.bus_messages.fetch_add(1, Ordering::Relaxed);
        self.update_last_message_time();
    }

    #[inline]
    pub fn record_delivery(&self) {
        self.deliveries.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_delivery_failure(&self) {
        self.delivery_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_eviction(&self) {
        self.evictions.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    fn update_last_message_time(&self) {
        self.last_message_time.store(unix_millis(), Ordering::Relaxed);
    }

    /// Get current snapshot of metrics
    pub fn snapshot(&self) -> MetricsSnapshot {
        let opened = self.connections_opened.load(Ordering::Relaxed);
        let closed = self.connections_closed.load(Ordering::Relaxed);
        let decoded = self.events_decoded.load(Ordering::Relaxed);
        let bus = self.bus_messages.load(Ordering::Relaxed);

        let uptime = self.start_time.elapsed().as_secs();
        let rate = if uptime > 0 {
            (decoded + bus) as f64 / uptime as f64
        } else {
            0.0
        };

        MetricsSnapshot {
            events_decoded: decoded,
            decode_errors: self.decode_errors.load(Ordering::Relaxed),
            events_published: self.events_published.load(Ordering::Relaxed),
            publish_errors: self.publish_errors.load(Ordering::Relaxed),
            batches_sent: self.batches_sent.load(Ordering::Relaxed),
            connections_opened: opened,
            connections_closed: closed,
            active_connections: opened.saturating_sub(closed),
            malformed_frames: self.malformed_frames.load(Ordering::Relaxed),
            bus_messages: bus,
            deliveries: self.deliveries.load(Ordering::Relaxed),
            delivery_failures: self.delivery_failures.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            message_rate: rate,
            uptime_seconds: uptime,
        }
    }

    /// Milliseconds since the last message, capped at 10000ms
    pub fn latency_ms(&self) -> u64 {
        let last = self.last_message_time.load(Ordering::Relaxed);
        if last == 0 {
            return 10000; // No messages yet
        }

        unix_millis().saturating_sub(last).min(10000)
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
