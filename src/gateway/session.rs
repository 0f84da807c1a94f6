//! Client Protocol Handler
//!
//! One per connection. Applies SUBSCRIBE/UNSUBSCRIBE frames to the registry
//! and unregisters the connection when it closes. Bad input is logged and
//! dropped; only transport close or error ends a session.

use super::protocol::{ControlFrame, ControlMethod};
use super::registry::{ConnectionHandle, ConnectionId, ConnectionRegistry};
use super::ClientSink;
use crate::infrastructure::metrics::MetricsCollector;
use std::sync::Arc;

/// Session lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Connected,
    Closed,
}

/// Per-connection control frame handler
pub struct SessionHandler<S: ClientSink> {
    id: ConnectionId,
    connection: Arc<ConnectionHandle<S>>,
    registry: Arc<ConnectionRegistry<S>>,
    metrics: Arc<MetricsCollector>,
    state: SessionState,
    /// Cleanup already ran
    finished: bool,
}

impl<S: ClientSink> SessionHandler<S> {
    /// Register a new connection with an empty subscription set
    pub fn open(
        registry: Arc<ConnectionRegistry<S>>,
        sink: S,
        metrics: Arc<MetricsCollector>,
    ) -> Self {
        let id = registry.next_connection_id();
        let connection = registry.register(id, sink);
        metrics.record_connection_opened();
        tracing::info!("Client {} connected ({} total)", id, registry.len());

        Self {
            id,
            connection,
            registry,
            metrics,
            state: SessionState::Connected,
            finished: false,
        }
    }

    #[inline]
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    #[inline]
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// This session's registry handle; its `removed()` fires on eviction
    pub fn connection(&self) -> &Arc<ConnectionHandle<S>> {
        &self.connection
    }

    /// Apply one inbound text or binary frame.
    ///
    /// Returns the method that was applied, or `None` if the frame was
    /// malformed, unsupported, or the session is already closed.
    pub fn handle_frame(&mut self, data: &[u8]) -> Option<ControlMethod> {
        if self.state == SessionState::Closed {
            return None;
        }

        let frame = match ControlFrame::parse(data) {
            Ok(frame) => frame,
            Err(e) => {
                self.metrics.record_malformed_frame();
                tracing::warn!("Client {}: {}", self.id, e);
                return None;
            }
        };

        let registered = match &frame.method {
            ControlMethod::Subscribe => {
                tracing::debug!("Client {} subscribe {:?}", self.id, frame.topics);
                self.registry.subscribe(self.id, frame.topics)
            }
            ControlMethod::Unsubscribe => {
                tracing::debug!("Client {} unsubscribe {:?}", self.id, frame.topics);
                self.registry.unsubscribe(self.id, frame.topics)
            }
            ControlMethod::Unsupported(method) => {
                tracing::warn!("Client {}: unsupported method {:?}", self.id, method);
                return None;
            }
        };

        if !registered {
            // Evicted by the fan-out path while this frame was in flight
            tracing::debug!("Client {} no longer registered", self.id);
            self.state = SessionState::Closed;
            return None;
        }

        Some(frame.method)
    }

    /// Unregister and mark closed. Safe to call more than once.
    pub fn close(&mut self) {
        self.state = SessionState::Closed;
        if self.finished {
            return;
        }
        self.finished = true;

        if self.registry.unregister(self.id).is_some() {
            tracing::info!("Client {} disconnected", self.id);
        }
        self.metrics.record_connection_closed();
    }
}

impl<S: ClientSink> Drop for SessionHandler<S> {
    fn drop(&mut self) {
        self.close();
    }
}
