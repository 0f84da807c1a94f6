//! Test doubles for the upstream transport and client connections
//!
//! Compiled only for tests.

use crate::gateway::{ClientSink, DeliveryError};
use crate::ws::connection::{FrameTransport, Result as WsResult, WebSocketError};
use bytes::Bytes;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_tungstenite::tungstenite::Message;

/// Scripted inbound step
pub enum Step {
    Frame(Message),
    Error(String),
}

/// Upstream transport replaying a fixed script
///
/// Records every sent text frame with the (possibly paused) clock time.
/// Once the script is exhausted `recv` either reports end of stream or
/// blocks forever, depending on `hang_at_end`.
pub struct ScriptedTransport {
    inbound: VecDeque<Step>,
    pub sent: Vec<(Instant, String)>,
    /// Zero-based send index that fails
    pub fail_send_at: Option<usize>,
    pub hang_at_end: bool,
    pub closed: bool,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self {
            inbound: VecDeque::new(),
            sent: Vec::new(),
            fail_send_at: None,
            hang_at_end: false,
            closed: false,
        }
    }

    pub fn push_text(&mut self, text: &str) -> &mut Self {
        self.inbound.push_back(Step::Frame(Message::text(text)));
        self
    }

    pub fn push(&mut self, step: Step) -> &mut Self {
        self.inbound.push_back(step);
        self
    }
}

impl FrameTransport for ScriptedTransport {
    async fn send_text(&mut self, text: &str) -> WsResult<()> {
        if self.fail_send_at == Some(self.sent.len()) {
            return Err(WebSocketError::SendFailed("scripted failure".to_string()));
        }
        self.sent.push((Instant::now(), text.to_string()));
        Ok(())
    }

    async fn recv(&mut self) -> WsResult<Option<Message>> {
        match self.inbound.pop_front() {
            Some(Step::Frame(msg)) => Ok(Some(msg)),
            Some(Step::Error(reason)) => Err(WebSocketError::ReceiveFailed(reason)),
            None if self.hang_at_end => std::future::pending().await,
            None => Ok(None),
        }
    }

    async fn close(&mut self) -> WsResult<()> {
        self.closed = true;
        Ok(())
    }
}

/// Client sink recording what it was sent
///
/// Clones share state, so a test keeps one clone and hands the other to
/// the registry.
#[derive(Clone, Default)]
pub struct TestSink {
    received: Arc<Mutex<Vec<Bytes>>>,
    closed: Arc<AtomicBool>,
    attempts: Arc<AtomicUsize>,
    /// Deliveries left to fail before succeeding again (`u32::MAX` = always)
    failures_left: Arc<AtomicU32>,
    stall: Option<Duration>,
    /// Writes and closes never complete
    hang: bool,
    /// Writes panic
    panic: bool,
}

impl TestSink {
    pub fn recording() -> Self {
        Self::default()
    }

    /// Every delivery fails
    pub fn failing() -> Self {
        let sink = Self::default();
        sink.fail_next(u32::MAX);
        sink
    }

    /// Every delivery takes `delay` before succeeding
    pub fn stalled(delay: Duration) -> Self {
        Self {
            stall: Some(delay),
            ..Self::default()
        }
    }

    /// Peer that stopped reading: neither writes nor closes ever finish
    pub fn hung() -> Self {
        Self {
            hang: true,
            ..Self::default()
        }
    }

    /// Every delivery panics
    pub fn panicking() -> Self {
        Self {
            panic: true,
            ..Self::default()
        }
    }

    pub fn fail_next(&self, count: u32) {
        self.failures_left.store(count, Ordering::SeqCst);
    }

    pub fn received(&self) -> Vec<Bytes> {
        self.received.lock().clone()
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

impl ClientSink for TestSink {
    async fn deliver(&self, payload: Bytes) -> Result<(), DeliveryError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);

        if self.hang {
            std::future::pending::<()>().await;
        }
        if self.panic {
            panic!("sink exploded");
        }

        if let Some(delay) = self.stall {
            tokio::time::sleep(delay).await;
        }

        let left = self.failures_left.load(Ordering::SeqCst);
        if left > 0 {
            if left != u32::MAX {
                self.failures_left.fetch_sub(1, Ordering::SeqCst);
            }
            return Err(DeliveryError::Write("scripted failure".to_string()));
        }

        self.received.lock().push(payload);
        Ok(())
    }

    async fn close(&self) {
        if self.hang {
            std::future::pending::<()>().await;
        }
        self.closed.store(true, Ordering::SeqCst);
    }
}
