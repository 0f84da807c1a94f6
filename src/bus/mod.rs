//! Pub/sub bus between the ingestion worker and the gateway
//!
//! The bus is volatile and at-most-once: a message published while nobody
//! is subscribed is gone, and a subscriber never sees messages published
//! before its subscription took effect. Any backend with publish-by-topic
//! and subscribe-by-pattern semantics can sit behind [`Bus`].

pub mod memory;
pub mod publisher;
pub mod redis_bus;

pub use memory::MemoryBus;
pub use publisher::{BusPublisher, PublishError};
pub use redis_bus::RedisBus;

use crate::core::Topic;
use bytes::Bytes;
use futures_util::Stream;
use std::future::Future;
use std::pin::Pin;

/// Pattern matching every topic
pub const ALL_TOPICS: &str = "*";

/// One message as seen by a pattern subscriber
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BusMessage {
    pub topic: Topic,
    pub payload: Bytes,
}

impl BusMessage {
    pub fn new(topic: Topic, payload: Bytes) -> Self {
        Self { topic, payload }
    }
}

/// Stream of messages for a pattern subscription. Ends when the bus
/// connection is lost.
pub type BusStream = Pin<Box<dyn Stream<Item = BusMessage> + Send>>;

/// Publish/subscribe bus
pub trait Bus: Send + Sync + 'static {
    /// Publish `payload` on `topic`. No subscribers is not an error.
    fn publish(
        &self,
        topic: &Topic,
        payload: Bytes,
    ) -> impl Future<Output = Result<(), BusError>> + Send;

    /// Subscribe to every topic matching a glob `pattern`
    fn psubscribe(&self, pattern: &str) -> impl Future<Output = Result<BusStream, BusError>> + Send;
}

/// Bus errors
#[derive(Debug, thiserror::Error)]
pub enum BusError {
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Bus closed")]
    Closed,
}

/// Redis-style glob match supporting `*` (any run) and `?` (any single byte).
///
/// Other characters, including `[` and `\`, match literally.
pub fn glob_match(pattern: &str, topic: &str) -> bool {
    let p = pattern.as_bytes();
    let t = topic.as_bytes();
    let (mut pi, mut ti) = (0, 0);
    // Last `*` seen and the topic position it is currently absorbing up to
    let mut star: Option<(usize, usize)> = None;

    while ti < t.len() {
        if pi < p.len() && (p[pi] == b'?' || p[pi] == t[ti]) {
            pi += 1;
            ti += 1;
        } else if pi < p.len() && p[pi] == b'*' {
            star = Some((pi, ti));
            pi += 1;
        } else if let Some((star_pi, star_ti)) = star {
            pi = star_pi + 1;
            ti = star_ti + 1;
            star = Some((star_pi, star_ti + 1));
        } else {
            return false;
        }
    }

    p[pi..].iter().all(|&c| c == b'*')
}
