//! Redis pub/sub bus
//!
//! PUBLISH goes over a shared multiplexed connection; PSUBSCRIBE takes a
//! dedicated connection since a subscribed Redis connection cannot issue
//! other commands.

use super::{Bus, BusError, BusMessage, BusStream};
use crate::core::Topic;
use bytes::Bytes;
use futures_util::StreamExt;
use redis::aio::MultiplexedConnection;
use redis::AsyncCommands;

/// Redis-backed bus
#[derive(Clone)]
pub struct RedisBus {
    client: redis::Client,
    publisher: MultiplexedConnection,
}

impl RedisBus {
    /// Open a client and verify the server is reachable
    pub async fn connect(url: &str) -> Result<Self, BusError> {
        let client = redis::Client::open(url)?;
        let publisher = client.get_multiplexed_async_connection().await?;
        tracing::info!("Connected to Redis at {}", url);
        Ok(Self { client, publisher })
    }
}

impl Bus for RedisBus {
    async fn publish(&self, topic: &Topic, payload: Bytes) -> Result<(), BusError> {
        let mut conn = self.publisher.clone();
        let receivers: i64 = conn.publish(topic.as_str(), payload.to_vec()).await?;
        tracing::trace!("Published to {} ({} receivers)", topic, receivers);
        Ok(())
    }

    async fn psubscribe(&self, pattern: &str) -> Result<BusStream, BusError> {
        let mut pubsub = self.client.get_async_pubsub().await?;
        pubsub.psubscribe(pattern).await?;
        tracing::info!("Subscribed to Redis pattern {}", pattern);

        let stream = pubsub.into_on_message().map(|msg| {
            BusMessage::new(
                Topic::new(msg.get_channel_name()),
                Bytes::copy_from_slice(msg.get_payload_bytes()),
            )
        });

        Ok(Box::pin(stream))
    }
}
