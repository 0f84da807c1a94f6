//! Binance spot stream client
//!
//! Owns the single upstream connection. Subscribes kline streams in paced
//! batches, then reads frames one at a time and republishes every market
//! event on the bus under its symbol topic.

use crate::bus::{Bus, BusPublisher};
use crate::core::Symbol;
use crate::exchanges::parsing::{BinanceParser, InboundFrame};
use crate::infrastructure::metrics::MetricsCollector;
use crate::infrastructure::shutdown::ShutdownSignal;
use crate::ws::connection::{FrameTransport, WebSocketConnection, WebSocketError};
use crate::ws::subscription::{
    plan_batches, KlineInterval, SubscriptionError, SubscriptionLedger, SubscriptionReport,
};

use bytes::Bytes;
use std::sync::Arc;
use std::time::Duration;
use tokio_tungstenite::tungstenite::Message;

/// Why the read loop returned without error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadLoopExit {
    /// Shutdown was requested
    Cancelled,
    /// Upstream sent a close frame or the stream ended
    Closed,
}

/// Binance combined-stream client
pub struct BinanceFeedClient<T> {
    transport: T,
    ledger: SubscriptionLedger,
    /// Request id for the next SUBSCRIBE batch
    next_id: u64,
    metrics: Arc<MetricsCollector>,
}

impl BinanceFeedClient<WebSocketConnection> {
    /// Default combined-stream endpoint
    pub const WS_URL: &'static str = "wss://stream.binance.com/stream";

    /// Connect to the streaming endpoint
    pub async fn connect(
        url: &str,
        connect_timeout: Duration,
        metrics: Arc<MetricsCollector>,
    ) -> Result<Self, WebSocketError> {
        let conn = WebSocketConnection::connect(url, connect_timeout).await?;
        Ok(Self::new(conn, metrics))
    }
}

impl<T: FrameTransport> BinanceFeedClient<T> {
    pub fn new(transport: T, metrics: Arc<MetricsCollector>) -> Self {
        Self {
            transport,
            ledger: SubscriptionLedger::new(),
            next_id: 1,
            metrics,
        }
    }

    /// Subscribe `symbols` on `interval`, at most `batch_size` per request,
    /// sleeping `delay` between consecutive requests.
    ///
    /// Stops at the first failed send. Batches already sent stay subscribed.
    pub async fn subscribe(
        &mut self,
        symbols: &[Symbol],
        interval: KlineInterval,
        batch_size: usize,
        delay: Duration,
    ) -> Result<SubscriptionReport, SubscriptionError> {
        if delay.is_zero() {
            return Err(SubscriptionError::InvalidDelay);
        }

        let batches = plan_batches(symbols, interval, batch_size, self.next_id)?;
        self.next_id += batches.len() as u64;

        let mut report = SubscriptionReport::default();
        for batch in batches {
            if report.batches_sent > 0 {
                tokio::time::sleep(delay).await;
            }

            if let Err(e) = self.transport.send_text(&batch.to_control_message()).await {
                let err = SubscriptionError::send_failed(&batch, e);
                tracing::error!("{}", err);
                return Err(err);
            }

            self.metrics.record_batch_sent();
            report.batches_sent += 1;
            report.streams_requested += batch.symbols.len();
            tracing::debug!(
                "Sent batch {} (id {}, {} streams, interval {})",
                batch.index,
                batch.id,
                batch.symbols.len(),
                interval
            );
            self.ledger.record_sent(batch);
        }

        tracing::info!(
            "Subscribed {} streams on {} in {} batches",
            report.streams_requested,
            interval,
            report.batches_sent
        );
        Ok(report)
    }

    /// Read frames until shutdown, upstream close, or a transport error.
    ///
    /// Undecodable frames are skipped. A transport error is returned to the
    /// caller; there is no reconnect.
    pub async fn read_loop<B: Bus>(
        &mut self,
        publisher: &BusPublisher<B>,
        shutdown: &mut ShutdownSignal,
    ) -> Result<ReadLoopExit, WebSocketError> {
        loop {
            let frame = tokio::select! {
                biased;
                _ = shutdown.recv() => {
                    tracing::info!("Read loop cancelled");
                    self.transport.close().await?;
                    return Ok(ReadLoopExit::Cancelled);
                }
                frame = self.transport.recv() => frame?,
            };

            let payload = match frame {
                Some(Message::Text(text)) => Bytes::from(text),
                Some(Message::Binary(data)) => data,
                Some(Message::Close(reason)) => {
                    tracing::info!("Upstream closed the stream: {:?}", reason);
                    return Ok(ReadLoopExit::Closed);
                }
                // Ping/Pong handled by tungstenite
                Some(_) => continue,
                None => {
                    tracing::info!("Upstream stream ended");
                    return Ok(ReadLoopExit::Closed);
                }
            };

            self.handle_frame(&payload, publisher).await;
        }
    }

    async fn handle_frame<B: Bus>(&mut self, payload: &Bytes, publisher: &BusPublisher<B>) {
        match BinanceParser::decode(payload) {
            Ok(InboundFrame::Event(event)) => {
                self.metrics.record_event_decoded();
                tracing::trace!(
                    "{} {} @ {:?}",
                    event.symbol,
                    event.event_type.as_deref().unwrap_or("event"),
                    event.event_time
                );
                publisher.publish_event(&event).await;
            }
            Ok(InboundFrame::SubscriptionAck { id }) => match self.ledger.confirm(id) {
                Some(batch) => tracing::debug!(
                    "Batch {} confirmed (id {}, {} streams)",
                    batch.index,
                    id,
                    batch.symbols.len()
                ),
                None => tracing::debug!("Ack for unknown request id {}", id),
            },
            Ok(InboundFrame::ExchangeError { id, code, message }) => {
                let batch = id.and_then(|id| self.ledger.reject(id)).map(|b| b.index);
                tracing::warn!(
                    "Exchange error {} on request {:?} (batch {:?}): {}",
                    code,
                    id,
                    batch,
                    message
                );
            }
            Err(e) => {
                self.metrics.record_decode_error();
                tracing::warn!("Skipping frame: {}", e);
            }
        }
    }

    /// Batches sent so far and their confirmation status
    pub fn ledger(&self) -> &SubscriptionLedger {
        &self.ledger
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub async fn close(&mut self) -> Result<(), WebSocketError> {
        self.transport.close().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::MemoryBus;
    use crate::infrastructure::shutdown::Shutdown;
    use crate::test_utils::{ScriptedTransport, Step};
    use crate::ws::subscription::SubscriptionStatus;
    use futures_util::StreamExt;
    use proptest::prelude::*;

    fn symbols(n: usize) -> Vec<Symbol> {
        (0..n)
            .map(|i| Symbol::new(&format!("SYM{i}USDT")).unwrap())
            .collect()
    }

    fn client(transport: ScriptedTransport) -> BinanceFeedClient<ScriptedTransport> {
        BinanceFeedClient::new(transport, Arc::new(MetricsCollector::new()))
    }

    #[tokio::test(start_paused = true)]
    async fn test_subscribe_paces_batches() {
        let mut feed = client(ScriptedTransport::new());
        let delay = Duration::from_millis(300);

        let report = feed
            .subscribe(&symbols(250), KlineInterval::Sec1, 100, delay)
            .await
            .unwrap();

        assert_eq!(report.batches_sent, 3);
        assert_eq!(report.streams_requested, 250);

        let sent = &feed.transport().sent;
        assert_eq!(sent.len(), 3);
        for pair in sent.windows(2) {
            assert!(pair[1].0 - pair[0].0 >= delay);
        }

        let first: serde_json::Value = serde_json::from_str(&sent[0].1).unwrap();
        assert_eq!(first["method"], "SUBSCRIBE");
        assert_eq!(first["id"], 1);
        assert_eq!(first["params"].as_array().unwrap().len(), 100);
        assert_eq!(first["params"][0], "sym0usdt@kline_1s");

        let last: serde_json::Value = serde_json::from_str(&sent[2].1).unwrap();
        assert_eq!(last["id"], 3);
        assert_eq!(last["params"].as_array().unwrap().len(), 50);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ids_continue_across_intervals() {
        let mut feed = client(ScriptedTransport::new());
        let delay = Duration::from_millis(10);

        feed.subscribe(&symbols(3), KlineInterval::Sec1, 2, delay)
            .await
            .unwrap();
        feed.subscribe(&symbols(3), KlineInterval::Min1, 2, delay)
            .await
            .unwrap();

        let ids: Vec<u64> = feed
            .transport()
            .sent
            .iter()
            .map(|(_, text)| serde_json::from_str::<serde_json::Value>(text).unwrap()["id"].as_u64().unwrap())
            .collect();
        assert_eq!(ids, vec![1, 2, 3, 4]);
        assert_eq!(feed.ledger().total_count(), 4);
    }

    #[tokio::test]
    async fn test_subscribe_send_failure_reports_batch() {
        let mut transport = ScriptedTransport::new();
        transport.fail_send_at = Some(1);
        let mut feed = client(transport);

        let err = feed
            .subscribe(
                &symbols(5),
                KlineInterval::Min1,
                2,
                Duration::from_millis(1),
            )
            .await
            .unwrap_err();

        match err {
            SubscriptionError::SendFailed {
                index,
                id,
                interval,
                first_symbol,
                ..
            } => {
                assert_eq!(index, 1);
                assert_eq!(id, 2);
                assert_eq!(interval, KlineInterval::Min1);
                assert_eq!(first_symbol, "SYM2USDT");
            }
            other => panic!("unexpected error: {other}"),
        }

        // First batch stays recorded, no rollback
        assert_eq!(feed.ledger().total_count(), 1);
        assert_eq!(feed.transport().sent.len(), 1);
    }

    #[tokio::test]
    async fn test_subscribe_rejects_zero_delay_and_batch() {
        let mut feed = client(ScriptedTransport::new());
        assert!(matches!(
            feed.subscribe(&symbols(1), KlineInterval::Sec1, 10, Duration::ZERO)
                .await,
            Err(SubscriptionError::InvalidDelay)
        ));
        assert!(matches!(
            feed.subscribe(&symbols(1), KlineInterval::Sec1, 0, Duration::from_millis(1))
                .await,
            Err(SubscriptionError::InvalidBatchSize)
        ));
        assert!(feed.transport().sent.is_empty());
    }

    #[tokio::test]
    async fn test_read_loop_publishes_and_skips_bad_frames() {
        let bus = Arc::new(MemoryBus::default());
        let metrics = Arc::new(MetricsCollector::new());
        let publisher = BusPublisher::new(bus.clone(), metrics.clone());
        let mut sub = bus.psubscribe("*").await.unwrap();

        let event = r#"{"stream":"btcusdt@kline_1s","data":{"e":"kline","E":1,"s":"BTCUSDT","k":{}}}"#;
        let mut transport = ScriptedTransport::new();
        transport
            .push_text("not json")
            .push_text(r#"{"result":null,"id":1}"#)
            .push(Step::Frame(Message::Ping(Bytes::new())))
            .push_text(r#"{"stream":"x","data":{"e":"kline","s":""}}"#)
            .push_text(event);

        let mut feed = BinanceFeedClient::new(transport, metrics.clone());
        feed.subscribe(
            &symbols(1),
            KlineInterval::Sec1,
            100,
            Duration::from_millis(1),
        )
        .await
        .unwrap();

        let shutdown = Shutdown::new();
        let exit = feed
            .read_loop(&publisher, &mut shutdown.subscribe())
            .await
            .unwrap();
        assert_eq!(exit, ReadLoopExit::Closed);

        let msg = sub.next().await.unwrap();
        assert_eq!(msg.topic.as_str(), "BTCUSDT");
        assert_eq!(&msg.payload[..], event.as_bytes());

        assert_eq!(feed.ledger().status(1), Some(SubscriptionStatus::Active));
        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.events_decoded, 1);
        assert_eq!(snapshot.decode_errors, 2);
        assert_eq!(snapshot.events_published, 1);
    }

    #[tokio::test]
    async fn test_exchange_error_rejects_batch() {
        let bus = Arc::new(MemoryBus::default());
        let metrics = Arc::new(MetricsCollector::new());
        let publisher = BusPublisher::new(bus, metrics.clone());

        let mut transport = ScriptedTransport::new();
        transport.push_text(r#"{"error":{"code":2,"msg":"Invalid request"},"id":1}"#);
        let mut feed = BinanceFeedClient::new(transport, metrics);
        feed.subscribe(
            &symbols(1),
            KlineInterval::Sec1,
            100,
            Duration::from_millis(1),
        )
        .await
        .unwrap();

        let shutdown = Shutdown::new();
        feed.read_loop(&publisher, &mut shutdown.subscribe())
            .await
            .unwrap();
        assert_eq!(feed.ledger().status(1), Some(SubscriptionStatus::Failed));
    }

    #[tokio::test]
    async fn test_read_loop_transport_error_is_returned() {
        let publisher = BusPublisher::new(
            Arc::new(MemoryBus::default()),
            Arc::new(MetricsCollector::new()),
        );
        let mut transport = ScriptedTransport::new();
        transport.push(Step::Error("reset".to_string()));

        let shutdown = Shutdown::new();
        let result = client(transport)
            .read_loop(&publisher, &mut shutdown.subscribe())
            .await;
        assert!(matches!(result, Err(WebSocketError::ReceiveFailed(_))));
    }

    #[tokio::test]
    async fn test_read_loop_cancellation() {
        let publisher = BusPublisher::new(
            Arc::new(MemoryBus::default()),
            Arc::new(MetricsCollector::new()),
        );
        let mut transport = ScriptedTransport::new();
        transport.hang_at_end = true;
        let mut feed = client(transport);

        let shutdown = Shutdown::new();
        let mut signal = shutdown.subscribe();
        let trigger = async {
            tokio::time::sleep(Duration::from_millis(10)).await;
            shutdown.trigger();
        };

        let (exit, _) = tokio::join!(feed.read_loop(&publisher, &mut signal), trigger);
        assert_eq!(exit.unwrap(), ReadLoopExit::Cancelled);
        assert!(feed.transport().closed);
    }

    #[tokio::test]
    async fn test_read_loop_stops_on_close_frame() {
        let publisher = BusPublisher::new(
            Arc::new(MemoryBus::default()),
            Arc::new(MetricsCollector::new()),
        );
        let mut transport = ScriptedTransport::new();
        transport.hang_at_end = true;
        transport.push(Step::Frame(Message::Close(None)));

        let shutdown = Shutdown::new();
        let exit = client(transport)
            .read_loop(&publisher, &mut shutdown.subscribe())
            .await
            .unwrap();
        assert_eq!(exit, ReadLoopExit::Closed);
    }

    proptest! {
        #[test]
        fn prop_batch_count_and_size(n in 0usize..400, b in 1usize..150) {
            let rt = tokio::runtime::Builder::new_current_thread()
                .enable_time()
                .start_paused(true)
                .build()
                .unwrap();

            let sent = rt.block_on(async {
                let mut feed = client(ScriptedTransport::new());
                feed.subscribe(&symbols(n), KlineInterval::Sec1, b, Duration::from_millis(300))
                    .await
                    .unwrap();
                feed.transport.sent
            });

            prop_assert_eq!(sent.len(), n.div_ceil(b));
            for (_, text) in &sent {
                let value: serde_json::Value = serde_json::from_str(text).unwrap();
                prop_assert!(value["params"].as_array().unwrap().len() <= b);
            }
            for pair in sent.windows(2) {
                prop_assert!(pair[1].0 > pair[0].0);
            }
        }
    }
}
