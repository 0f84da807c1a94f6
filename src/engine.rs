//! Ingestion worker
//!
//! Startup path: discover symbols, connect upstream, subscribe every
//! configured interval in paced batches. Steady state: the feed client's
//! read loop republishes events on the bus until shutdown or upstream loss.

use crate::bus::{Bus, BusPublisher};
use crate::core::{Symbol, SymbolDiscovery};
use crate::exchanges::{BinanceFeedClient, ReadLoopExit};
use crate::infrastructure::config::{DiscoveryConfig, UpstreamConfig};
use crate::infrastructure::metrics::MetricsCollector;
use crate::infrastructure::shutdown::ShutdownSignal;
use crate::ws::{FrameTransport, SubscriptionError, SubscriptionReport};
use crate::Result;
use std::sync::Arc;

/// Worker wiring discovery, the upstream feed and the bus
pub struct IngestWorker<B> {
    upstream: UpstreamConfig,
    discovery: DiscoveryConfig,
    bus: Arc<B>,
    metrics: Arc<MetricsCollector>,
}

impl<B: Bus> IngestWorker<B> {
    pub fn new(
        upstream: UpstreamConfig,
        discovery: DiscoveryConfig,
        bus: Arc<B>,
        metrics: Arc<MetricsCollector>,
    ) -> Self {
        Self {
            upstream,
            discovery,
            bus,
            metrics,
        }
    }

    /// Run until shutdown or the upstream connection ends.
    ///
    /// Discovery, connect and subscription failures are returned as errors,
    /// as is a transport error in the read loop.
    pub async fn run(&self, mut shutdown: ShutdownSignal) -> Result<ReadLoopExit> {
        tracing::info!("Starting ingestion worker");

        let discovered = SymbolDiscovery::new(&self.discovery).discover().await?;
        let symbols = apply_stream_budget(
            discovered,
            self.upstream.intervals.len(),
            self.upstream.max_streams,
        );

        let mut feed = BinanceFeedClient::connect(
            &self.upstream.ws_url,
            self.upstream.connect_timeout(),
            self.metrics.clone(),
        )
        .await?;

        let report = self.subscribe_all(&mut feed, &symbols).await?;
        tracing::info!(
            "Upstream subscriptions sent: {} streams in {} batches",
            report.streams_requested,
            report.batches_sent
        );

        let publisher = BusPublisher::new(self.bus.clone(), self.metrics.clone());
        let exit = feed.read_loop(&publisher, &mut shutdown).await?;
        tracing::info!("Ingestion worker finished: {:?}", exit);
        Ok(exit)
    }

    /// Subscribe `symbols` on every configured interval, keeping the
    /// inter-batch delay between intervals as well.
    pub async fn subscribe_all<T: FrameTransport>(
        &self,
        feed: &mut BinanceFeedClient<T>,
        symbols: &[Symbol],
    ) -> std::result::Result<SubscriptionReport, SubscriptionError> {
        let mut total = SubscriptionReport::default();

        for (i, interval) in self.upstream.intervals.iter().enumerate() {
            if i > 0 {
                tokio::time::sleep(self.upstream.batch_delay()).await;
            }

            let report = feed
                .subscribe(
                    symbols,
                    *interval,
                    self.upstream.batch_size,
                    self.upstream.batch_delay(),
                )
                .await?;
            total.batches_sent += report.batches_sent;
            total.streams_requested += report.streams_requested;
        }

        Ok(total)
    }
}

/// Trim `symbols` so `symbols x intervals` fits in `max_streams`
pub fn apply_stream_budget(
    mut symbols: Vec<Symbol>,
    intervals: usize,
    max_streams: usize,
) -> Vec<Symbol> {
    let per_symbol = intervals.max(1);
    let fits = max_streams / per_symbol;

    if symbols.len() > fits {
        tracing::warn!(
            "{} symbols x {} intervals exceeds the {} stream limit; subscribing the first {}",
            symbols.len(),
            per_symbol,
            max_streams,
            fits
        );
        symbols.truncate(fits);
    }

    symbols
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::MemoryBus;
    use crate::infrastructure::shutdown::Shutdown;
    use crate::test_utils::ScriptedTransport;
    use crate::ws::KlineInterval;
    use axum::{routing::get, Router};
    use futures_util::{SinkExt, StreamExt};
    use std::time::Duration;
    use tokio::net::TcpListener;
    use tokio_tungstenite::tungstenite::Message;

    fn symbols(names: &[&str]) -> Vec<Symbol> {
        names.iter().filter_map(|n| Symbol::new(n)).collect()
    }

    #[test]
    fn test_stream_budget() {
        let all = symbols(&["AUSDT", "BUSDT", "CUSDT", "DUSDT", "EUSDT"]);

        assert_eq!(apply_stream_budget(all.clone(), 1, 1024).len(), 5);
        let trimmed = apply_stream_budget(all.clone(), 2, 6);
        assert_eq!(trimmed, symbols(&["AUSDT", "BUSDT", "CUSDT"]));
        assert!(apply_stream_budget(all, 4, 3).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_subscribe_all_intervals() {
        let upstream = UpstreamConfig {
            intervals: vec![KlineInterval::Sec1, KlineInterval::Min5],
            batch_size: 2,
            ..UpstreamConfig::default()
        };
        let worker = IngestWorker::new(
            upstream,
            DiscoveryConfig::default(),
            Arc::new(MemoryBus::default()),
            Arc::new(MetricsCollector::new()),
        );
        let mut feed =
            BinanceFeedClient::new(ScriptedTransport::new(), Arc::new(MetricsCollector::new()));

        let report = worker
            .subscribe_all(&mut feed, &symbols(&["AUSDT", "BUSDT", "CUSDT"]))
            .await
            .unwrap();

        assert_eq!(report.batches_sent, 4);
        assert_eq!(report.streams_requested, 6);

        let sent = &feed.transport().sent;
        assert!(sent[0].1.contains("ausdt@kline_1s"));
        assert!(sent[3].1.contains("cusdt@kline_5m"));
        for pair in sent.windows(2) {
            assert!(pair[1].0 - pair[0].0 >= Duration::from_millis(300));
        }
    }

    /// Worker end to end against a local catalog and a local stream server
    #[tokio::test]
    async fn test_worker_publishes_upstream_events() {
        let catalog = Router::new().route(
            "/api/v3/exchangeInfo",
            get(|| async {
                r#"{"symbols":[{"symbol":"BTCUSDT"},{"symbol":"BTCUSD"},{"symbol":"ETHUSDT"}]}"#
            }),
        );
        let http = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let http_addr = http.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(http, catalog).await.unwrap();
        });

        let event = r#"{"stream":"ethusdt@kline_1s","data":{"e":"kline","E":1,"s":"ETHUSDT","k":{"c":"1"}}}"#;
        let ws = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let ws_addr = ws.local_addr().unwrap();
        let upstream = tokio::spawn(async move {
            let (tcp, _) = ws.accept().await.unwrap();
            let mut stream = tokio_tungstenite::accept_async(tcp).await.unwrap();
            let request = stream.next().await.unwrap().unwrap();
            let request: serde_json::Value =
                serde_json::from_str(request.to_text().unwrap()).unwrap();
            stream
                .send(Message::text(r#"{"result":null,"id":1}"#))
                .await
                .unwrap();
            stream.send(Message::text(event)).await.unwrap();
            stream.close(None).await.unwrap();
            request
        });

        let bus = Arc::new(MemoryBus::default());
        let mut sub = bus.psubscribe("*").await.unwrap();
        let worker = IngestWorker::new(
            UpstreamConfig {
                ws_url: format!("ws://{}", ws_addr),
                ..UpstreamConfig::default()
            },
            DiscoveryConfig {
                catalog_url: format!("http://{}/api/v3/exchangeInfo", http_addr),
                ..DiscoveryConfig::default()
            },
            bus.clone(),
            Arc::new(MetricsCollector::new()),
        );

        let shutdown = Shutdown::new();
        let exit = worker.run(shutdown.subscribe()).await.unwrap();
        assert_eq!(exit, ReadLoopExit::Closed);

        let request = upstream.await.unwrap();
        assert_eq!(request["method"], "SUBSCRIBE");
        assert_eq!(
            request["params"],
            serde_json::json!(["btcusdt@kline_1s", "ethusdt@kline_1s"])
        );

        let msg = sub.next().await.unwrap();
        assert_eq!(msg.topic.as_str(), "ETHUSDT");
        assert_eq!(&msg.payload[..], event.as_bytes());
    }

    #[tokio::test]
    async fn test_worker_fails_on_empty_universe() {
        let catalog = Router::new().route(
            "/api/v3/exchangeInfo",
            get(|| async { r#"{"symbols":[{"symbol":"BTCEUR"}]}"# }),
        );
        let http = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let http_addr = http.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(http, catalog).await.unwrap();
        });

        let worker = IngestWorker::new(
            UpstreamConfig::default(),
            DiscoveryConfig {
                catalog_url: format!("http://{}/api/v3/exchangeInfo", http_addr),
                ..DiscoveryConfig::default()
            },
            Arc::new(MemoryBus::default()),
            Arc::new(MetricsCollector::new()),
        );

        let shutdown = Shutdown::new();
        let err = worker.run(shutdown.subscribe()).await.unwrap_err();
        assert!(matches!(
            err,
            crate::FanoutError::Discovery(crate::core::DiscoveryError::NoSymbols)
        ));
    }
}
