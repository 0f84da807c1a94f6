//! Gateway HTTP/WebSocket server
//!
//! Routes:
//! - `GET /ws`     - client streaming endpoint
//! - `GET /health` - liveness plus registry size
//! - `GET /stats`  - metrics snapshot

use super::fanout::{FanoutListener, FanoutSettings};
use super::registry::ConnectionRegistry;
use super::session::{SessionHandler, SessionState};
use super::{ClientSink, DeliveryError};
use crate::bus::Bus;
use crate::infrastructure::metrics::MetricsCollector;
use crate::infrastructure::shutdown::ShutdownSignal;

use axum::{
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use bytes::Bytes;
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use serde::Serialize;
use std::future::IntoFuture;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::Mutex;
use tower_http::cors::CorsLayer;

/// Write half of a client WebSocket
pub struct WsSink {
    tx: Mutex<SplitSink<WebSocket, Message>>,
}

impl WsSink {
    pub fn new(tx: SplitSink<WebSocket, Message>) -> Self {
        Self { tx: Mutex::new(tx) }
    }
}

impl ClientSink for WsSink {
    async fn deliver(&self, payload: Bytes) -> Result<(), DeliveryError> {
        // Verbatim: text when the payload is UTF-8, binary otherwise
        let message = match std::str::from_utf8(&payload) {
            Ok(text) => Message::Text(text.to_owned()),
            Err(_) => Message::Binary(payload.to_vec()),
        };

        self.tx
            .lock()
            .await
            .send(message)
            .await
            .map_err(|e| DeliveryError::Write(e.to_string()))
    }

    async fn close(&self) {
        let _ = self.tx.lock().await.close().await;
    }
}

/// Shared server state
pub struct GatewayState {
    pub registry: Arc<ConnectionRegistry<WsSink>>,
    pub metrics: Arc<MetricsCollector>,
    pub shutdown: ShutdownSignal,
}

#[derive(Debug, Serialize)]
struct HealthDto {
    status: &'static str,
    connections: usize,
    subscriptions: usize,
}

/// Create the gateway router
pub fn create_router(state: Arc<GatewayState>) -> Router {
    Router::new()
        .route("/ws", get(ws_handler))
        .route("/health", get(health_handler))
        .route("/stats", get(stats_handler))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn health_handler(State(state): State<Arc<GatewayState>>) -> impl IntoResponse {
    Json(HealthDto {
        status: "ok",
        connections: state.registry.len(),
        subscriptions: state.registry.subscription_count(),
    })
}

async fn stats_handler(State(state): State<Arc<GatewayState>>) -> impl IntoResponse {
    Json(state.metrics.snapshot())
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<GatewayState>>,
) -> impl IntoResponse {
    ws.on_upgrade(|socket| handle_socket(socket, state))
}

/// Per-connection read loop
async fn handle_socket(socket: WebSocket, state: Arc<GatewayState>) {
    let (tx, mut rx) = socket.split();
    let mut session = SessionHandler::open(
        state.registry.clone(),
        WsSink::new(tx),
        state.metrics.clone(),
    );
    let mut shutdown = state.shutdown.clone();
    let connection = session.connection().clone();
    let evicted = connection.removed();
    tokio::pin!(evicted);

    loop {
        let msg = tokio::select! {
            biased;
            _ = shutdown.recv() => break,
            _ = &mut evicted => {
                tracing::debug!("Client {} evicted, dropping socket", session.id());
                break;
            }
            msg = rx.next() => msg,
        };

        match msg {
            Some(Ok(Message::Text(text))) => {
                session.handle_frame(text.as_bytes());
            }
            Some(Ok(Message::Binary(data))) => {
                session.handle_frame(&data);
            }
            Some(Ok(Message::Close(_))) | None => break,
            // Ping/Pong answered by axum
            Some(Ok(_)) => {}
            Some(Err(e)) => {
                tracing::debug!("Client {} read error: {}", session.id(), e);
                break;
            }
        }

        if session.state() == SessionState::Closed {
            break;
        }
    }

    session.close();
}

/// Serve clients on `listener` and fan out `bus` messages until shutdown.
///
/// Returns an error if the bus subscription fails or ends.
pub async fn serve<B: Bus>(
    listener: TcpListener,
    bus: Arc<B>,
    settings: FanoutSettings,
    metrics: Arc<MetricsCollector>,
    shutdown: ShutdownSignal,
) -> crate::Result<()> {
    let registry = Arc::new(ConnectionRegistry::new());
    let fanout = FanoutListener::new(bus, registry.clone(), settings, metrics.clone());

    let state = Arc::new(GatewayState {
        registry,
        metrics,
        shutdown: shutdown.clone(),
    });
    let app = create_router(state);

    tracing::info!("Gateway listening on {}", listener.local_addr()?);

    let mut http_shutdown = shutdown.clone();
    let server = axum::serve(listener, app)
        .with_graceful_shutdown(async move { http_shutdown.recv().await })
        .into_future();

    tokio::select! {
        served = server => served?,
        fanned = fanout.run(shutdown) => fanned?,
    }

    tracing::info!("Gateway stopped");
    Ok(())
}
