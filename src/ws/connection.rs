//! Upstream WebSocket connection
//!
//! Thin wrapper over tokio-tungstenite owning the single exchange stream.
//! - Connect with timeout, TCP_NODELAY on plain sockets
//! - Text send for control frames, frame-at-a-time receive
//! - Ping frames are answered by tungstenite on the next read

use futures_util::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_tungstenite::{
    connect_async,
    tungstenite::protocol::Message,
    MaybeTlsStream, WebSocketStream,
};

/// Frame-level transport used by the feed client
///
/// Implemented by [`WebSocketConnection`]; tests substitute scripted
/// transports.
#[allow(async_fn_in_trait)]
pub trait FrameTransport {
    /// Send a text frame
    async fn send_text(&mut self, text: &str) -> Result<()>;

    /// Receive next frame. `Ok(None)` on graceful close.
    async fn recv(&mut self) -> Result<Option<Message>>;

    /// Close the transport
    async fn close(&mut self) -> Result<()>;
}

/// Upstream WebSocket connection
pub struct WebSocketConnection {
    /// Underlying WebSocket stream
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
    state: ConnectionState,
    url: String,
}

/// Connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Connected and ready
    Connected,
    /// Disconnected
    Disconnected,
}

/// Errors that can occur with WebSocket connections
#[derive(Debug, thiserror::Error)]
pub enum WebSocketError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),
    #[error("Send failed: {0}")]
    SendFailed(String),
    #[error("Receive failed: {0}")]
    ReceiveFailed(String),
    #[error("Timeout")]
    Timeout,
    #[error("Not connected")]
    NotConnected,
}

/// Result type alias
pub type Result<T> = std::result::Result<T, WebSocketError>;

impl WebSocketConnection {
    /// Connect to WebSocket endpoint
    ///
    /// # Arguments
    /// * `url` - WebSocket URL (wss:// or ws://)
    /// * `connect_timeout` - Upper bound for TCP + TLS + upgrade
    pub async fn connect(url: &str, connect_timeout: Duration) -> Result<Self> {
        let (ws_stream, _) = timeout(connect_timeout, connect_async(url))
            .await
            .map_err(|_| WebSocketError::Timeout)?
            .map_err(|e| WebSocketError::ConnectionFailed(e.to_string()))?;

        // Disable Nagle's algorithm on plain sockets
        if let MaybeTlsStream::Plain(ref tcp) = ws_stream.get_ref() {
            tcp.set_nodelay(true)
                .map_err(|e| WebSocketError::ConnectionFailed(e.to_string()))?;
        }

        tracing::info!("Connected to {}", url);

        Ok(Self {
            stream: ws_stream,
            state: ConnectionState::Connected,
            url: url.to_string(),
        })
    }

    /// Send one frame
    pub async fn send(&mut self, msg: Message) -> Result<()> {
        if self.state != ConnectionState::Connected {
            return Err(WebSocketError::NotConnected);
        }

        self.stream
            .send(msg)
            .await
            .map_err(|e| WebSocketError::SendFailed(e.to_string()))
    }

    /// Get current connection state
    #[inline(always)]
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Check if connected
    #[inline(always)]
    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected
    }

    /// Get connection URL
    pub fn url(&self) -> &str {
        &self.url
    }
}

impl FrameTransport for WebSocketConnection {
    #[inline]
    async fn send_text(&mut self, text: &str) -> Result<()> {
        self.send(Message::text(text)).await
    }

    async fn recv(&mut self) -> Result<Option<Message>> {
        if self.state != ConnectionState::Connected {
            return Err(WebSocketError::NotConnected);
        }

        match self.stream.next().await {
            Some(Ok(msg)) => {
                if let Message::Close(_) = &msg {
                    self.state = ConnectionState::Disconnected;
                }
                Ok(Some(msg))
            }
            Some(Err(e)) => {
                self.state = ConnectionState::Disconnected;
                Err(WebSocketError::ReceiveFailed(e.to_string()))
            }
            None => {
                self.state = ConnectionState::Disconnected;
                Ok(None)
            }
        }
    }

    async fn close(&mut self) -> Result<()> {
        if self.state == ConnectionState::Connected {
            if let Err(e) = self.stream.close(None).await {
                tracing::debug!("Close handshake with {} failed: {}", self.url, e);
            }
            self.state = ConnectionState::Disconnected;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[test]
    fn test_websocket_error_display() {
        let err = WebSocketError::NotConnected;
        assert_eq!(err.to_string(), "Not connected");
    }

    #[tokio::test]
    async fn test_connect_send_recv_against_local_server() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (tcp, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(tcp).await.unwrap();
            let frame = ws.next().await.unwrap().unwrap();
            ws.send(frame).await.unwrap();
            ws.close(None).await.unwrap();
        });

        let url = format!("ws://{}", addr);
        let mut conn = WebSocketConnection::connect(&url, Duration::from_secs(5))
            .await
            .unwrap();
        assert!(conn.is_connected());
        assert_eq!(conn.url(), url);

        conn.send_text("hello").await.unwrap();
        let echoed = conn.recv().await.unwrap().unwrap();
        assert_eq!(echoed.to_text().unwrap(), "hello");

        // Close frame, then end of stream
        let next = conn.recv().await.unwrap();
        assert!(matches!(next, Some(Message::Close(_)) | None));
        assert_eq!(conn.state(), ConnectionState::Disconnected);

        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_connect_refused() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let result =
            WebSocketConnection::connect(&format!("ws://{}", addr), Duration::from_secs(2)).await;
        assert!(matches!(
            result,
            Err(WebSocketError::ConnectionFailed(_)) | Err(WebSocketError::Timeout)
        ));
    }
}
