//! WebSocket client for exchange streams
//!
//! Owns one socket at a time; the manager decides when to reconnect.

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::{
    connect_async,
    tungstenite::protocol::Message,
    MaybeTlsStream, WebSocketStream,
};
use tracing::{debug, error, info, trace, warn};

use crate::error::{MarketDataError, Result};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// One frame off the wire
#[derive(Debug, PartialEq)]
pub enum Frame {
    /// Payload for the normaliser
    Data { text: String, received_at: u64 },
    /// Ping, pong or raw frame, already handled
    Control,
}

/// WebSocket client for a single connection
pub struct WebSocketClient {
    stream: Option<WsStream>,
    endpoint: String,
}

impl WebSocketClient {
    /// Create a new WebSocket client
    pub fn new(endpoint: &str) -> Self {
        Self {
            stream: None,
            endpoint: endpoint.to_string(),
        }
    }

    /// Connect to the WebSocket endpoint
    pub async fn connect(&mut self) -> Result<()> {
        info!(url = %self.endpoint, "Connecting to exchange WebSocket");

        let (ws_stream, response) = connect_async(self.endpoint.as_str()).await.map_err(|e| {
            MarketDataError::WebSocketConnection(format!("Failed to connect: {}", e))
        })?;

        info!(status = ?response.status(), "WebSocket connected");
        self.stream = Some(ws_stream);

        Ok(())
    }

    /// Send subscription payloads in order
    pub async fn subscribe(&mut self, payloads: &[String]) -> Result<()> {
        let stream = self
            .stream
            .as_mut()
            .ok_or_else(|| MarketDataError::WebSocketConnection("Not connected".to_string()))?;

        for payload in payloads {
            debug!(payload = %payload, "Sending subscription");
            stream
                .send(Message::Text(payload.clone()))
                .await
                .map_err(|e| MarketDataError::WebSocketMessage(e.to_string()))?;
        }
        info!(count = payloads.len(), "Subscriptions sent");
        Ok(())
    }

    /// Receive the next frame, stamping data with the local receive time
    pub async fn recv(&mut self) -> Result<Frame> {
        let stream = self
            .stream
            .as_mut()
            .ok_or_else(|| MarketDataError::WebSocketConnection("Not connected".to_string()))?;

        let message = match stream.next().await {
            Some(Ok(message)) => message,
            Some(Err(e)) => {
                error!(error = %e, "WebSocket error");
                return Err(self.lost(MarketDataError::WebSocketMessage(e.to_string())));
            }
            None => {
                warn!("WebSocket stream ended");
                return Err(self.lost(MarketDataError::WebSocketConnection(
                    "Stream ended".to_string(),
                )));
            }
        };
        let received_at = chrono::Utc::now().timestamp_millis() as u64;

        match message {
            Message::Text(text) => {
                trace!(len = text.len(), "Received text frame");
                Ok(Frame::Data { text, received_at })
            }
            // Some venues compress into binary frames; normalisers expect JSON text
            Message::Binary(data) => Ok(Frame::Data {
                text: String::from_utf8_lossy(&data).into_owned(),
                received_at,
            }),
            Message::Ping(data) => {
                stream
                    .send(Message::Pong(data))
                    .await
                    .map_err(|e| MarketDataError::WebSocketMessage(e.to_string()))?;
                Ok(Frame::Control)
            }
            Message::Pong(_) | Message::Frame(_) => Ok(Frame::Control),
            Message::Close(frame) => {
                warn!(frame = ?frame, "Exchange closed the connection");
                Err(self.lost(MarketDataError::WebSocketConnection(
                    "Connection closed".to_string(),
                )))
            }
        }
    }

    fn lost(&mut self, error: MarketDataError) -> MarketDataError {
        self.stream = None;
        error
    }

    /// Send a ping to keep connection alive
    pub async fn ping(&mut self) -> Result<()> {
        if let Some(stream) = self.stream.as_mut() {
            stream
                .send(Message::Ping(vec![]))
                .await
                .map_err(|e| MarketDataError::WebSocketMessage(e.to_string()))?;
        }
        Ok(())
    }

    /// Close the connection
    pub async fn close(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            let _ = stream.close(None).await;
        }
    }
}
