//! Publisher module for IPC communication
//!
//! Publishes normalised records and book state to the message bus.

use bytes::{BufMut, BytesMut};
use serde::Serialize;
use std::path::Path;
use tokio::io::AsyncWriteExt;
use tokio::net::UnixStream;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::error::{MarketDataError, Result};

/// Wire envelope: every payload travels with its topic
#[derive(Debug, Serialize)]
struct Envelope<'a, T: Serialize> {
    topic: &'a str,
    payload: &'a T,
}

/// Length-prefixed MessagePack frame
pub fn encode_frame<T: Serialize>(topic: &str, payload: &T) -> Result<BytesMut> {
    let data = rmp_serde::to_vec_named(&Envelope { topic, payload }).map_err(|e| {
        MarketDataError::SerializationError(format!("Failed to serialize: {}", e))
    })?;

    let mut frame = BytesMut::with_capacity(4 + data.len());
    frame.put_u32(data.len() as u32);
    frame.extend_from_slice(&data);
    Ok(frame)
}

/// Publisher for sending records via Unix socket
pub struct Publisher {
    socket_path: String,
    stream: Mutex<Option<UnixStream>>,
}

impl Publisher {
    /// Create a new publisher
    pub async fn new(socket_path: &str) -> Result<Self> {
        let publisher = Self {
            socket_path: socket_path.to_string(),
            stream: Mutex::new(None),
        };

        // Try initial connection (the bus may not be up yet)
        if let Err(e) = publisher.connect().await {
            warn!(error = %e, "Initial IPC connection failed, will retry on publish");
        }

        Ok(publisher)
    }

    /// Connect to the Unix socket
    async fn connect(&self) -> Result<()> {
        let path = Path::new(&self.socket_path);

        if !path.exists() {
            return Err(MarketDataError::IpcError(format!(
                "Socket path does not exist: {}",
                self.socket_path
            )));
        }

        let stream = UnixStream::connect(path).await.map_err(|e| {
            MarketDataError::IpcError(format!("Failed to connect to {}: {}", self.socket_path, e))
        })?;

        let mut guard = self.stream.lock().await;
        *guard = Some(stream);

        info!(path = %self.socket_path, "Connected to IPC socket");
        Ok(())
    }

    /// Publish one payload on `topic`
    ///
    /// Delivery is best effort: connection and write failures are logged and
    /// the stream is re-established on a later call.
    pub async fn publish<T: Serialize>(&self, topic: &str, payload: &T) -> Result<()> {
        let frame = encode_frame(topic, payload)?;

        let mut guard = self.stream.lock().await;

        // Check if we need to reconnect
        if guard.is_none() {
            drop(guard);
            if let Err(e) = self.connect().await {
                debug!(error = %e, "Failed to reconnect to IPC socket");
                return Ok(());
            }
            guard = self.stream.lock().await;
        }

        if let Some(stream) = guard.as_mut() {
            match stream.write_all(&frame).await {
                Ok(_) => {
                    debug!(topic = %topic, bytes = frame.len(), "Published");
                }
                Err(e) => {
                    warn!(error = %e, "Failed to write to IPC socket");
                    *guard = None; // Mark as disconnected
                }
            }
        }

        Ok(())
    }

    pub async fn is_connected(&self) -> bool {
        self.stream.lock().await.is_some()
    }
}
