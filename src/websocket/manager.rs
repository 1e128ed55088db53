//! WebSocket connection manager
//!
//! Handles reconnection, bootstrap and the receive loop. Every reconnect
//! starts from empty books and a fresh snapshot.

use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::{sleep, timeout};
use tracing::{error, info, warn};

use super::{Frame, WebSocketClient};
use crate::error::{MarketDataError, Result};
use crate::normaliser::Normaliser;
use crate::pipeline;
use crate::AppState;

/// Maximum backoff delay in milliseconds (60 seconds)
const MAX_BACKOFF_MS: u64 = 60_000;
/// Cooldown period after which reconnect attempts are reset (5 minutes)
const RECONNECT_COOLDOWN_SECS: u64 = 300;

/// Manages WebSocket connections with automatic reconnection
pub struct WebSocketManager {
    state: Arc<AppState>,
    client: WebSocketClient,
    http: reqwest::Client,
    reconnect_attempts: u32,
    last_successful_connection: Option<Instant>,
}

impl WebSocketManager {
    /// Create a new WebSocket manager
    pub fn new(state: Arc<AppState>) -> Self {
        let client = WebSocketClient::new(&state.config.ws_endpoint);

        Self {
            state,
            client,
            http: reqwest::Client::new(),
            reconnect_attempts: 0,
            last_successful_connection: None,
        }
    }

    /// Run until the reconnect budget is exhausted (0 means never)
    pub async fn run(&mut self) -> Result<()> {
        info!(exchange = %self.state.config.exchange, "Starting WebSocket manager");

        loop {
            // Reset reconnect attempts if we've been stable for a while
            if let Some(last_success) = self.last_successful_connection {
                if last_success.elapsed() > Duration::from_secs(RECONNECT_COOLDOWN_SECS)
                    && self.reconnect_attempts > 0
                {
                    info!(
                        previous_attempts = self.reconnect_attempts,
                        "Resetting reconnect counter after cooldown period"
                    );
                    self.reconnect_attempts = 0;
                }
            }

            match self.connect_and_process().await {
                Ok(()) => {
                    info!("WebSocket processing completed normally, reconnecting...");
                    sleep(Duration::from_secs(1)).await;
                }
                Err(e) => {
                    self.client.close().await;
                    if e.requires_resync() {
                        warn!(error = %e, "Book out of sync, resubscribing for a fresh snapshot");
                    } else {
                        error!(error = %e, "WebSocket error");
                    }
                    self.reconnect_attempts += 1;

                    let max_attempts = self.state.config.max_reconnect_attempts;
                    if max_attempts > 0 && self.reconnect_attempts > max_attempts {
                        error!(attempts = self.reconnect_attempts, "Giving up on reconnecting");
                        return Err(MarketDataError::MaxReconnectAttemptsExceeded);
                    }

                    let delay = backoff_delay(self.state.config.reconnect_delay_ms, self.reconnect_attempts);
                    warn!(
                        attempt = self.reconnect_attempts,
                        delay_ms = delay.as_millis() as u64,
                        "Reconnecting after error..."
                    );
                    sleep(delay).await;
                }
            }
        }
    }

    /// Connect, bootstrap and process messages
    async fn connect_and_process(&mut self) -> Result<()> {
        let config = self.state.config.clone();
        let mut normaliser = config.exchange.normaliser();

        self.client.connect().await?;
        self.client
            .subscribe(&config.exchange.subscriptions(&config.symbols))
            .await?;

        self.last_successful_connection = Some(Instant::now());

        // aggregated feeds are published as-is and keep no book
        if config.exchange.is_l3() {
            let mut manager = self.state.orderbook_manager.write().await;
            for symbol in &config.symbols {
                manager.reset(symbol);
            }
        }

        self.fetch_snapshots(normaliser.as_mut()).await?;

        // Process messages with keepalive
        let mut last_message = Instant::now();
        let keepalive_timeout = Duration::from_secs(30);
        let recv_timeout = Duration::from_secs(45);

        loop {
            match timeout(recv_timeout, self.client.recv()).await {
                Ok(Ok(Frame::Data { text, received_at })) => {
                    last_message = Instant::now();
                    if let Err(e) =
                        pipeline::process_message(&self.state, normaliser.as_mut(), &text, received_at).await
                    {
                        if e.requires_resync() || matches!(e, MarketDataError::SubscriptionError(_)) {
                            return Err(e);
                        }
                        warn!(error = %e, "Failed to process message");
                    }
                }
                Ok(Ok(Frame::Control)) => {
                    if last_message.elapsed() > keepalive_timeout {
                        if let Err(e) = self.client.ping().await {
                            warn!(error = %e, "Failed to send keepalive ping");
                        }
                    }
                }
                Ok(Err(e)) => return Err(e),
                Err(_) => {
                    // Timeout - connection might be stale
                    warn!(
                        last_message_secs = last_message.elapsed().as_secs(),
                        "No message received within timeout, sending keepalive"
                    );
                    if let Err(e) = self.client.ping().await {
                        warn!(error = %e, "Failed to send keepalive ping, reconnecting");
                        return Err(MarketDataError::ConnectionTimeout);
                    }
                }
            }
        }
    }

    /// Replay REST snapshots for exchanges that bootstrap over HTTP
    async fn fetch_snapshots(&self, normaliser: &mut dyn Normaliser) -> Result<()> {
        let config = &self.state.config;

        for symbol in &config.symbols {
            let Some(url) = config
                .exchange
                .snapshot_url(&config.rest_endpoint, symbol, config.depth_levels)
            else {
                continue;
            };

            info!(symbol = %symbol, url = %url, "Fetching order book snapshot");

            let body = self
                .http
                .get(&url)
                .send()
                .await?
                .error_for_status()?
                .text()
                .await?;

            let received_at = chrono::Utc::now().timestamp_millis() as u64;
            let messages = normaliser.normalise_snapshot(symbol, &body, received_at)?;
            let count = messages.len();
            pipeline::dispatch(&self.state, messages).await?;

            info!(symbol = %symbol, records = count, "Order book bootstrapped");
        }

        Ok(())
    }
}

/// Exponential backoff capped at MAX_BACKOFF_MS
fn backoff_delay(base_ms: u64, attempt: u32) -> Duration {
    let delay = base_ms.saturating_mul(2u64.pow(attempt.min(6)));
    Duration::from_millis(delay.min(MAX_BACKOFF_MS))
}
