//! L3 market data handler library
//!
//! Connects to exchange WebSocket streams, normalises their wire formats
//! into canonical records, rebuilds per-order books and publishes the
//! results to the message bus.

use std::sync::Arc;
use tokio::sync::RwLock;

pub mod config;
pub mod error;
pub mod exchange;
pub mod normaliser;
pub mod orderbook;
pub mod pipeline;
pub mod publisher;
pub mod stats;
pub mod websocket;

pub use config::Config;
pub use error::{BookError, MarketDataError, Result};
pub use exchange::{Exchange, Topic};
pub use normaliser::{LobRecord, NormalisedMessage, Normaliser, TradeRecord};
pub use orderbook::{
    BookState, L3OrderBook, Level, LobAction, LobEvent, Order, OrderBookManager, OrderBookMetrics,
    OrderId, Side,
};
pub use publisher::Publisher;
pub use stats::FeedStats;
pub use websocket::WebSocketManager;

/// Application state shared across components
pub struct AppState {
    pub orderbook_manager: Arc<RwLock<OrderBookManager>>,
    pub publisher: Arc<Publisher>,
    pub config: Arc<Config>,
    pub stats: FeedStats,
}
