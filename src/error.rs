//! Error types for the market data handler

use rust_decimal::Decimal;
use thiserror::Error;

use crate::orderbook::{OrderId, Side};

/// Why an order could not be located
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NotFoundReason {
    #[error("no such resting order")]
    NotResting,

    #[error("no {side} level at price {price}")]
    LevelMissing { side: Side, price: Decimal },

    #[error("order is not queued at {side} level {price}")]
    NotAtLevel { side: Side, price: Decimal },
}

/// Order book reconstruction errors
///
/// Every variant means the book no longer agrees with the exchange and
/// must be rebuilt from a fresh snapshot.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BookError {
    #[error("order {order_id} not found: {reason}")]
    OrderNotFound {
        order_id: OrderId,
        reason: NotFoundReason,
    },

    #[error("order {order_id} is already resting")]
    DuplicateOrder { order_id: OrderId },

    #[error("order {order_id} cannot move from {from} to {to}")]
    UnsupportedSideChange {
        order_id: OrderId,
        from: Side,
        to: Side,
    },

    #[error("{side} level {price} has zero aggregate size")]
    EmptyLevel { side: Side, price: Decimal },

    #[error("book integrity violated: {0}")]
    Inconsistent(String),
}

impl BookError {
    pub(crate) fn not_resting(order_id: OrderId) -> Self {
        BookError::OrderNotFound {
            order_id,
            reason: NotFoundReason::NotResting,
        }
    }

    /// True when the error points at drift between the book's own
    /// structures rather than at a bad event
    pub fn is_corruption(&self) -> bool {
        match self {
            BookError::OrderNotFound { reason, .. } => *reason != NotFoundReason::NotResting,
            BookError::EmptyLevel { .. } | BookError::Inconsistent(_) => true,
            BookError::DuplicateOrder { .. } | BookError::UnsupportedSideChange { .. } => false,
        }
    }

    /// Short stable label, used for metrics
    pub fn kind(&self) -> &'static str {
        match self {
            BookError::OrderNotFound { .. } => "order_not_found",
            BookError::DuplicateOrder { .. } => "duplicate_order",
            BookError::UnsupportedSideChange { .. } => "unsupported_side_change",
            BookError::EmptyLevel { .. } => "empty_level",
            BookError::Inconsistent(_) => "inconsistent",
        }
    }
}

/// Market data handler errors
#[derive(Error, Debug)]
pub enum MarketDataError {
    #[error("WebSocket connection error: {0}")]
    WebSocketConnection(String),

    #[error("WebSocket message error: {0}")]
    WebSocketMessage(String),

    #[error("Failed to parse message: {0}")]
    ParseError(String),

    #[error("Subscription rejected: {0}")]
    SubscriptionError(String),

    #[error("Order book error for {symbol}: {source}")]
    Book {
        symbol: String,
        #[source]
        source: BookError,
    },

    #[error("REST API error: {0}")]
    RestApiError(String),

    #[error("IPC error: {0}")]
    IpcError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Metrics error: {0}")]
    MetricsError(String),

    #[error("Sequence number mismatch for {symbol}: expected {expected}, got {got}")]
    SequenceMismatch {
        symbol: String,
        expected: u64,
        got: u64,
    },

    #[error("Connection timeout")]
    ConnectionTimeout,

    #[error("Max reconnection attempts exceeded")]
    MaxReconnectAttemptsExceeded,
}

impl MarketDataError {
    /// Errors after which the in-memory books cannot be trusted and the
    /// session has to start over from a snapshot
    pub fn requires_resync(&self) -> bool {
        matches!(
            self,
            MarketDataError::Book { .. } | MarketDataError::SequenceMismatch { .. }
        )
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for MarketDataError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        MarketDataError::WebSocketConnection(err.to_string())
    }
}

impl From<serde_json::Error> for MarketDataError {
    fn from(err: serde_json::Error) -> Self {
        MarketDataError::ParseError(err.to_string())
    }
}

impl From<reqwest::Error> for MarketDataError {
    fn from(err: reqwest::Error) -> Self {
        MarketDataError::RestApiError(err.to_string())
    }
}

impl From<std::io::Error> for MarketDataError {
    fn from(err: std::io::Error) -> Self {
        MarketDataError::IpcError(err.to_string())
    }
}

impl From<prometheus::Error> for MarketDataError {
    fn from(err: prometheus::Error) -> Self {
        MarketDataError::MetricsError(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, MarketDataError>;
