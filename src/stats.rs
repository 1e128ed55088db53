//! Prometheus counters for the feed pipeline

use prometheus::{Encoder, IntCounterVec, IntGaugeVec, Opts, Registry, TextEncoder};

use crate::error::{BookError, Result};
use crate::orderbook::LobAction;

/// Pipeline metrics, kept in a private registry
#[derive(Clone)]
pub struct FeedStats {
    registry: Registry,
    messages_received: IntCounterVec,
    events_applied: IntCounterVec,
    book_errors: IntCounterVec,
    resting_orders: IntGaugeVec,
}

impl FeedStats {
    pub fn new() -> Result<Self> {
        let registry = Registry::new();

        let messages_received = IntCounterVec::new(
            Opts::new("md_messages_received_total", "Websocket messages received"),
            &["exchange"],
        )?;
        let events_applied = IntCounterVec::new(
            Opts::new("md_book_events_applied_total", "L3 events applied to books"),
            &["symbol", "action"],
        )?;
        let book_errors = IntCounterVec::new(
            Opts::new("md_book_errors_total", "L3 events rejected by a book"),
            &["symbol", "kind"],
        )?;
        let resting_orders = IntGaugeVec::new(
            Opts::new("md_resting_orders", "Orders resting in the book"),
            &["symbol"],
        )?;

        registry.register(Box::new(messages_received.clone()))?;
        registry.register(Box::new(events_applied.clone()))?;
        registry.register(Box::new(book_errors.clone()))?;
        registry.register(Box::new(resting_orders.clone()))?;

        Ok(Self {
            registry,
            messages_received,
            events_applied,
            book_errors,
            resting_orders,
        })
    }

    pub fn message_received(&self, exchange: &str) {
        self.messages_received.with_label_values(&[exchange]).inc();
    }

    pub fn event_applied(&self, symbol: &str, action: LobAction, resting: usize) {
        self.events_applied
            .with_label_values(&[symbol, action.as_str()])
            .inc();
        self.resting_orders
            .with_label_values(&[symbol])
            .set(resting as i64);
    }

    pub fn book_error(&self, symbol: &str, error: &BookError) {
        self.book_errors
            .with_label_values(&[symbol, error.kind()])
            .inc();
        self.resting_orders.with_label_values(&[symbol]).set(0);
    }

    /// Text exposition of every metric
    pub fn encode(&self) -> Result<String> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| crate::error::MarketDataError::MetricsError(e.to_string()))
    }
}
