//! Order book module
//!
//! Rebuilds per-order (L3) book state from insert/delete/update events.

mod book;
mod index;
mod journal;
mod ledger;
mod manager;
mod metrics;
mod tracker;

pub use book::L3OrderBook;
pub use index::{OrderIndex, OrderKey};
pub use journal::{EventJournal, JournalEntry};
pub use ledger::PriceLedger;
pub use manager::OrderBookManager;
pub use metrics::OrderBookMetrics;
pub use tracker::BestLevelTracker;

use std::fmt;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Side of the order book
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    /// True if `price` ranks strictly ahead of `other` on this side
    pub fn is_better(self, price: Decimal, other: Decimal) -> bool {
        match self {
            Side::Buy => price > other,
            Side::Sell => price < other,
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Buy => f.write_str("buy"),
            Side::Sell => f.write_str("sell"),
        }
    }
}

/// Exchange-assigned order identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OrderId(pub u64);

impl fmt::Display for OrderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for OrderId {
    fn from(id: u64) -> Self {
        OrderId(id)
    }
}

/// A resting order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    pub id: OrderId,
    pub price: Decimal,
    pub size: Decimal,
    pub side: Side,
}

/// Aggregated price level
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Level {
    pub price: Decimal,
    pub size: Decimal,
}

/// Book transition carried by a normalised record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LobAction {
    Insert,
    Delete,
    Update,
}

impl LobAction {
    pub fn as_str(self) -> &'static str {
        match self {
            LobAction::Insert => "insert",
            LobAction::Delete => "delete",
            LobAction::Update => "update",
        }
    }
}

/// One per-order book mutation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "lowercase")]
pub enum LobEvent {
    Insert {
        order_id: OrderId,
        price: Decimal,
        size: Decimal,
        side: Side,
    },
    Delete {
        order_id: OrderId,
    },
    Update {
        order_id: OrderId,
        price: Decimal,
        size: Decimal,
        side: Side,
    },
}

impl LobEvent {
    pub fn order_id(&self) -> OrderId {
        match self {
            LobEvent::Insert { order_id, .. }
            | LobEvent::Delete { order_id }
            | LobEvent::Update { order_id, .. } => *order_id,
        }
    }

    pub fn action(&self) -> LobAction {
        match self {
            LobEvent::Insert { .. } => LobAction::Insert,
            LobEvent::Delete { .. } => LobAction::Delete,
            LobEvent::Update { .. } => LobAction::Update,
        }
    }
}

/// Order book state to be published
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BookState {
    pub symbol: String,
    pub timestamp: u64,
    pub events_applied: u64,
    pub best_bid: Option<Level>,
    pub best_ask: Option<Level>,
    pub bids: Vec<Level>,
    pub asks: Vec<Level>,
    pub metrics: OrderBookMetrics,
}
